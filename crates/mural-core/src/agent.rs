//! Agent sessions
//!
//! One session per credentialed identity:
//! - A pending queue of write intentions assigned by the scheduler
//! - The next instant at which the agent may write (its cooldown)
//! - A liveness flag, cleared for good once the agent is banned or found
//!   unverified
//! - A single write slot, so that at most one write per agent is in flight
//!
//! Every accessor is safe to call from the scheduler tick and from the
//! agent's write task at the same time.

use crate::error::QueueError;
use crate::queue::{PendingQueue, WriteIntention};
use crate::roster::AgentIdentity;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Whether an agent may still be scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Liveness {
    /// Eligible for work
    Live,
    /// Rate limit sentinel says the account is banned
    Banned,
    /// Account is not allowed to write
    Unverified,
}

impl Liveness {
    /// Whether the agent may be scheduled
    #[inline]
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

#[derive(Debug)]
struct AgentState {
    cooldown: DateTime<Utc>,
    liveness: Liveness,
}

/// Per-agent scheduling state
#[derive(Debug)]
pub struct AgentSession {
    identity: AgentIdentity,
    queue: PendingQueue,
    state: Mutex<AgentState>,
    write_slot: Arc<Semaphore>,
}

impl AgentSession {
    /// Live session, eligible from `now`
    #[must_use]
    pub fn new(identity: AgentIdentity, queue_capacity: usize, now: DateTime<Utc>) -> Self {
        Self {
            identity,
            queue: PendingQueue::new(queue_capacity),
            state: Mutex::new(AgentState {
                cooldown: now,
                liveness: Liveness::Live,
            }),
            write_slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Account name
    #[inline]
    #[must_use]
    pub fn username(&self) -> &str {
        &self.identity.username
    }

    /// Identity this session writes as
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Pending queue
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    /// Append assigned work
    ///
    /// Checked against liveness under the state lock, so nothing lands in
    /// the queue after [`retire`](Self::retire) has drained it.
    ///
    /// # Errors
    /// - `QueueError::Retired` if the agent is out of rotation
    /// - `QueueError::Full` if the batch does not fit
    pub fn enqueue(
        &self,
        batch: impl IntoIterator<Item = WriteIntention>,
    ) -> Result<usize, QueueError> {
        let state = self.state.lock();
        if !state.liveness.is_live() {
            return Err(QueueError::Retired);
        }
        let added = self.queue.enqueue(batch);
        drop(state);
        added
    }

    /// Take the oldest pending intention
    ///
    /// # Errors
    /// `QueueError::Empty` if nothing is pending
    #[inline]
    pub fn dequeue(&self) -> Result<WriteIntention, QueueError> {
        self.queue.dequeue()
    }

    /// Next instant the agent may write
    #[must_use]
    pub fn cooldown(&self) -> DateTime<Utc> {
        self.state.lock().cooldown
    }

    /// Move the cooldown forward
    ///
    /// An earlier instant than the current cooldown is ignored, so a late
    /// response can never pull the agent back. Returns whether the cooldown
    /// changed.
    pub fn set_cooldown(&self, next: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if next > state.cooldown {
            state.cooldown = next;
            true
        } else {
            false
        }
    }

    /// Replace the cooldown unconditionally
    ///
    /// Only for a freshly scheduled successful write.
    pub fn reset_cooldown(&self, next: DateTime<Utc>) {
        self.state.lock().cooldown = next;
    }

    /// Current liveness
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        self.state.lock().liveness
    }

    /// Whether the agent may be scheduled
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.liveness().is_live()
    }

    /// Whether the agent is live and its cooldown has elapsed at `now`
    #[must_use]
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.lock();
        state.liveness.is_live() && now >= state.cooldown
    }

    /// Take the agent out of rotation and abandon its queued work
    ///
    /// The abandoned points are still in the diff, so the next tick hands
    /// them to the remaining agents. Retiring twice keeps the first reason.
    pub fn retire(&self, reason: Liveness) -> Vec<WriteIntention> {
        {
            let mut state = self.state.lock();
            if state.liveness.is_live() {
                state.liveness = reason;
            }
        }
        self.queue.drain()
    }

    /// Claim the write slot without waiting
    ///
    /// `None` means a write is already in flight for this agent.
    #[must_use]
    pub fn try_begin_write(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.write_slot).try_acquire_owned().ok()
    }

    /// Whether a write is in flight
    #[must_use]
    pub fn is_writing(&self) -> bool {
        self.write_slot.available_permits() == 0
    }
}
