//! Dispatch scheduler
//!
//! Ticks on a fixed interval. Each tick:
//! 1. Computes the diff between target and observed canvas
//! 2. Prunes queued work the diff no longer calls for
//! 3. Partitions unclaimed diff points round-robin across live agents
//! 4. Issues one write on every agent whose cooldown has elapsed
//!
//! Writes run as independent tasks; the tick never waits on one. An agent
//! still cooling down, or with a write already in flight, simply keeps its
//! queue until a later tick.

use crate::agent::{AgentSession, Liveness};
use crate::config::FleetConfig;
use crate::error::TransportError;
use crate::outcome::{CooldownChange, OutcomeInterpreter, WriteOutcome};
use crate::queue::WriteIntention;
use crate::remote::{PixelWriter, WriteRequest};
use crate::roster::AgentIdentity;
use crate::session::{NoopSessions, SessionProvider};
use chrono::{DateTime, Utc};
use mural_canvas::{CanvasModel, Palette, Point};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Split `items` round-robin into `n` shares
///
/// Item `i` goes to share `i % n`, so share sizes differ by at most one.
/// Returns no shares when `n` is zero.
#[must_use]
pub fn partition<T>(items: impl IntoIterator<Item = T>, n: usize) -> Vec<Vec<T>> {
    if n == 0 {
        return Vec::new();
    }
    let mut shares: Vec<Vec<T>> = (0..n).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        shares[i % n].push(item);
    }
    shares
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Points that differ from the target
    pub diff_size: usize,
    /// Diff points no configured tile contains
    pub out_of_bounds: usize,
    /// Queued intentions dropped because the diff no longer wants them
    pub pruned: usize,
    /// Diff points newly queued this tick
    pub assigned: usize,
    /// Diff points left unassigned because queues were full or their agent
    /// retired mid-tick
    pub deferred: usize,
    /// Writes started
    pub writes_issued: usize,
    /// Live agents at the start of the tick
    pub live_agents: usize,
    /// Agents skipped because their cooldown has not elapsed
    pub cooling: usize,
    /// Agents skipped because a write is still in flight
    pub busy: usize,
    /// Eligible agents with nothing queued
    pub idle: usize,
}

/// Result of one write task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Writing agent
    pub agent: String,
    /// Intention that was attempted
    pub intention: WriteIntention,
    /// Final outcome; `None` if the intention was dropped before sending
    pub outcome: Option<WriteOutcome>,
    /// Remote calls made
    pub attempts: u8,
}

/// Cumulative outcome counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Ticks run
    pub ticks: u64,
    /// Writes started
    pub writes: u64,
    /// Placed pixels
    pub successes: u64,
    /// Rate-limited writes
    pub rate_limited: u64,
    /// Agents retired as banned
    pub banned: u64,
    /// Agents retired as unverified
    pub unverified: u64,
    /// Writes that failed in transport after the retry
    pub transport_failures: u64,
    /// Intentions dropped before sending
    pub dropped: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: Option<&WriteOutcome>) {
        match outcome {
            None => self.dropped += 1,
            Some(WriteOutcome::Success) => self.successes += 1,
            Some(WriteOutcome::RateLimited { .. }) => self.rate_limited += 1,
            Some(WriteOutcome::Banned) => self.banned += 1,
            Some(WriteOutcome::Unverified) => self.unverified += 1,
            Some(WriteOutcome::TransportFailure(_)) => self.transport_failures += 1,
        }
    }
}

/// State shared by the scheduler and its write tasks
struct WriteContext {
    canvas: Arc<CanvasModel>,
    palette: Arc<Palette>,
    writer: Arc<dyn PixelWriter>,
    sessions: Arc<dyn SessionProvider>,
    interpreter: OutcomeInterpreter,
    write_timeout: Duration,
    verify_placement: bool,
    in_flight: Mutex<HashSet<Point>>,
    stats: Mutex<DispatchStats>,
}

impl WriteContext {
    /// One bounded remote call
    async fn attempt(&self, request: &WriteRequest) -> WriteOutcome {
        let write = self.writer.submit_write(request);
        let result = match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                after_ms: u64::try_from(self.write_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        WriteOutcome::classify(result)
    }

    async fn execute(
        self: Arc<Self>,
        agent: Arc<AgentSession>,
        intention: WriteIntention,
        tick_now: DateTime<Utc>,
        _permit: OwnedSemaphorePermit,
    ) -> WriteReport {
        let report = self.write_once(&agent, intention, tick_now).await;
        self.in_flight.lock().remove(&intention.point);
        self.stats.lock().record(report.outcome.as_ref());
        report
    }

    async fn write_once(
        &self,
        agent: &AgentSession,
        intention: WriteIntention,
        tick_now: DateTime<Utc>,
    ) -> WriteReport {
        let username = agent.username();
        let mut report = WriteReport {
            agent: username.to_string(),
            intention,
            outcome: None,
            attempts: 0,
        };

        let (tile_id, local) = match self.canvas.map_to_tile(intention.point) {
            Ok(mapped) => mapped,
            Err(e) => {
                tracing::error!(agent = %username, "Dropping write: {}", e);
                return report;
            }
        };
        let Some(color_index) = self.palette.index_of(intention.color) else {
            tracing::error!(
                agent = %username,
                point = %intention.point,
                "Dropping write: colour {} is not in the palette",
                intention.color
            );
            return report;
        };

        let request = WriteRequest::new(agent.identity(), tile_id, local, color_index);
        let mut outcome = self.attempt(&request).await;
        report.attempts = 1;

        let first = self.interpreter.interpret(&outcome, Utc::now().max(tick_now));
        if first.retry {
            tracing::warn!(agent = %username, outcome = %outcome, "Write failed, re-establishing session and retrying once");
            let refresh = self.sessions.reestablish(agent.identity());
            match tokio::time::timeout(self.write_timeout, refresh).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(agent = %username, "Session re-establishment failed: {}", e);
                }
                Err(_) => tracing::warn!(
                    agent = %username,
                    "Session re-establishment timed out after {:?}",
                    self.write_timeout
                ),
            }
            outcome = self.attempt(&request).await;
            report.attempts = 2;
        }

        let now = Utc::now().max(tick_now);
        let disposition = self.interpreter.interpret(&outcome, now);
        match disposition.cooldown {
            CooldownChange::Reset(at) => agent.reset_cooldown(at),
            CooldownChange::Advance(at) => {
                agent.set_cooldown(at);
            }
            CooldownChange::Keep => {}
        }
        if !disposition.liveness.is_live() {
            let abandoned = agent.retire(disposition.liveness);
            tracing::warn!(
                agent = %username,
                abandoned = abandoned.len(),
                "Agent retired: {:?}",
                disposition.liveness
            );
        }

        match &outcome {
            WriteOutcome::Success => {
                tracing::info!(
                    agent = %username,
                    tile = tile_id,
                    point = %intention.point,
                    next = %agent.cooldown(),
                    "Placed {}",
                    intention.color
                );
                if self.verify_placement {
                    self.verify(username, tile_id, local).await;
                }
            }
            WriteOutcome::RateLimited { .. } => {
                tracing::warn!(agent = %username, next = %agent.cooldown(), "Write {}", outcome);
            }
            WriteOutcome::Banned | WriteOutcome::Unverified => {
                tracing::warn!(agent = %username, "Write {}", outcome);
            }
            WriteOutcome::TransportFailure(_) => {
                tracing::warn!(agent = %username, "Write {} after retry, deferring", outcome);
            }
        }

        report.outcome = Some(outcome);
        report
    }

    /// Log when someone else owns the pixel we just placed
    async fn verify(&self, username: &str, tile_id: u32, local: Point) {
        let query = self.writer.placement_author(tile_id, local);
        let Ok(history) = tokio::time::timeout(self.write_timeout, query).await else {
            tracing::debug!(
                agent = %username,
                "Placement history timed out after {:?}",
                self.write_timeout
            );
            return;
        };
        match history {
            Ok(Some(author)) if author != username => {
                tracing::warn!(
                    agent = %username,
                    tile = tile_id,
                    author = %author,
                    "Pixel was not placed, or was placed somewhere else"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(agent = %username, "Placement history unavailable: {}", e),
        }
    }
}

/// Periodic dispatcher over a set of agents
pub struct Dispatcher {
    ctx: Arc<WriteContext>,
    agents: RwLock<Vec<Arc<AgentSession>>>,
    queue_capacity: usize,
    tick_interval: Duration,
    rotation: AtomicUsize,
    tasks: Mutex<JoinSet<WriteReport>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("agents", &self.agents.read().len())
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher with no agents
    #[must_use]
    pub fn new(
        canvas: Arc<CanvasModel>,
        palette: Arc<Palette>,
        writer: Arc<dyn PixelWriter>,
        interpreter: OutcomeInterpreter,
        config: &FleetConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(WriteContext {
                canvas,
                palette,
                writer,
                sessions: Arc::new(NoopSessions),
                interpreter,
                write_timeout: config.write_timeout(),
                verify_placement: config.verify_placement,
                in_flight: Mutex::new(HashSet::new()),
                stats: Mutex::new(DispatchStats::default()),
            }),
            agents: RwLock::new(Vec::new()),
            queue_capacity: config.queue_capacity,
            tick_interval: config.tick_interval(),
            rotation: AtomicUsize::new(0),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// With a session provider used to refresh sessions after transport failures
    ///
    /// Must be called before the first tick.
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionProvider>) -> Self {
        if let Some(ctx) = Arc::get_mut(&mut self.ctx) {
            ctx.sessions = sessions;
        } else {
            tracing::warn!("Session provider set after dispatch started; ignored");
        }
        self
    }

    /// Register an agent, eligible immediately
    ///
    /// Registering a username twice returns the existing session.
    pub fn add_agent(&self, identity: AgentIdentity) -> Arc<AgentSession> {
        let mut agents = self.agents.write();
        if let Some(existing) = agents.iter().find(|a| a.username() == identity.username) {
            tracing::warn!("Agent {} already registered", identity.username);
            return Arc::clone(existing);
        }
        let agent = Arc::new(AgentSession::new(identity, self.queue_capacity, Utc::now()));
        agents.push(Arc::clone(&agent));
        agent
    }

    /// Remove an agent; its queued work goes back to the diff
    pub fn remove_agent(&self, username: &str) -> Option<Arc<AgentSession>> {
        let mut agents = self.agents.write();
        let idx = agents.iter().position(|a| a.username() == username)?;
        let agent = agents.remove(idx);
        let abandoned = agent.queue().drain();
        tracing::info!("Removed agent {} ({} queued writes released)", username, abandoned.len());
        Some(agent)
    }

    /// All registered agents, live or not
    #[must_use]
    pub fn agents(&self) -> Vec<Arc<AgentSession>> {
        self.agents.read().clone()
    }

    /// Agent by username
    #[must_use]
    pub fn agent(&self, username: &str) -> Option<Arc<AgentSession>> {
        self.agents.read().iter().find(|a| a.username() == username).cloned()
    }

    /// Agents still eligible for work
    #[must_use]
    pub fn live_agents(&self) -> Vec<Arc<AgentSession>> {
        self.agents.read().iter().filter(|a| a.is_live()).cloned().collect()
    }

    /// Cumulative counters
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.ctx.stats.lock().clone()
    }

    /// Points with a write in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.ctx.in_flight.lock().len()
    }

    /// Run one scheduling pass at `now`
    ///
    /// Must be called within a tokio runtime; writes are spawned onto it.
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        self.reap_finished();
        self.ctx.stats.lock().ticks += 1;

        let diff = self.ctx.canvas.compute_diff();
        let live = self.live_agents();
        let mut report = TickReport {
            diff_size: diff.len(),
            live_agents: live.len(),
            ..TickReport::default()
        };

        for agent in &live {
            report.pruned += agent
                .queue()
                .retain(|i| diff.get(&i.point) == Some(&i.color));
        }

        if diff.is_empty() {
            return report;
        }
        if live.is_empty() {
            tracing::warn!("{} points differ but no live agents remain", diff.len());
            return report;
        }

        let mut claimed: HashSet<Point> = self.ctx.in_flight.lock().clone();
        for agent in &live {
            claimed.extend(agent.queue().points());
        }

        let layout = self.ctx.canvas.layout();
        let mut unclaimed = Vec::new();
        for (&point, &color) in &diff {
            if claimed.contains(&point) {
                continue;
            }
            if layout.contains(point) {
                unclaimed.push(WriteIntention::new(point, color));
            } else {
                report.out_of_bounds += 1;
            }
        }
        if report.out_of_bounds > 0 {
            tracing::debug!("{} diff points outside every tile", report.out_of_bounds);
        }

        let start = self.rotation.fetch_add(1, Ordering::Relaxed) % live.len();
        let mut order = live.clone();
        order.rotate_left(start);

        for (agent, mut share) in order.iter().zip(partition(unclaimed, order.len())) {
            if let Some(room) = agent.queue().remaining() {
                if share.len() > room {
                    report.deferred += share.len() - room;
                    share.truncate(room);
                }
            }
            let offered = share.len();
            match agent.enqueue(share) {
                Ok(added) => report.assigned += added,
                Err(e) => {
                    tracing::debug!(agent = %agent.username(), "Assignment refused: {}", e);
                    report.deferred += offered;
                }
            }
        }

        for agent in &live {
            if !agent.is_eligible(now) {
                report.cooling += 1;
                continue;
            }
            let Some(permit) = agent.try_begin_write() else {
                report.busy += 1;
                continue;
            };
            let Ok(intention) = agent.dequeue() else {
                report.idle += 1;
                continue;
            };
            self.ctx.in_flight.lock().insert(intention.point);
            let task = Arc::clone(&self.ctx).execute(Arc::clone(agent), intention, now, permit);
            self.tasks.lock().spawn(task);
            report.writes_issued += 1;
        }
        self.ctx.stats.lock().writes += report.writes_issued as u64;

        tracing::debug!(
            diff = report.diff_size,
            assigned = report.assigned,
            writes = report.writes_issued,
            cooling = report.cooling,
            "Tick complete"
        );
        report
    }

    /// Wait for every in-flight write
    pub async fn drain(&self) -> Vec<WriteReport> {
        let mut reports = Vec::new();
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                return reports;
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(report) => reports.push(report),
                    Err(e) => tracing::error!("Write task failed: {}", e),
                }
            }
        }
    }

    fn reap_finished(&self) {
        let mut tasks = self.tasks.lock();
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                tracing::error!("Write task failed: {}", e);
            }
        }
    }

    /// Tick until `shutdown` turns true or every agent is retired
    ///
    /// In-flight writes are drained before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> DispatchStats {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!("Dispatcher started with {} agents", self.agents.read().len());

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick(Utc::now());
                    if report.live_agents == 0 {
                        tracing::error!("Every agent has been retired, stopping");
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Dispatcher stopping, draining {} in-flight writes", self.in_flight());
        self.drain().await;
        let stats = self.stats();
        tracing::info!(
            ticks = stats.ticks,
            placed = stats.successes,
            rate_limited = stats.rate_limited,
            "Dispatcher stopped"
        );
        stats
    }

    /// Count of agents per liveness state
    #[must_use]
    pub fn liveness_counts(&self) -> (usize, usize, usize) {
        let agents = self.agents.read();
        let count = |state| agents.iter().filter(|a| a.liveness() == state).count();
        (
            count(Liveness::Live),
            count(Liveness::Banned),
            count(Liveness::Unverified),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_round_robin() {
        let shares = partition(0..7, 3);
        assert_eq!(shares, vec![vec![0, 3, 6], vec![1, 4], vec![2, 5]]);
    }

    #[test]
    fn test_partition_more_agents_than_items() {
        let shares = partition(["a", "b"], 4);
        assert_eq!(shares.len(), 4);
        assert_eq!(shares.iter().map(Vec::len).sum::<usize>(), 2);
        assert!(shares[2].is_empty() && shares[3].is_empty());
    }

    #[test]
    fn test_partition_no_agents() {
        assert!(partition(0..5, 0).is_empty());
    }

    #[test]
    fn test_stats_record() {
        let mut stats = DispatchStats::default();
        stats.record(Some(&WriteOutcome::Success));
        stats.record(Some(&WriteOutcome::Banned));
        stats.record(None);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.banned, 1);
        assert_eq!(stats.dropped, 1);
    }
}
