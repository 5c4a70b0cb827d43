//! Pending write queue
//!
//! Bounded FIFO of write intentions owned by one agent. Enqueueing never
//! overwrites: a batch that does not fit is rejected whole, and the
//! scheduler sizes batches with [`PendingQueue::remaining`]. A capacity of
//! zero means the queue grows on demand.
//!
//! Each point is held at most once; re-enqueueing a queued point updates its
//! colour in place and keeps its position.

use crate::error::QueueError;
use mural_canvas::{Color, Point};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// One pending write: paint `point` with `color`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteIntention {
    /// Global point
    pub point: Point,
    /// Desired colour
    pub color: Color,
}

impl WriteIntention {
    /// Create new intention
    #[inline]
    #[must_use]
    pub const fn new(point: Point, color: Color) -> Self {
        Self { point, color }
    }
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<WriteIntention>,
    points: HashSet<Point>,
}

/// Thread-safe bounded FIFO of write intentions
#[derive(Debug)]
pub struct PendingQueue {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl PendingQueue {
    /// Create a queue; `capacity == 0` means growable
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append a batch
    ///
    /// Returns the number of new entries (updates of queued points are not
    /// counted).
    ///
    /// # Errors
    /// `QueueError::Full` if the new entries exceed the remaining capacity;
    /// the queue is left untouched
    pub fn enqueue(
        &self,
        batch: impl IntoIterator<Item = WriteIntention>,
    ) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock();

        let mut fresh: Vec<WriteIntention> = Vec::new();
        let mut updates: Vec<WriteIntention> = Vec::new();
        let mut seen: HashSet<Point> = HashSet::new();
        for intention in batch {
            if !seen.insert(intention.point) || inner.points.contains(&intention.point) {
                updates.push(intention);
            } else {
                fresh.push(intention);
            }
        }

        if self.capacity > 0 && inner.items.len() + fresh.len() > self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }

        let added = fresh.len();
        for intention in fresh {
            inner.points.insert(intention.point);
            inner.items.push_back(intention);
        }
        for update in updates {
            if let Some(slot) = inner.items.iter_mut().find(|i| i.point == update.point) {
                slot.color = update.color;
            }
        }

        Ok(added)
    }

    /// Remove the oldest intention
    ///
    /// # Errors
    /// `QueueError::Empty` if nothing is pending
    pub fn dequeue(&self) -> Result<WriteIntention, QueueError> {
        let mut inner = self.inner.lock();
        let intention = inner.items.pop_front().ok_or(QueueError::Empty)?;
        inner.points.remove(&intention.point);
        Ok(intention)
    }

    /// Keep only intentions matching `keep`; returns how many were dropped
    pub fn retain(&self, mut keep: impl FnMut(&WriteIntention) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.items.len();
        let Inner { items, points } = &mut *inner;
        items.retain(|i| {
            let kept = keep(i);
            if !kept {
                points.remove(&i.point);
            }
            kept
        });
        before - items.len()
    }

    /// Remove and return everything pending
    pub fn drain(&self) -> Vec<WriteIntention> {
        let mut inner = self.inner.lock();
        inner.points.clear();
        inner.items.drain(..).collect()
    }

    /// Whether `point` is queued
    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        self.inner.lock().points.contains(&point)
    }

    /// Queued points, oldest first
    #[must_use]
    pub fn points(&self) -> Vec<Point> {
        self.inner.lock().items.iter().map(|i| i.point).collect()
    }

    /// Free slots, or `None` for a growable queue
    #[must_use]
    pub fn remaining(&self) -> Option<usize> {
        if self.capacity == 0 {
            return None;
        }
        Some(self.capacity.saturating_sub(self.inner.lock().items.len()))
    }

    /// Configured capacity (0 = growable)
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pending intentions
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wi(x: i32, y: i32) -> WriteIntention {
        WriteIntention::new(Point::new(x, y), Color::new(0, 0, 0))
    }

    #[test]
    fn queue_is_fifo() {
        let queue = PendingQueue::new(0);
        queue.enqueue([wi(0, 0), wi(1, 0), wi(2, 0)]).unwrap();
        assert_eq!(queue.dequeue().unwrap().point, Point::new(0, 0));
        assert_eq!(queue.dequeue().unwrap().point, Point::new(1, 0));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queue_dequeue_empty_fails_fast() {
        let queue = PendingQueue::new(4);
        assert_eq!(queue.dequeue(), Err(QueueError::Empty));
    }

    #[test]
    fn queue_bounded_rejects_overflow_whole() {
        let queue = PendingQueue::new(2);
        queue.enqueue([wi(0, 0)]).unwrap();
        assert_eq!(
            queue.enqueue([wi(1, 0), wi(2, 0)]),
            Err(QueueError::Full { capacity: 2 })
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.remaining(), Some(1));
        assert_eq!(queue.enqueue([wi(1, 0)]), Ok(1));
        assert_eq!(queue.remaining(), Some(0));
    }

    #[test]
    fn queue_growable_has_no_limit() {
        let queue = PendingQueue::new(0);
        queue.enqueue((0..1000).map(|x| wi(x, 0))).unwrap();
        assert_eq!(queue.len(), 1000);
        assert_eq!(queue.remaining(), None);
    }

    #[test]
    fn queue_duplicate_point_updates_in_place() {
        let queue = PendingQueue::new(2);
        queue.enqueue([wi(0, 0), wi(1, 0)]).unwrap();

        let recolor = WriteIntention::new(Point::new(0, 0), Color::new(9, 9, 9));
        assert_eq!(queue.enqueue([recolor]), Ok(0));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().unwrap(), recolor);
    }

    #[test]
    fn queue_retain_drops_stale() {
        let queue = PendingQueue::new(0);
        queue.enqueue([wi(0, 0), wi(1, 0), wi(2, 0)]).unwrap();
        let dropped = queue.retain(|i| i.point.x != 1);
        assert_eq!(dropped, 1);
        assert!(!queue.contains(Point::new(1, 0)));
        assert_eq!(queue.points(), vec![Point::new(0, 0), Point::new(2, 0)]);
    }

    #[test]
    fn queue_drain_empties() {
        let queue = PendingQueue::new(0);
        queue.enqueue([wi(0, 0), wi(1, 0)]).unwrap();
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
        assert!(!queue.contains(Point::new(0, 0)));
    }
}
