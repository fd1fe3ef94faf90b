//! Priority-ordered queue of pending linker jobs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry: highest priority first, then earliest enqueue.
#[derive(Debug, Clone)]
struct Entry {
    priority: f64,
    seq: u64,
    linker_id: String,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.total_cmp(&other.priority) {
            // Lower sequence number was enqueued first and wins the tie.
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Max-priority queue of linker ids.
#[derive(Debug, Default)]
pub struct JobQueue {
    heap: BinaryHeap<Entry>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, linker_id: String, priority: f64, seq: u64) {
        self.heap.push(Entry {
            priority,
            seq,
            linker_id,
        });
    }

    /// Remove and return the highest-priority linker id.
    pub fn pop(&mut self) -> Option<String> {
        self.heap.pop().map(|entry| entry.linker_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_descending_priority() {
        let mut queue = JobQueue::new();
        queue.push("A".into(), 1.0, 0);
        queue.push("B".into(), 3.0, 1);
        queue.push("C".into(), 2.0, 2);

        assert_eq!(queue.pop().as_deref(), Some("B"));
        assert_eq!(queue.pop().as_deref(), Some("C"));
        assert_eq!(queue.pop().as_deref(), Some("A"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn ties_break_by_enqueue_order() {
        let mut queue = JobQueue::new();
        queue.push("first".into(), 0.5, 4);
        queue.push("second".into(), 0.5, 5);
        queue.push("third".into(), 0.5, 6);

        assert_eq!(queue.pop().as_deref(), Some("first"));
        assert_eq!(queue.pop().as_deref(), Some("second"));
        assert_eq!(queue.pop().as_deref(), Some("third"));
    }

    #[test]
    fn nan_priority_does_not_poison_ordering() {
        let mut queue = JobQueue::new();
        queue.push("low".into(), -1.0, 0);
        queue.push("nan".into(), f64::NAN, 1);
        queue.push("high".into(), 10.0, 2);

        // total_cmp puts positive NaN above every number.
        assert_eq!(queue.pop().as_deref(), Some("nan"));
        assert_eq!(queue.pop().as_deref(), Some("high"));
        assert_eq!(queue.pop().as_deref(), Some("low"));
    }

    #[test]
    fn len_tracks_contents() {
        let mut queue = JobQueue::new();
        assert!(queue.is_empty());
        queue.push("x".into(), 0.0, 0);
        queue.push("y".into(), 0.0, 1);
        assert_eq!(queue.len(), 2);
        queue.pop();
        assert_eq!(queue.len(), 1);
    }
}
