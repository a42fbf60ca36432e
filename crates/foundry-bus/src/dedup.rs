use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// Remembers recently seen message ids so handlers stay idempotent under
/// at-least-once delivery.
///
/// Bounded: once `capacity` ids are stored the oldest one is forgotten.
#[derive(Debug)]
pub struct Deduplicator {
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl Deduplicator {
    /// Creates a deduplicator remembering at most `capacity` ids (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records `id` and returns `true` if it had not been seen before.
    pub fn first_seen(&mut self, id: Uuid) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    /// Number of ids currently remembered.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_is_rejected() {
        let mut dedup = Deduplicator::new(8);
        let id = Uuid::new_v4();
        assert!(dedup.first_seen(id));
        assert!(!dedup.first_seen(id));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_oldest_is_forgotten_past_capacity() {
        let mut dedup = Deduplicator::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert!(dedup.first_seen(a));
        assert!(dedup.first_seen(b));
        assert!(dedup.first_seen(c));
        assert_eq!(dedup.len(), 2);
        // `a` was evicted, so it counts as new again.
        assert!(dedup.first_seen(a));
        assert!(!dedup.first_seen(c));
    }
}
