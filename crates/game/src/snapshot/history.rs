use std::collections::{HashMap, VecDeque};

use super::Snapshot;

/// Server-side per-peer record of sent snapshots, used to resolve acked
/// baselines. Bounded; once a sequence falls out, delta encoding against it
/// is no longer possible and the next snapshot for that peer degrades to a
/// keyframe.
#[derive(Debug)]
pub struct SnapshotHistory {
    entries: HashMap<u16, Snapshot>,
    order: VecDeque<u16>,
    capacity: usize,
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, snapshot: Snapshot) {
        let sequence = snapshot.sequence;
        if self.entries.insert(sequence, snapshot).is_none() {
            self.order.push_back(sequence);
        }

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    pub fn get(&self, sequence: u16) -> Option<&Snapshot> {
        self.entries.get(&sequence)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut history = SnapshotHistory::new(3);
        for seq in 1..=5u16 {
            history.insert(Snapshot::new(seq, seq as u32));
        }

        assert_eq!(history.len(), 3);
        assert!(history.get(1).is_none());
        assert!(history.get(2).is_none());
        assert!(history.get(3).is_some());
        assert!(history.get(5).is_some());
    }

    #[test]
    fn lookup_by_sequence() {
        let mut history = SnapshotHistory::new(8);
        history.insert(Snapshot::new(42, 1_000));
        assert_eq!(history.get(42).unwrap().timestamp_ms, 1_000);
        assert!(history.get(41).is_none());
    }
}
