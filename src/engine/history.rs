//! Round History
//!
//! Bounded, append-only log of finished rounds, most recent first.

use std::collections::VecDeque;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::engine::state::RoundId;

/// Default number of rounds retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// A finished round. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Round number.
    pub round_id: RoundId,
    /// Where it crashed.
    pub crash_point: f64,
    /// When it crashed.
    pub ended_at: DateTime<Utc>,
}

/// Capped history, newest at the front.
#[derive(Clone, Debug)]
pub struct HistoryStore {
    records: VecDeque<HistoryRecord>,
    capacity: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryStore {
    /// Create a store keeping at most `capacity` records (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert at the head, evicting the oldest beyond capacity.
    pub fn append(&mut self, record: HistoryRecord) {
        self.records.push_front(record);
        self.records.truncate(self.capacity);
    }

    /// Records, most recent first.
    pub fn recent(&self) -> Vec<HistoryRecord> {
        self.records.iter().cloned().collect()
    }

    /// Most recent record.
    pub fn latest(&self) -> Option<&HistoryRecord> {
        self.records.front()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(id: u64) -> HistoryRecord {
        HistoryRecord {
            round_id: RoundId(id),
            crash_point: 1.0 + id as f64 / 100.0,
            ended_at: Utc::now(),
        }
    }

    #[test]
    fn test_most_recent_first() {
        let mut store = HistoryStore::new(3);
        for id in 1..=3 {
            store.append(record(id));
        }

        let ids: Vec<u64> = store.recent().iter().map(|r| r.round_id.0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(store.latest().map(|r| r.round_id), Some(RoundId(3)));
    }

    #[test]
    fn test_evicts_oldest() {
        let mut store = HistoryStore::new(2);
        for id in 1..=5 {
            store.append(record(id));
        }

        let ids: Vec<u64> = store.recent().iter().map(|r| r.round_id.0).collect();
        assert_eq!(ids, vec![5, 4]);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut store = HistoryStore::new(0);
        store.append(record(1));
        store.append(record(2));
        assert_eq!(store.len(), 1);
        assert_eq!(store.capacity(), 1);
    }

    #[test]
    fn test_default_capacity() {
        let store = HistoryStore::default();
        assert!(store.is_empty());
        assert_eq!(store.capacity(), DEFAULT_HISTORY_CAPACITY);
    }

    #[test]
    fn test_record_wire_format() {
        let json = serde_json::to_value(record(7)).unwrap();
        assert_eq!(json["round_id"], 7);
        assert!(json["crash_point"].is_f64());
        assert!(json["ended_at"].is_string());
    }

    proptest! {
        #[test]
        fn prop_bounded_and_ordered(capacity in 1usize..20, appends in 0u64..60) {
            let mut store = HistoryStore::new(capacity);
            for id in 0..appends {
                store.append(record(id));
            }

            let recent = store.recent();
            prop_assert!(recent.len() <= capacity);
            prop_assert!(recent.windows(2).all(|w| w[0].round_id > w[1].round_id));
        }
    }
}
