//! Buffer module for holding readings until the collector acknowledges them.
//!
//! The buffer is a bounded FIFO. When it is full a push evicts the single
//! oldest reading, so the newest data is always kept. Readings leave the
//! buffer only through [`LocalBuffer::evict_prefix`] after a successful
//! delivery, or through that overflow policy.

use std::collections::VecDeque;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::reading::Reading;
use crate::storage::RecordStore;

/// Statistics about buffer operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Total number of readings pushed
    pub readings_received: u64,

    /// Total number of readings removed after acknowledgment
    pub readings_delivered: u64,

    /// Total number of readings dropped due to buffer overflow
    pub readings_dropped: u64,

    /// Number of readings restored from persistent storage at startup
    pub readings_recovered: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    reading: Reading,
}

/// Read-only view of the oldest buffered readings, selected for one send.
///
/// The batch id is generated once per view, so every retry of the same
/// batch carries the same id.
#[derive(Debug, Clone)]
pub struct DeliveryBatch<'a> {
    readings: Vec<&'a Reading>,
    batch_id: Uuid,
}

impl<'a> DeliveryBatch<'a> {
    pub fn readings(&self) -> &[&'a Reading] {
        &self.readings
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Bounded, ordered store of readings awaiting delivery.
pub struct LocalBuffer {
    entries: VecDeque<Entry>,
    capacity: usize,
    next_seq: u64,
    store: Option<RecordStore>,
    stats: BufferStats,
}

impl LocalBuffer {
    /// Create a RAM-only buffer holding at most `capacity` readings.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_seq: 0,
            store: None,
            stats: BufferStats::default(),
        }
    }

    /// Create a buffer mirrored into `store`, restoring whatever survived
    /// in it. A store that cannot be read leaves the buffer empty but still
    /// persisting new readings.
    pub fn with_store(mut store: RecordStore) -> Self {
        let mut buffer = Self::new(store.capacity());

        match store.recover() {
            Ok(recovered) => {
                for stored in recovered {
                    buffer.next_seq = stored.seq + 1;
                    buffer.entries.push_back(Entry {
                        seq: stored.seq,
                        reading: stored.reading,
                    });
                }
                buffer.stats.readings_recovered = buffer.entries.len() as u64;
            }
            Err(e) => {
                warn!(error = %e, "Failed to recover buffered readings, starting empty");
            }
        }

        buffer.store = Some(store);
        buffer
    }

    /// Append a reading, evicting the oldest one if the buffer is full.
    pub fn push(&mut self, reading: Reading) {
        self.stats.readings_received += 1;

        if self.entries.len() >= self.capacity {
            if let Some(dropped) = self.entries.pop_front() {
                warn!(
                    capacity = self.capacity,
                    dropped_timestamp = dropped.reading.timestamp_ms,
                    "Buffer full: dropping oldest reading"
                );
                self.stats.readings_dropped += 1;
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        // The new record lands in the slot of the entry just dropped, if any
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.store(seq, &reading) {
                warn!(seq = seq, error = %e, "Failed to persist reading");
            }
        }

        self.entries.push_back(Entry { seq, reading });
        debug!(buffered = self.entries.len(), "Reading buffered");
    }

    /// Borrow up to `max_n` of the oldest readings. Does not modify the buffer.
    pub fn peek_batch(&self, max_n: usize) -> DeliveryBatch<'_> {
        DeliveryBatch {
            readings: self
                .entries
                .iter()
                .take(max_n)
                .map(|entry| &entry.reading)
                .collect(),
            batch_id: Uuid::new_v4(),
        }
    }

    /// Remove the first `n` readings (clamped to the current length).
    ///
    /// Returns how many readings were removed.
    pub fn evict_prefix(&mut self, n: usize) -> usize {
        let n = n.min(self.entries.len());

        for entry in self.entries.drain(..n) {
            if let Some(store) = self.store.as_mut() {
                if let Err(e) = store.remove(entry.seq) {
                    warn!(seq = entry.seq, error = %e, "Failed to erase persisted reading");
                }
            }
        }

        self.stats.readings_delivered += n as u64;
        n
    }

    /// Iterate over buffered readings, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.entries.iter().map(|entry| &entry.reading)
    }

    /// Get the current number of readings in the buffer.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Get current buffer statistics.
    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertFlags;
    use crate::testing::MemoryStorage;
    use proptest::prelude::*;

    fn create_test_reading(ts: u64) -> Reading {
        Reading::new(ts, 20.0 + ts as f32 / 10.0, 50.0, AlertFlags::default())
    }

    fn timestamps(buffer: &LocalBuffer) -> Vec<u64> {
        buffer.iter().map(|r| r.timestamp_ms).collect()
    }

    #[test]
    fn test_buffer_creation() {
        let buffer = LocalBuffer::new(10);
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), 10);
        assert!(!buffer.is_persistent());
    }

    #[test]
    fn test_push_preserves_order() {
        let mut buffer = LocalBuffer::new(5);
        for ts in 1..=3 {
            buffer.push(create_test_reading(ts));
        }
        assert_eq!(timestamps(&buffer), vec![1, 2, 3]);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let capacity = 4;
        let mut buffer = LocalBuffer::new(capacity);
        for ts in 1..=(capacity as u64 + 1) {
            buffer.push(create_test_reading(ts));
        }

        assert_eq!(buffer.len(), capacity);
        assert_eq!(timestamps(&buffer), vec![2, 3, 4, 5]);
        assert_eq!(buffer.stats().readings_dropped, 1);
        assert_eq!(buffer.stats().readings_received, 5);
    }

    #[test]
    fn test_peek_batch_is_read_only() {
        let mut buffer = LocalBuffer::new(10);
        for ts in 1..=5 {
            buffer.push(create_test_reading(ts));
        }

        let first: Vec<u64> = buffer.peek_batch(3).readings().iter().map(|r| r.timestamp_ms).collect();
        let second: Vec<u64> = buffer.peek_batch(3).readings().iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(first, second);
        assert_eq!(buffer.len(), 5);

        assert_eq!(buffer.peek_batch(100).len(), 5);
        assert!(LocalBuffer::new(3).peek_batch(3).is_empty());
    }

    #[test]
    fn test_evict_prefix_removes_exactly_n() {
        let mut buffer = LocalBuffer::new(10);
        for ts in 1..=5 {
            buffer.push(create_test_reading(ts));
        }

        assert_eq!(buffer.evict_prefix(2), 2);
        assert_eq!(timestamps(&buffer), vec![3, 4, 5]);
        assert_eq!(buffer.stats().readings_delivered, 2);
    }

    #[test]
    fn test_evict_prefix_clamps() {
        let mut buffer = LocalBuffer::new(10);
        buffer.push(create_test_reading(1));

        assert_eq!(buffer.evict_prefix(7), 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.evict_prefix(1), 0);
        assert_eq!(buffer.stats().readings_delivered, 1);
    }

    #[test]
    fn test_persistent_buffer_recovers_order() {
        let storage = MemoryStorage::new(3);
        let records = storage.shared();

        {
            let store = RecordStore::new(Box::new(storage), 3).unwrap();
            let mut buffer = LocalBuffer::with_store(store);
            for ts in 1..=4 {
                buffer.push(create_test_reading(ts));
            }
            assert_eq!(buffer.evict_prefix(1), 1);
            assert_eq!(timestamps(&buffer), vec![3, 4]);
        }

        let store = RecordStore::new(Box::new(MemoryStorage::from_shared(records)), 3).unwrap();
        let mut buffer = LocalBuffer::with_store(store);
        assert!(buffer.is_persistent());
        assert_eq!(timestamps(&buffer), vec![3, 4]);
        assert_eq!(buffer.stats().readings_recovered, 2);

        // Sequence numbering continues after the recovered records
        buffer.push(create_test_reading(5));
        buffer.push(create_test_reading(6));
        assert_eq!(timestamps(&buffer), vec![4, 5, 6]);
    }

    proptest! {
        #[test]
        fn prop_length_never_exceeds_capacity(
            capacity in 1usize..32,
            ops in proptest::collection::vec(0usize..40, 0..200),
        ) {
            let mut buffer = LocalBuffer::new(capacity);
            let mut ts = 0u64;
            for op in ops {
                // Small values evict, the rest push
                if op < 4 {
                    let before = buffer.len();
                    let removed = buffer.evict_prefix(op);
                    prop_assert_eq!(removed, op.min(before));
                } else {
                    ts += 1;
                    buffer.push(create_test_reading(ts));
                    prop_assert_eq!(buffer.iter().last().map(|r| r.timestamp_ms), Some(ts));
                }
                prop_assert!(buffer.len() <= capacity);
            }
        }
    }
}
