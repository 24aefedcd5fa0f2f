//! Bounded buffer of work items waiting to be retried.
//!
//! Items carry only their original submission time; they are drained by
//! count when a later dispatch succeeds (at-least-once, not exactly-once).

use std::collections::VecDeque;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A work item that could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferedItem {
    pub submitted_at: SystemTime,
}

impl BufferedItem {
    pub fn now() -> Self {
        Self {
            submitted_at: SystemTime::now(),
        }
    }
}

/// What to do when the buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest item to make room.
    #[default]
    DropOldest,
    /// Refuse the incoming item.
    RejectNew,
}

/// Result of [`RetryBuffer::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Buffered,
    /// Buffered after evicting this item.
    DroppedOldest(BufferedItem),
    /// Not buffered; the buffer was full.
    Rejected,
}

/// FIFO retry buffer with a fixed capacity.
#[derive(Debug)]
pub struct RetryBuffer {
    items: VecDeque<BufferedItem>,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: u64,
}

impl RetryBuffer {
    /// Creates a buffer holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            policy,
            dropped: 0,
        }
    }

    /// Appends an item, applying the overflow policy when full.
    pub fn push(&mut self, item: BufferedItem) -> PushOutcome {
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            return PushOutcome::Buffered;
        }

        self.dropped += 1;
        match self.policy {
            OverflowPolicy::DropOldest => {
                let evicted = self.items.pop_front();
                self.items.push_back(item);
                match evicted {
                    Some(evicted) => PushOutcome::DroppedOldest(evicted),
                    None => PushOutcome::Buffered,
                }
            }
            OverflowPolicy::RejectNew => PushOutcome::Rejected,
        }
    }

    /// Removes and returns the oldest item.
    pub fn pop_oldest(&mut self) -> Option<BufferedItem> {
        self.items.pop_front()
    }

    /// Returns the number of waiting items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the maximum number of items held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn item_at(secs: u64) -> BufferedItem {
        BufferedItem {
            submitted_at: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut buffer = RetryBuffer::new(8, OverflowPolicy::DropOldest);
        for secs in 1..=3 {
            assert_eq!(buffer.push(item_at(secs)), PushOutcome::Buffered);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.pop_oldest(), Some(item_at(1)));
        assert_eq!(buffer.pop_oldest(), Some(item_at(2)));
        assert_eq!(buffer.pop_oldest(), Some(item_at(3)));
        assert_eq!(buffer.pop_oldest(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drop_oldest_on_overflow() {
        let mut buffer = RetryBuffer::new(2, OverflowPolicy::DropOldest);
        buffer.push(item_at(1));
        buffer.push(item_at(2));

        assert_eq!(buffer.push(item_at(3)), PushOutcome::DroppedOldest(item_at(1)));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.pop_oldest(), Some(item_at(2)));
        assert_eq!(buffer.pop_oldest(), Some(item_at(3)));
    }

    #[test]
    fn test_reject_new_on_overflow() {
        let mut buffer = RetryBuffer::new(2, OverflowPolicy::RejectNew);
        buffer.push(item_at(1));
        buffer.push(item_at(2));

        assert_eq!(buffer.push(item_at(3)), PushOutcome::Rejected);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.pop_oldest(), Some(item_at(1)));
    }

    #[test]
    fn test_zero_capacity_clamped_to_one() {
        let mut buffer = RetryBuffer::new(0, OverflowPolicy::RejectNew);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.push(item_at(1)), PushOutcome::Buffered);
        assert_eq!(buffer.push(item_at(2)), PushOutcome::Rejected);
    }

    #[test]
    fn test_policy_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: OverflowPolicy,
        }
        let parsed: Wrapper = toml::from_str("policy = \"reject_new\"").unwrap();
        assert_eq!(parsed.policy, OverflowPolicy::RejectNew);
        let parsed: Wrapper = toml::from_str("policy = \"drop_oldest\"").unwrap();
        assert_eq!(parsed.policy, OverflowPolicy::DropOldest);
    }
}
