use serde::{Deserialize, Serialize};

/// Event time in milliseconds since epoch.
pub type EventTime = i64;

/// Unique identifier for checkpoint barriers.
pub type CheckpointId = u64;

/// Minimum possible event time. Used as the initial "no watermark yet" sentinel.
pub const EVENT_TIME_MIN: EventTime = i64::MIN;

/// Identity of one upstream input channel within a task.
///
/// Stable for the lifetime of the task; ordering follows the numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl ChannelId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel_{}", self.0)
    }
}

/// Watermark indicates that no elements with timestamp <= this value will arrive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    pub timestamp: EventTime,
}

impl Watermark {
    /// Create a new watermark at the given timestamp.
    pub fn new(timestamp: EventTime) -> Self {
        Self { timestamp }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Watermark({}ms)", self.timestamp)
    }
}

/// Activity status of a channel (or of the combined input).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatermarkStatus {
    Active,
    Idle,
}

impl WatermarkStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, WatermarkStatus::Active)
    }
}

/// How a checkpoint barrier is aligned across channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlignmentMode {
    /// Block each channel after its barrier until every channel presented it.
    Aligned,
    /// Capture in-flight bytes at the first barrier and never block.
    Unaligned,
}

/// Per-checkpoint behavior flags carried by every barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointOptions {
    pub alignment: AlignmentMode,
    /// At-least-once checkpoints only track barriers; channels are never blocked.
    pub at_least_once: bool,
}

impl CheckpointOptions {
    pub fn aligned() -> Self {
        Self {
            alignment: AlignmentMode::Aligned,
            at_least_once: false,
        }
    }

    pub fn unaligned() -> Self {
        Self {
            alignment: AlignmentMode::Unaligned,
            at_least_once: false,
        }
    }

    pub fn at_least_once() -> Self {
        Self {
            alignment: AlignmentMode::Aligned,
            at_least_once: true,
        }
    }

    pub fn is_unaligned(&self) -> bool {
        self.alignment == AlignmentMode::Unaligned
    }

    /// Whether a channel must stop delivering after presenting this barrier.
    pub fn blocks_channels(&self) -> bool {
        self.alignment == AlignmentMode::Aligned && !self.at_least_once
    }
}

impl Default for CheckpointOptions {
    fn default() -> Self {
        Self::aligned()
    }
}

/// Checkpoint barrier for Chandy-Lamport snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Barrier {
    pub checkpoint_id: CheckpointId,
    pub timestamp: EventTime,
    pub options: CheckpointOptions,
}

impl Barrier {
    /// Create an aligned checkpoint barrier with the given ID.
    pub fn new(checkpoint_id: CheckpointId) -> Self {
        Self {
            checkpoint_id,
            timestamp: 0,
            options: CheckpointOptions::aligned(),
        }
    }

    /// Create a checkpoint barrier with explicit timestamp and options.
    pub fn with_options(
        checkpoint_id: CheckpointId,
        timestamp: EventTime,
        options: CheckpointOptions,
    ) -> Self {
        Self {
            checkpoint_id,
            timestamp,
            options,
        }
    }
}

/// A fully reassembled data record: the exact payload bytes plus the value the
/// configured deserializer produced from them.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord<T> {
    pub payload: Vec<u8>,
    pub value: T,
}

/// The unit handed to the task's single-threaded processing logic.
#[derive(Debug, Clone, PartialEq)]
pub enum Element<T> {
    /// User data record.
    Record(StreamRecord<T>),
    /// Combined watermark; `channel` is the input that caused it to advance.
    Watermark {
        channel: ChannelId,
        watermark: Watermark,
    },
    /// Combined activity status change.
    StatusChange {
        channel: ChannelId,
        status: WatermarkStatus,
    },
    /// Checkpoint barrier, surfaced once every channel has aligned. Unaligned
    /// barriers surface at their first sighting.
    Barrier { channel: ChannelId, barrier: Barrier },
    /// A channel delivered its last element.
    EndOfChannel(ChannelId),
}

impl<T> Element<T> {
    pub fn is_record(&self) -> bool {
        matches!(self, Element::Record(_))
    }

    /// Return the record value, if this element is a record.
    pub fn into_record(self) -> Option<StreamRecord<T>> {
        match self {
            Element::Record(record) => Some(record),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_ordering_and_display() {
        let mut ids = vec![ChannelId::new(3), ChannelId::new(1), ChannelId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![ChannelId(1), ChannelId(2), ChannelId(3)]);
        assert_eq!(ChannelId::new(7).to_string(), "channel_7");
    }

    #[test]
    fn test_watermark_display() {
        assert_eq!(Watermark::new(42_000).to_string(), "Watermark(42000ms)");
    }

    #[test]
    fn test_checkpoint_options_blocking() {
        assert!(CheckpointOptions::aligned().blocks_channels());
        assert!(!CheckpointOptions::unaligned().blocks_channels());
        assert!(!CheckpointOptions::at_least_once().blocks_channels());
        assert!(CheckpointOptions::unaligned().is_unaligned());
        assert_eq!(CheckpointOptions::default(), CheckpointOptions::aligned());
    }

    #[test]
    fn test_barrier_new_defaults_to_aligned() {
        let barrier = Barrier::new(5);
        assert_eq!(barrier.checkpoint_id, 5);
        assert_eq!(barrier.timestamp, 0);
        assert_eq!(barrier.options, CheckpointOptions::aligned());
    }

    #[test]
    fn test_element_into_record() {
        let elem = Element::Record(StreamRecord {
            payload: vec![1, 2],
            value: 12i32,
        });
        assert!(elem.is_record());
        assert_eq!(elem.into_record().unwrap().value, 12);

        let elem = Element::<i32>::EndOfChannel(ChannelId(0));
        assert!(!elem.is_record());
        assert!(elem.into_record().is_none());
    }
}
