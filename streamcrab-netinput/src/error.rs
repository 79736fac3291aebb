//! Error taxonomy for the network input path.
//!
//! Reassembly and framing errors are fatal to the task: once a byte stream is
//! corrupted record boundaries cannot be recovered. Checkpoint-scoped errors only
//! fail the checkpoint they belong to.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChannelId, CheckpointId};

pub type Result<T> = std::result::Result<T, InputError>;

/// Why a checkpoint could not be completed at this task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointFailureReason {
    /// A later checkpoint's barrier arrived while an earlier one was aligning.
    BarrierOutOfOrder,
    /// Spill storage failed while capturing in-flight bytes.
    IoException,
    /// An upstream cancellation marker aborted the checkpoint.
    CanceledByMarker,
    /// A newer checkpoint already finished at this task.
    Subsumed,
    /// The input was closed before the checkpoint finished.
    TaskClosing,
}

impl std::fmt::Display for CheckpointFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CheckpointFailureReason::BarrierOutOfOrder => "BARRIER_OUT_OF_ORDER",
            CheckpointFailureReason::IoException => "IO_EXCEPTION",
            CheckpointFailureReason::CanceledByMarker => "CANCELED_BY_MARKER",
            CheckpointFailureReason::Subsumed => "SUBSUMED",
            CheckpointFailureReason::TaskClosing => "TASK_CLOSING",
        };
        f.write_str(name)
    }
}

/// A failed checkpoint, as reported to the task and to snapshot handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointFailure {
    pub checkpoint_id: CheckpointId,
    pub reason: CheckpointFailureReason,
    pub detail: String,
}

impl CheckpointFailure {
    pub fn new(
        checkpoint_id: CheckpointId,
        reason: CheckpointFailureReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            checkpoint_id,
            reason,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for CheckpointFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "checkpoint {} failed ({}): {}",
            self.checkpoint_id, self.reason, self.detail
        )
    }
}

impl std::error::Error for CheckpointFailure {}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("framing error on {channel}: {reason}")]
    Framing { channel: ChannelId, reason: String },

    #[error("failed to deserialize record on {channel}")]
    Deserialization {
        channel: ChannelId,
        #[source]
        source: anyhow::Error,
    },

    #[error("spill storage failure on {channel}")]
    SpillIo {
        channel: ChannelId,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointFailure),

    #[error("duplicate barrier {checkpoint_id} on {channel}")]
    DuplicateBarrier {
        channel: ChannelId,
        checkpoint_id: CheckpointId,
    },

    #[error("unknown input channel {0}")]
    UnknownChannel(ChannelId),

    #[error("network input is closed")]
    Closed,
}

impl InputError {
    pub(crate) fn framing(channel: ChannelId, reason: impl Into<String>) -> Self {
        InputError::Framing {
            channel,
            reason: reason.into(),
        }
    }

    /// Whether this error must fail the whole task rather than one checkpoint.
    pub fn is_task_fatal(&self) -> bool {
        !matches!(self, InputError::Checkpoint(_))
    }

    /// The checkpoint failure carried by a checkpoint-scoped error.
    pub fn checkpoint_failure(&self) -> Option<&CheckpointFailure> {
        match self {
            InputError::Checkpoint(failure) => Some(failure),
            _ => None,
        }
    }
}
