//! Tuning knobs for the network input path.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::network::frame::MAX_CONTROL_BODY_BYTES;

/// Partial records above this size are moved to spill storage.
pub const DEFAULT_SPILL_THRESHOLD_BYTES: usize = 5 * 1024 * 1024;

/// Declared frame lengths above this are treated as corruption.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// Default chunk-queue capacity per channel (bounded for backpressure).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default read size of the async transport pump.
pub const DEFAULT_READ_CHUNK_BYTES: usize = 32 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkInputConfig {
    /// Most bytes of a partial record kept in memory between polls. The check runs
    /// after each chunk is appended, so one chunk may overshoot it until the next
    /// decode moves the bytes to spill storage.
    pub spill_threshold_bytes: usize,
    pub max_frame_bytes: usize,
    pub channel_capacity: usize,
    pub read_chunk_bytes: usize,
}

impl Default for NetworkInputConfig {
    fn default() -> Self {
        Self {
            spill_threshold_bytes: DEFAULT_SPILL_THRESHOLD_BYTES,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
        }
    }
}

impl NetworkInputConfig {
    pub fn with_spill_threshold_bytes(mut self, bytes: usize) -> Self {
        self.spill_threshold_bytes = bytes;
        self
    }

    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_read_chunk_bytes(mut self, bytes: usize) -> Self {
        self.read_chunk_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.spill_threshold_bytes == 0 {
            bail!("spill_threshold_bytes must be positive");
        }
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be positive");
        }
        if self.read_chunk_bytes == 0 {
            bail!("read_chunk_bytes must be positive");
        }
        if self.max_frame_bytes < MAX_CONTROL_BODY_BYTES {
            bail!(
                "max_frame_bytes {} is smaller than a control marker ({} bytes)",
                self.max_frame_bytes,
                MAX_CONTROL_BODY_BYTES
            );
        }
        Ok(())
    }
}
