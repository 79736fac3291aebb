//! Cross-channel event-time progress: per-channel watermarks and activity status
//! folded into one combined watermark.

use crate::types::{EVENT_TIME_MIN, EventTime, Watermark, WatermarkStatus};

mod valve;

pub use valve::*;

#[cfg(test)]
#[path = "tests/valve_tests.rs"]
mod tests;
