//! Per-channel reassembly of length-prefixed frames, with spill-to-storage for
//! records too large to accumulate in memory.

use crate::config::NetworkInputConfig;
use crate::error::{InputError, Result};
use crate::network::frame::{FRAME_HEADER_BYTES, Frame, FrameType, decode_header};
use crate::types::ChannelId;
use ahash::AHashMap;
use anyhow::{Context, anyhow};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

mod reassembler;
mod spill;

pub use reassembler::*;
pub use spill::*;

#[cfg(test)]
#[path = "tests/spill_tests.rs"]
mod spill_tests;

#[cfg(test)]
#[path = "tests/reassembler_tests.rs"]
mod reassembler_tests;
