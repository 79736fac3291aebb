//! Task-local checkpoint handling: barrier alignment across input channels and the
//! in-flight channel state captured for a checkpoint.

use crate::error::{CheckpointFailure, CheckpointFailureReason, InputError, Result};
use crate::types::{Barrier, ChannelId, CheckpointId};
use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

mod aligner;
mod snapshot;

pub use aligner::*;
pub use snapshot::*;

#[cfg(test)]
#[path = "tests/aligner_tests.rs"]
mod aligner_tests;

#[cfg(test)]
#[path = "tests/snapshot_tests.rs"]
mod snapshot_tests;
