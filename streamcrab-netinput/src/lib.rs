//! # StreamCrab Network Input
//!
//! The network-facing input path of a StreamCrab task: byte chunks arriving on
//! several input channels become one ordered element sequence, with event-time
//! progress and checkpoint barriers synchronized across channels.
//!
//! - [`types`]: Channel ids, [`Element`](types::Element), [`Watermark`](types::Watermark),
//!   [`Barrier`](types::Barrier) and checkpoint options.
//! - [`network`]: Frame codec, per-channel chunk queues and the async transport pump.
//! - [`reassembly`]: [`ChannelReassembler`](reassembly::ChannelReassembler) and spill
//!   storage backends.
//! - [`time`]: [`StatusWatermarkValve`](time::StatusWatermarkValve).
//! - [`checkpoint`]: [`CheckpointAligner`](checkpoint::CheckpointAligner) and
//!   channel state snapshots.
//! - [`input`]: [`NetworkInput`](input::NetworkInput), the pull-based orchestrator.

pub mod checkpoint;
pub mod config;
pub mod deserializer;
pub mod error;
pub mod input;
pub mod network;
pub mod reassembly;
pub mod time;
pub mod types;

pub use config::NetworkInputConfig;
pub use error::{CheckpointFailure, CheckpointFailureReason, InputError};
pub use input::{InputPoll, NetworkInput};
