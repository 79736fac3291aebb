//! Per-channel chunk queues between the transport and the consumer thread.
//!
//! Uses crossbeam-channel for bounded, backpressure-aware FIFO hand-off. This is
//! the only point where transport threads and the task thread meet: every byte a
//! reassembler sees has crossed one of these queues first.

use ahash::AHashMap;
use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

use crate::types::ChannelId;

/// Raw bytes delivered by the transport for one channel, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    /// The transport will deliver nothing more on this channel.
    pub is_last: bool,
}

/// Outcome of a non-blocking receive.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkRecv {
    Chunk(Chunk),
    Empty,
    /// Every sender was dropped without a final chunk.
    Disconnected,
}

/// Transport-side handle of one channel queue.
#[derive(Clone)]
pub struct InputChannelSender {
    channel: ChannelId,
    sender: Sender<Chunk>,
}

impl InputChannelSender {
    pub fn channel_id(&self) -> ChannelId {
        self.channel
    }

    /// Push a chunk. Blocks while the queue is full (backpressure).
    pub fn push_chunk(&self, bytes: Vec<u8>, is_last: bool) -> Result<()> {
        self.sender
            .send(Chunk { bytes, is_last })
            .map_err(|_| anyhow!("{} closed: receiver dropped", self.channel))
    }

    /// Push a chunk from async code. While the queue is full the task yields to the
    /// runtime instead of blocking its worker thread.
    pub async fn send_chunk(&self, bytes: Vec<u8>, is_last: bool) -> Result<()> {
        let mut chunk = Chunk { bytes, is_last };
        loop {
            match self.sender.try_send(chunk) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(rejected)) => {
                    chunk = rejected;
                    tokio::task::yield_now().await;
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(anyhow!("{} closed: receiver dropped", self.channel));
                }
            }
        }
    }

    /// Try to push without blocking.
    ///
    /// Returns error if the queue is full or closed.
    pub fn try_push_chunk(&self, bytes: Vec<u8>, is_last: bool) -> Result<()> {
        self.sender
            .try_send(Chunk { bytes, is_last })
            .map_err(|e| anyhow!("failed to push chunk on {}: {:?}", self.channel, e))
    }
}

/// Consumer-side handle of one channel queue.
pub struct InputChannelReceiver {
    channel: ChannelId,
    pub(crate) receiver: Receiver<Chunk>,
}

impl InputChannelReceiver {
    pub fn channel_id(&self) -> ChannelId {
        self.channel
    }

    /// Receive the next chunk, blocking until one is available.
    pub fn recv(&self) -> Result<Chunk> {
        self.receiver
            .recv()
            .map_err(|_| anyhow!("{} closed: sender dropped", self.channel))
    }

    pub fn try_recv(&self) -> ChunkRecv {
        match self.receiver.try_recv() {
            Ok(chunk) => ChunkRecv::Chunk(chunk),
            Err(TryRecvError::Empty) => ChunkRecv::Empty,
            Err(TryRecvError::Disconnected) => ChunkRecv::Disconnected,
        }
    }

    /// Number of chunks queued but not yet taken by the consumer.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }
}

/// Create a bounded chunk queue for one channel.
pub fn input_channel(
    channel: ChannelId,
    capacity: usize,
) -> (InputChannelSender, InputChannelReceiver) {
    let (sender, receiver) = bounded(capacity);
    (
        InputChannelSender { channel, sender },
        InputChannelReceiver { channel, receiver },
    )
}

/// Create queues for channels `0..num_channels`.
pub fn input_channels(
    num_channels: u32,
    capacity: usize,
) -> (Vec<InputChannelSender>, Vec<InputChannelReceiver>) {
    (0..num_channels)
        .map(|id| input_channel(ChannelId::new(id), capacity))
        .unzip()
}

/// Routes transport deliveries addressed by channel id to the right queue.
#[derive(Clone, Default)]
pub struct ChunkRouter {
    senders: AHashMap<ChannelId, InputChannelSender>,
}

impl ChunkRouter {
    pub fn new(senders: impl IntoIterator<Item = InputChannelSender>) -> Self {
        Self {
            senders: senders
                .into_iter()
                .map(|sender| (sender.channel_id(), sender))
                .collect(),
        }
    }

    pub fn push_chunk(&self, channel: ChannelId, bytes: Vec<u8>, is_last: bool) -> Result<()> {
        self.senders
            .get(&channel)
            .ok_or_else(|| anyhow!("unknown input channel {}", channel))?
            .push_chunk(bytes, is_last)
    }

    pub fn channel_count(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
