use super::*;

/// Per-channel bytes received but not yet consumed when a checkpoint was taken.
///
/// Replaying each channel's bytes followed by whatever that channel delivers
/// afterwards reproduces its original byte stream without gap or overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStateSnapshot {
    pub checkpoint_id: CheckpointId,
    pub channels: BTreeMap<ChannelId, Vec<u8>>,
}

impl ChannelStateSnapshot {
    pub fn new(checkpoint_id: CheckpointId, channels: BTreeMap<ChannelId, Vec<u8>>) -> Self {
        Self {
            checkpoint_id,
            channels,
        }
    }

    pub fn channel(&self, channel: ChannelId) -> Option<&[u8]> {
        self.channels.get(&channel).map(Vec::as_slice)
    }

    pub fn total_bytes(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }

    /// Serialized form handed to the checkpoint writer.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        bincode::serialize(self).context("serialize channel state snapshot failed")
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        bincode::deserialize(bytes).context("deserialize channel state snapshot failed")
    }
}

pub type SnapshotResult = std::result::Result<ChannelStateSnapshot, CheckpointFailure>;

/// Completion side of a [`SnapshotHandle`], kept by the input until the checkpoint
/// aligns or fails.
pub(crate) struct SnapshotCompleter {
    checkpoint_id: CheckpointId,
    tx: Sender<SnapshotResult>,
}

impl SnapshotCompleter {
    pub(crate) fn checkpoint_id(&self) -> CheckpointId {
        self.checkpoint_id
    }

    pub(crate) fn complete(self, snapshot: ChannelStateSnapshot) {
        // A dropped handle means nobody is waiting any more.
        let _ = self.tx.send(Ok(snapshot));
    }

    pub(crate) fn fail(self, failure: CheckpointFailure) {
        let _ = self.tx.send(Err(failure));
    }
}

/// Resolves to the channel state of one checkpoint once it aligned, or to the
/// reason it failed.
#[derive(Debug)]
pub struct SnapshotHandle {
    checkpoint_id: CheckpointId,
    rx: Receiver<SnapshotResult>,
    resolved: Option<SnapshotResult>,
}

pub(crate) fn snapshot_handle(checkpoint_id: CheckpointId) -> (SnapshotCompleter, SnapshotHandle) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (
        SnapshotCompleter { checkpoint_id, tx },
        SnapshotHandle {
            checkpoint_id,
            rx,
            resolved: None,
        },
    )
}

impl SnapshotHandle {
    pub fn checkpoint_id(&self) -> CheckpointId {
        self.checkpoint_id
    }

    /// The result, if it is already known. Returns `None` while still pending.
    pub fn try_result(&mut self) -> Option<SnapshotResult> {
        if self.resolved.is_none() {
            self.resolved = match self.rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(Err(self.abandoned())),
            };
        }
        self.resolved.clone()
    }

    pub fn is_resolved(&mut self) -> bool {
        self.try_result().is_some()
    }

    /// Block until the checkpoint resolves.
    pub fn wait(mut self) -> SnapshotResult {
        if let Some(result) = self.resolved.take() {
            return result;
        }
        self.rx.recv().unwrap_or_else(|_| Err(self.abandoned()))
    }

    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<SnapshotResult> {
        if self.resolved.is_none() {
            self.resolved = match self.rx.recv_timeout(timeout) {
                Ok(result) => Some(result),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(Err(self.abandoned())),
            };
        }
        self.resolved.clone()
    }

    fn abandoned(&self) -> CheckpointFailure {
        CheckpointFailure::new(
            self.checkpoint_id,
            CheckpointFailureReason::TaskClosing,
            "network input dropped before the checkpoint resolved",
        )
    }
}
