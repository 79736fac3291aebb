use super::*;

/// Finished checkpoints remembered for [`CheckpointAligner::phase`].
const MAX_RETAINED_PHASES: usize = 16;

/// Where a checkpoint stands at this task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPhase {
    WaitingForFirstBarrier,
    Aligning,
    Aligned,
    SnapshotRequested,
    Complete,
    Failed(CheckpointFailureReason),
}

/// A checkpoint whose barrier has been seen on every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedAlignment {
    pub barrier: Barrier,
    /// Bytes captured at the first barrier of an unaligned checkpoint. Empty in
    /// aligned and at-least-once mode.
    pub in_flight: BTreeMap<ChannelId, Vec<u8>>,
    /// The alignment finished on the same barrier that started it.
    pub on_first_barrier: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignmentProgress {
    /// Belongs to a finished, canceled or superseded checkpoint.
    Ignored,
    /// First barrier of a checkpoint; other channels still owe theirs.
    Started(Barrier),
    Pending,
    Aligned(CompletedAlignment),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierOutcome {
    /// Checkpoints this barrier caused to fail, oldest first.
    pub failed: Vec<CheckpointFailure>,
    pub progress: AlignmentProgress,
}

impl BarrierOutcome {
    fn ignored() -> Self {
        Self {
            failed: Vec::new(),
            progress: AlignmentProgress::Ignored,
        }
    }
}

struct PendingCheckpoint {
    barrier: Barrier,
    received: Vec<bool>,
    in_flight: BTreeMap<ChannelId, Vec<u8>>,
}

/// Barrier alignment state for one task's input channels.
///
/// At most one checkpoint aligns at a time. A barrier of a newer checkpoint fails
/// the aligning one with `BARRIER_OUT_OF_ORDER`, unblocks every channel and then
/// starts the newer checkpoint, so no channel stays blocked forever. Barriers of
/// checkpoints at or below the last finished one are ignored.
///
/// Channels are addressed by slot, the index into the channel list passed to
/// [`CheckpointAligner::new`]. An ended channel counts as having delivered every
/// barrier.
pub struct CheckpointAligner {
    channels: Vec<ChannelId>,
    ended: Vec<bool>,
    blocked: Vec<bool>,
    pending: Option<PendingCheckpoint>,
    last_cleared_checkpoint_id: Option<CheckpointId>,
    phases: VecDeque<(CheckpointId, CheckpointPhase)>,
}

impl CheckpointAligner {
    pub fn new(channels: Vec<ChannelId>) -> Self {
        let num_channels = channels.len();
        Self {
            channels,
            ended: vec![false; num_channels],
            blocked: vec![false; num_channels],
            pending: None,
            last_cleared_checkpoint_id: None,
            phases: VecDeque::new(),
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Process a barrier read from `slot`.
    ///
    /// `capture` is invoked once, when an unaligned checkpoint starts, and must
    /// return every channel's unconsumed bytes at that moment. A capture failure
    /// fails the checkpoint with `IO_EXCEPTION`.
    pub fn on_barrier<F>(
        &mut self,
        slot: usize,
        barrier: Barrier,
        capture: F,
    ) -> Result<BarrierOutcome>
    where
        F: FnOnce() -> anyhow::Result<BTreeMap<ChannelId, Vec<u8>>>,
    {
        let channel = self.channel(slot)?;
        let checkpoint_id = barrier.checkpoint_id;
        if self.is_cleared(checkpoint_id) {
            tracing::debug!(%channel, checkpoint_id, "ignoring barrier of finished checkpoint");
            return Ok(BarrierOutcome::ignored());
        }

        let mut failed = Vec::new();
        if let Some(current) = self.current_checkpoint() {
            if checkpoint_id < current {
                tracing::debug!(
                    %channel,
                    checkpoint_id,
                    current,
                    "ignoring barrier older than the aligning checkpoint"
                );
                return Ok(BarrierOutcome::ignored());
            }
            if checkpoint_id > current {
                let detail = format!(
                    "barrier {checkpoint_id} arrived on {channel} \
                     while checkpoint {current} was aligning"
                );
                failed.extend(
                    self.fail_pending(CheckpointFailureReason::BarrierOutOfOrder, detail),
                );
            }
        }

        let started = self.pending.is_none();
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => match self.start(channel, barrier, capture) {
                Ok(pending) => pending,
                Err(failure) => {
                    failed.push(failure);
                    return Ok(BarrierOutcome {
                        failed,
                        progress: AlignmentProgress::Ignored,
                    });
                }
            },
        };

        if pending.received[slot] {
            self.pending = Some(pending);
            return Err(InputError::DuplicateBarrier {
                channel,
                checkpoint_id,
            });
        }
        pending.received[slot] = true;
        if pending.barrier.options.blocks_channels() {
            self.blocked[slot] = true;
        }

        let progress = if pending.received.iter().all(|received| *received) {
            self.complete(pending, started)
        } else {
            self.pending = Some(pending);
            if started {
                AlignmentProgress::Started(barrier)
            } else {
                AlignmentProgress::Pending
            }
        };
        Ok(BarrierOutcome { failed, progress })
    }

    fn start<F>(
        &mut self,
        channel: ChannelId,
        barrier: Barrier,
        capture: F,
    ) -> std::result::Result<PendingCheckpoint, CheckpointFailure>
    where
        F: FnOnce() -> anyhow::Result<BTreeMap<ChannelId, Vec<u8>>>,
    {
        let checkpoint_id = barrier.checkpoint_id;
        let in_flight = if barrier.options.is_unaligned() {
            match capture() {
                Ok(in_flight) => in_flight,
                Err(err) => {
                    let reason = CheckpointFailureReason::IoException;
                    let failure = CheckpointFailure::new(
                        checkpoint_id,
                        reason,
                        format!("capturing in-flight bytes failed: {err:#}"),
                    );
                    tracing::warn!(checkpoint_id, reason = %reason, "{failure}");
                    self.mark_checkpoint_cleared(checkpoint_id);
                    self.record_phase(checkpoint_id, CheckpointPhase::Failed(reason));
                    return Err(failure);
                }
            }
        } else {
            BTreeMap::new()
        };
        tracing::debug!(
            %channel,
            checkpoint_id,
            options = ?barrier.options,
            "checkpoint alignment started"
        );
        Ok(PendingCheckpoint {
            barrier,
            received: self.ended.clone(),
            in_flight,
        })
    }

    /// The channel at `slot` ended. While aligning this counts as its barrier.
    pub fn on_end_of_channel(&mut self, slot: usize) -> Result<AlignmentProgress> {
        self.channel(slot)?;
        self.ended[slot] = true;
        self.blocked[slot] = false;

        let Some(mut pending) = self.pending.take() else {
            return Ok(AlignmentProgress::Ignored);
        };
        pending.received[slot] = true;
        if pending.received.iter().all(|received| *received) {
            Ok(self.complete(pending, false))
        } else {
            self.pending = Some(pending);
            Ok(AlignmentProgress::Pending)
        }
    }

    /// Upstream canceled `checkpoint_id`.
    ///
    /// An aligning checkpoint at or below that id is aborted, and barriers of the
    /// canceled checkpoint are ignored from now on.
    pub fn on_cancel(&mut self, checkpoint_id: CheckpointId) -> Vec<CheckpointFailure> {
        if self.is_cleared(checkpoint_id) {
            return Vec::new();
        }
        let mut failed = Vec::new();
        match self.current_checkpoint() {
            Some(current) if current > checkpoint_id => return failed,
            Some(current) if current == checkpoint_id => {
                failed.extend(self.fail_pending(
                    CheckpointFailureReason::CanceledByMarker,
                    format!("checkpoint {checkpoint_id} canceled by upstream marker"),
                ));
                return failed;
            }
            Some(current) => {
                failed.extend(self.fail_pending(
                    CheckpointFailureReason::Subsumed,
                    format!("checkpoint {current} subsumed by canceled checkpoint {checkpoint_id}"),
                ));
            }
            None => {}
        }

        tracing::warn!(checkpoint_id, "checkpoint canceled before its first barrier");
        self.mark_checkpoint_cleared(checkpoint_id);
        self.record_phase(
            checkpoint_id,
            CheckpointPhase::Failed(CheckpointFailureReason::CanceledByMarker),
        );
        failed.push(CheckpointFailure::new(
            checkpoint_id,
            CheckpointFailureReason::CanceledByMarker,
            format!("checkpoint {checkpoint_id} canceled by upstream marker"),
        ));
        failed
    }

    /// Abort the aligning checkpoint, if any, and unblock every channel.
    pub fn abort_pending(
        &mut self,
        reason: CheckpointFailureReason,
        detail: impl Into<String>,
    ) -> Option<CheckpointFailure> {
        self.fail_pending(reason, detail.into())
    }

    /// Whether delivery from `slot` is withheld until the current checkpoint aligns.
    pub fn is_blocked(&self, slot: usize) -> bool {
        self.blocked.get(slot).copied().unwrap_or(false)
    }

    pub fn current_checkpoint(&self) -> Option<CheckpointId> {
        self.pending
            .as_ref()
            .map(|pending| pending.barrier.checkpoint_id)
    }

    pub fn last_cleared_checkpoint_id(&self) -> Option<CheckpointId> {
        self.last_cleared_checkpoint_id
    }

    /// Phase of `checkpoint_id`, or `None` for an old checkpoint no longer tracked.
    pub fn phase(&self, checkpoint_id: CheckpointId) -> Option<CheckpointPhase> {
        if self.current_checkpoint() == Some(checkpoint_id) {
            return Some(CheckpointPhase::Aligning);
        }
        if let Some((_, phase)) = self.phases.iter().rev().find(|(id, _)| *id == checkpoint_id) {
            return Some(*phase);
        }
        if self.is_cleared(checkpoint_id) {
            None
        } else {
            Some(CheckpointPhase::WaitingForFirstBarrier)
        }
    }

    /// `Aligned -> SnapshotRequested`. Returns whether the transition happened.
    pub fn mark_snapshot_requested(&mut self, checkpoint_id: CheckpointId) -> bool {
        self.transition(
            checkpoint_id,
            CheckpointPhase::Aligned,
            CheckpointPhase::SnapshotRequested,
        )
    }

    /// `SnapshotRequested -> Complete`. Returns whether the transition happened.
    pub fn mark_complete(&mut self, checkpoint_id: CheckpointId) -> bool {
        self.transition(
            checkpoint_id,
            CheckpointPhase::SnapshotRequested,
            CheckpointPhase::Complete,
        )
    }

    /// Record that an aligned checkpoint failed afterwards, e.g. while its channel
    /// state was captured.
    pub fn mark_failed(&mut self, checkpoint_id: CheckpointId, reason: CheckpointFailureReason) {
        self.record_phase(checkpoint_id, CheckpointPhase::Failed(reason));
    }

    fn transition(
        &mut self,
        checkpoint_id: CheckpointId,
        from: CheckpointPhase,
        to: CheckpointPhase,
    ) -> bool {
        match self.phases.iter_mut().find(|(id, _)| *id == checkpoint_id) {
            Some((_, phase)) if *phase == from => {
                *phase = to;
                true
            }
            _ => false,
        }
    }

    fn complete(
        &mut self,
        pending: PendingCheckpoint,
        on_first_barrier: bool,
    ) -> AlignmentProgress {
        let checkpoint_id = pending.barrier.checkpoint_id;
        self.blocked.fill(false);
        self.mark_checkpoint_cleared(checkpoint_id);
        self.record_phase(checkpoint_id, CheckpointPhase::Aligned);
        tracing::info!(
            checkpoint_id,
            channels = self.channels.len(),
            "checkpoint barriers aligned"
        );
        AlignmentProgress::Aligned(CompletedAlignment {
            barrier: pending.barrier,
            in_flight: pending.in_flight,
            on_first_barrier,
        })
    }

    fn fail_pending(
        &mut self,
        reason: CheckpointFailureReason,
        detail: String,
    ) -> Option<CheckpointFailure> {
        let pending = self.pending.take()?;
        let checkpoint_id = pending.barrier.checkpoint_id;
        self.blocked.fill(false);
        self.mark_checkpoint_cleared(checkpoint_id);
        self.record_phase(checkpoint_id, CheckpointPhase::Failed(reason));
        let failure = CheckpointFailure::new(checkpoint_id, reason, detail);
        tracing::warn!(checkpoint_id, reason = %reason, "{failure}");
        Some(failure)
    }

    fn record_phase(&mut self, checkpoint_id: CheckpointId, phase: CheckpointPhase) {
        match self.phases.iter_mut().find(|(id, _)| *id == checkpoint_id) {
            Some(entry) => entry.1 = phase,
            None => {
                self.phases.push_back((checkpoint_id, phase));
                while self.phases.len() > MAX_RETAINED_PHASES {
                    self.phases.pop_front();
                }
            }
        }
    }

    fn is_cleared(&self, checkpoint_id: CheckpointId) -> bool {
        self.last_cleared_checkpoint_id
            .is_some_and(|cleared| checkpoint_id <= cleared)
    }

    fn mark_checkpoint_cleared(&mut self, checkpoint_id: CheckpointId) {
        self.last_cleared_checkpoint_id = Some(
            self.last_cleared_checkpoint_id
                .map_or(checkpoint_id, |prev| prev.max(checkpoint_id)),
        );
    }

    fn channel(&self, slot: usize) -> Result<ChannelId> {
        self.channels
            .get(slot)
            .copied()
            .ok_or(InputError::UnknownChannel(ChannelId::new(slot as u32)))
    }
}
