//! Network input orchestrator.
//!
//! Owns one reassembler per input channel and turns the per-channel chunk queues
//! into a single ordered element sequence for the task thread:
//! - Round-robin selection across channels with data, skipping blocked channels
//! - Watermarks and status changes folded through [`StatusWatermarkValve`]
//! - Barriers routed through [`CheckpointAligner`], with the channel state of each
//!   aligned checkpoint handed out through [`SnapshotHandle`]s

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use anyhow::{Context, bail};
use crossbeam_channel::Select;

use crate::checkpoint::{
    AlignmentProgress, CheckpointAligner, CheckpointPhase, ChannelStateSnapshot,
    CompletedAlignment, SnapshotCompleter, SnapshotHandle, SnapshotResult, snapshot_handle,
};
use crate::config::NetworkInputConfig;
use crate::deserializer::RecordDeserializer;
use crate::error::{CheckpointFailure, CheckpointFailureReason, InputError, Result};
use crate::network::channel::{ChunkRecv, InputChannelReceiver};
use crate::network::frame::Frame;
use crate::reassembly::{ChannelReassembler, SpillStorage};
use crate::time::{StatusWatermarkValve, ValveOutput};
use crate::types::{
    Barrier, ChannelId, CheckpointId, EVENT_TIME_MIN, Element, StreamRecord, Watermark,
    WatermarkStatus,
};

/// Failed checkpoints remembered for late `prepare_snapshot` calls, and the most
/// failures kept for [`NetworkInput::drain_failed_checkpoints`].
const MAX_RETAINED_FAILURES: usize = 16;

/// Snapshot handles that may wait for their checkpoint at the same time.
const MAX_WAITING_SNAPSHOTS: usize = 16;

/// Outcome of one [`NetworkInput::next`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum InputPoll<T> {
    Element(Element<T>),
    /// No channel can make progress right now; see [`NetworkInput::wait_for_data`].
    Pending,
    /// Every channel ended. Returned again on every later call.
    EndOfInput,
}

enum ChannelEvent {
    Frame(Frame),
    /// Transport finished on a frame boundary without an end-of-channel marker.
    Closed,
}

struct ChannelSlot {
    id: ChannelId,
    receiver: Option<InputChannelReceiver>,
    reassembler: ChannelReassembler,
    /// The transport will deliver nothing more.
    transport_done: bool,
    ended: bool,
}

impl ChannelSlot {
    /// Next frame of this channel, pulling queued chunks as needed.
    fn poll(&mut self) -> Result<Option<ChannelEvent>> {
        loop {
            if let Some(frame) = self.reassembler.next_frame()? {
                return Ok(Some(ChannelEvent::Frame(frame)));
            }
            if self.transport_done {
                self.reassembler.finish()?;
                return Ok(Some(ChannelEvent::Closed));
            }
            let Some(receiver) = &self.receiver else {
                return Ok(None);
            };
            match receiver.try_recv() {
                ChunkRecv::Chunk(chunk) => {
                    self.reassembler.push_chunk(&chunk.bytes);
                    self.transport_done = chunk.is_last;
                }
                ChunkRecv::Empty => return Ok(None),
                ChunkRecv::Disconnected => self.transport_done = true,
            }
        }
    }
}

fn capture_unconsumed(slots: &[ChannelSlot]) -> anyhow::Result<BTreeMap<ChannelId, Vec<u8>>> {
    slots
        .iter()
        .map(|slot| {
            let bytes = slot
                .reassembler
                .unconsumed_bytes()
                .with_context(|| format!("capturing unconsumed bytes of {}", slot.id))?;
            Ok((slot.id, bytes))
        })
        .collect()
}

/// Pull-based input of one task.
///
/// All methods are called from the task thread. Transport threads only ever touch
/// the sending side of the channel queues.
pub struct NetworkInput<D: RecordDeserializer> {
    slots: Vec<ChannelSlot>,
    index: AHashMap<ChannelId, usize>,
    deserializer: D,
    valve: StatusWatermarkValve,
    aligner: CheckpointAligner,
    output: VecDeque<Element<D::Value>>,
    /// Slot the next round-robin scan starts from.
    cursor: usize,
    ended_count: usize,
    /// Channel state of the most recently aligned checkpoint.
    latest_snapshot: Option<ChannelStateSnapshot>,
    failures: BTreeMap<CheckpointId, CheckpointFailure>,
    unreported_failures: VecDeque<CheckpointFailure>,
    waiting: Vec<SnapshotCompleter>,
    closed: bool,
}

impl<D: RecordDeserializer> NetworkInput<D> {
    /// Create the input over `receivers`. Channels are ordered by id.
    pub fn new(
        mut receivers: Vec<InputChannelReceiver>,
        deserializer: D,
        spill_storage: Arc<dyn SpillStorage>,
        config: NetworkInputConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        receivers.sort_by_key(InputChannelReceiver::channel_id);
        let mut index = AHashMap::with_capacity(receivers.len());
        let mut slots = Vec::with_capacity(receivers.len());
        for (slot, receiver) in receivers.into_iter().enumerate() {
            let id = receiver.channel_id();
            if index.insert(id, slot).is_some() {
                bail!("duplicate input channel {}", id);
            }
            slots.push(ChannelSlot {
                id,
                receiver: Some(receiver),
                reassembler: ChannelReassembler::new(id, spill_storage.clone(), &config),
                transport_done: false,
                ended: false,
            });
        }

        let channel_ids: Vec<ChannelId> = slots.iter().map(|slot| slot.id).collect();
        tracing::debug!(channels = slots.len(), "network input created");
        Ok(Self {
            valve: StatusWatermarkValve::new(slots.len()),
            aligner: CheckpointAligner::new(channel_ids),
            slots,
            index,
            deserializer,
            output: VecDeque::new(),
            cursor: 0,
            ended_count: 0,
            latest_snapshot: None,
            failures: BTreeMap::new(),
            unreported_failures: VecDeque::new(),
            waiting: Vec::new(),
            closed: false,
        })
    }

    /// Next element for the task.
    ///
    /// Records are returned as soon as they are complete. Watermarks and status
    /// changes only surface when the valve emits a combined value. A barrier
    /// surfaces once its checkpoint aligned, before any record that followed it;
    /// unaligned barriers surface at their first sighting instead.
    ///
    /// Checkpoint failures never surface here; see
    /// [`drain_failed_checkpoints`](Self::drain_failed_checkpoints).
    pub fn next(&mut self) -> Result<InputPoll<D::Value>> {
        if self.closed {
            return Err(InputError::Closed);
        }
        loop {
            if let Some(element) = self.output.pop_front() {
                return Ok(InputPoll::Element(element));
            }
            if self.ended_count == self.slots.len() {
                return Ok(InputPoll::EndOfInput);
            }
            let Some((slot, event)) = self.poll_channels()? else {
                return Ok(InputPoll::Pending);
            };
            let channel = self.slots[slot].id;

            match event {
                ChannelEvent::Frame(Frame::Record(payload)) => {
                    let value = self
                        .deserializer
                        .deserialize(&payload)
                        .map_err(|source| InputError::Deserialization { channel, source })?;
                    return Ok(InputPoll::Element(Element::Record(StreamRecord {
                        payload,
                        value,
                    })));
                }
                ChannelEvent::Frame(Frame::Watermark(watermark)) => {
                    let output = self.valve.input_watermark(slot, watermark);
                    self.push_valve_output(channel, output);
                }
                ChannelEvent::Frame(Frame::WatermarkStatus(status)) => {
                    let output = self.valve.input_watermark_status(slot, status);
                    self.push_valve_output(channel, output);
                }
                ChannelEvent::Frame(Frame::Barrier(barrier)) => {
                    self.handle_barrier(slot, barrier)?;
                }
                ChannelEvent::Frame(Frame::CancelCheckpoint(checkpoint_id)) => {
                    for failure in self.aligner.on_cancel(checkpoint_id) {
                        self.record_failure(failure);
                    }
                }
                ChannelEvent::Frame(Frame::EndOfChannel) | ChannelEvent::Closed => {
                    self.end_channel(slot)?;
                }
            }
        }
    }

    /// Round-robin over channels that are neither ended nor blocked.
    fn poll_channels(&mut self) -> Result<Option<(usize, ChannelEvent)>> {
        let num_slots = self.slots.len();
        for offset in 0..num_slots {
            let slot = (self.cursor + offset) % num_slots;
            if self.slots[slot].ended || self.aligner.is_blocked(slot) {
                continue;
            }
            if let Some(event) = self.slots[slot].poll()? {
                self.cursor = (slot + 1) % num_slots;
                return Ok(Some((slot, event)));
            }
        }
        Ok(None)
    }

    fn push_valve_output(&mut self, channel: ChannelId, output: Option<ValveOutput>) {
        match output {
            Some(ValveOutput::Watermark(watermark)) => {
                self.output
                    .push_back(Element::Watermark { channel, watermark });
            }
            Some(ValveOutput::Status(status)) => {
                self.output
                    .push_back(Element::StatusChange { channel, status });
            }
            None => {}
        }
        if let Some(watermark) = self.valve.take_pending() {
            self.output
                .push_back(Element::Watermark { channel, watermark });
        }
    }

    fn handle_barrier(&mut self, slot: usize, barrier: Barrier) -> Result<()> {
        let channel = self.slots[slot].id;
        let slots = &self.slots;
        let outcome = self
            .aligner
            .on_barrier(slot, barrier, || capture_unconsumed(slots))?;
        for failure in outcome.failed {
            self.record_failure(failure);
        }
        match outcome.progress {
            AlignmentProgress::Started(barrier) if barrier.options.is_unaligned() => {
                self.output.push_back(Element::Barrier { channel, barrier });
            }
            AlignmentProgress::Aligned(done) => self.on_aligned(channel, done),
            _ => {}
        }
        Ok(())
    }

    fn end_channel(&mut self, slot: usize) -> Result<()> {
        let channel = self.slots[slot].id;
        self.slots[slot].ended = true;
        self.ended_count += 1;
        tracing::debug!(
            %channel,
            consumed_bytes = self.slots[slot].reassembler.consumed_bytes(),
            "input channel ended"
        );
        self.output.push_back(Element::EndOfChannel(channel));

        let output = self.valve.input_end_of_channel(slot);
        self.push_valve_output(channel, output);
        if let AlignmentProgress::Aligned(done) = self.aligner.on_end_of_channel(slot)? {
            self.on_aligned(channel, done);
        }
        Ok(())
    }

    fn on_aligned(&mut self, channel: ChannelId, done: CompletedAlignment) {
        let checkpoint_id = done.barrier.checkpoint_id;
        let unaligned = done.barrier.options.is_unaligned();
        let channels = if unaligned {
            Ok(done.in_flight)
        } else {
            capture_unconsumed(&self.slots)
        };

        match channels {
            Ok(channels) => {
                let snapshot = ChannelStateSnapshot::new(checkpoint_id, channels);
                tracing::debug!(
                    checkpoint_id,
                    snapshot_bytes = snapshot.total_bytes(),
                    "captured channel state"
                );
                self.settle_waiting(checkpoint_id, &Ok(snapshot.clone()));
                self.latest_snapshot = Some(snapshot);
            }
            Err(err) => {
                let reason = CheckpointFailureReason::IoException;
                self.aligner.mark_failed(checkpoint_id, reason);
                self.record_failure(CheckpointFailure::new(
                    checkpoint_id,
                    reason,
                    format!("{err:#}"),
                ));
                return;
            }
        }

        if !unaligned || done.on_first_barrier {
            self.output.push_back(Element::Barrier {
                channel,
                barrier: done.barrier,
            });
        }
    }

    fn record_failure(&mut self, failure: CheckpointFailure) {
        tracing::warn!(
            checkpoint_id = failure.checkpoint_id,
            reason = %failure.reason,
            "checkpoint failed at network input: {}",
            failure.detail
        );
        self.settle_waiting(failure.checkpoint_id, &Err(failure.clone()));
        self.failures.insert(failure.checkpoint_id, failure.clone());
        while self.failures.len() > MAX_RETAINED_FAILURES {
            self.failures.pop_first();
        }
        self.report(failure);
    }

    fn report(&mut self, failure: CheckpointFailure) {
        self.unreported_failures.push_back(failure);
        if self.unreported_failures.len() > MAX_RETAINED_FAILURES {
            if let Some(dropped) = self.unreported_failures.pop_front() {
                tracing::debug!(
                    checkpoint_id = dropped.checkpoint_id,
                    "dropping undrained checkpoint failure"
                );
            }
        }
    }

    fn wait_for_alignment(&mut self, completer: SnapshotCompleter) {
        self.waiting.push(completer);
        if self.waiting.len() <= MAX_WAITING_SNAPSHOTS {
            return;
        }
        let oldest = self
            .waiting
            .iter()
            .enumerate()
            .min_by_key(|(_, completer)| completer.checkpoint_id())
            .map(|(position, _)| position);
        if let Some(position) = oldest {
            let completer = self.waiting.swap_remove(position);
            let id = completer.checkpoint_id();
            completer.fail(CheckpointFailure::new(
                id,
                CheckpointFailureReason::Subsumed,
                "too many snapshot requests waiting for alignment",
            ));
        }
    }

    /// Resolve handles of `checkpoint_id`; older ones can never resolve any more.
    fn settle_waiting(&mut self, checkpoint_id: CheckpointId, result: &SnapshotResult) {
        for completer in std::mem::take(&mut self.waiting) {
            let id = completer.checkpoint_id();
            if id > checkpoint_id {
                self.waiting.push(completer);
            } else if id < checkpoint_id {
                completer.fail(CheckpointFailure::new(
                    id,
                    CheckpointFailureReason::Subsumed,
                    format!("checkpoint {checkpoint_id} finished first"),
                ));
            } else {
                match result {
                    Ok(snapshot) => {
                        self.aligner.mark_snapshot_requested(id);
                        completer.complete(snapshot.clone());
                        self.aligner.mark_complete(id);
                    }
                    Err(failure) => completer.fail(failure.clone()),
                }
            }
        }
    }

    /// Handle resolving to the channel state of `checkpoint_id`.
    ///
    /// The state is captured when the checkpoint aligns: for each channel the exact
    /// bytes received but not yet consumed at that moment (unaligned checkpoints
    /// capture at their first barrier). The handle resolves immediately when the
    /// checkpoint already aligned, fails immediately when it failed or was
    /// superseded, and otherwise waits for the aligner.
    pub fn prepare_snapshot(&mut self, checkpoint_id: CheckpointId) -> Result<SnapshotHandle> {
        if self.closed {
            return Err(InputError::Closed);
        }
        let (completer, handle) = snapshot_handle(checkpoint_id);

        if let Some(snapshot) = self
            .latest_snapshot
            .as_ref()
            .filter(|snapshot| snapshot.checkpoint_id == checkpoint_id)
        {
            self.aligner.mark_snapshot_requested(checkpoint_id);
            completer.complete(snapshot.clone());
            self.aligner.mark_complete(checkpoint_id);
            return Ok(handle);
        }
        if let Some(failure) = self.failures.get(&checkpoint_id) {
            completer.fail(failure.clone());
            return Ok(handle);
        }

        match self.aligner.phase(checkpoint_id) {
            Some(CheckpointPhase::WaitingForFirstBarrier | CheckpointPhase::Aligning) => {
                self.wait_for_alignment(completer);
            }
            Some(CheckpointPhase::Failed(reason)) => {
                completer.fail(CheckpointFailure::new(
                    checkpoint_id,
                    reason,
                    "checkpoint failed earlier",
                ));
            }
            _ => {
                completer.fail(CheckpointFailure::new(
                    checkpoint_id,
                    CheckpointFailureReason::Subsumed,
                    "a newer checkpoint already finished",
                ));
            }
        }
        Ok(handle)
    }

    /// Checkpoint failures observed since the last call, oldest first. Only the
    /// most recent ones are kept between calls.
    pub fn drain_failed_checkpoints(&mut self) -> Vec<CheckpointFailure> {
        self.unreported_failures.drain(..).collect()
    }

    pub fn checkpoint_phase(&self, checkpoint_id: CheckpointId) -> Option<CheckpointPhase> {
        self.aligner.phase(checkpoint_id)
    }

    /// Block until some unblocked channel may have data, or `timeout` passes.
    ///
    /// Returns `true` when calling [`next`](Self::next) may make progress. Nothing
    /// is consumed.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        if self.closed || !self.output.is_empty() || self.ended_count == self.slots.len() {
            return true;
        }
        let mut select = Select::new();
        let mut operations = 0;
        for (slot, channel) in self.slots.iter().enumerate() {
            if channel.ended || channel.transport_done || self.aligner.is_blocked(slot) {
                continue;
            }
            if let Some(receiver) = &channel.receiver {
                select.recv(&receiver.receiver);
                operations += 1;
            }
        }
        if operations == 0 {
            return false;
        }
        select.ready_timeout(timeout).is_ok()
    }

    /// Release every reassembler's spill resources in channel order, then drop the
    /// channel queues. Checkpoints that have not resolved fail with `TASK_CLOSING`.
    ///
    /// Idempotent. Every reassembler is closed even if an earlier one fails; the
    /// first failure is returned.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_err = None;
        for slot in &mut self.slots {
            if let Err(err) = slot.reassembler.close() {
                tracing::warn!(channel = %slot.id, "failed to release spill resources: {err:#}");
                first_err.get_or_insert(err);
            }
        }
        for slot in &mut self.slots {
            slot.receiver = None;
        }
        self.output.clear();

        let pending = self.aligner.abort_pending(
            CheckpointFailureReason::TaskClosing,
            "network input closed while aligning",
        );
        if let Some(failure) = pending {
            self.report(failure);
        }
        for completer in self.waiting.drain(..) {
            let id = completer.checkpoint_id();
            completer.fail(CheckpointFailure::new(
                id,
                CheckpointFailureReason::TaskClosing,
                "network input closed",
            ));
        }

        tracing::info!(channels = self.slots.len(), "network input closed");
        first_err.map_or(Ok(()), Err)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn num_channels(&self) -> usize {
        self.slots.len()
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.slots.iter().map(|slot| slot.id).collect()
    }

    /// Bytes of all frames consumed from `channel` so far. Never decreases.
    pub fn consumed_bytes(&self, channel: ChannelId) -> Result<u64> {
        Ok(self.slot(channel)?.reassembler.consumed_bytes())
    }

    /// Whether `channel` is withheld until the aligning checkpoint completes.
    pub fn is_blocked(&self, channel: ChannelId) -> Result<bool> {
        let slot = self.slot_index(channel)?;
        Ok(self.aligner.is_blocked(slot))
    }

    pub fn is_channel_ended(&self, channel: ChannelId) -> Result<bool> {
        Ok(self.slot(channel)?.ended)
    }

    pub fn last_output_watermark(&self) -> Option<Watermark> {
        let timestamp = self.valve.last_output_watermark();
        (timestamp > EVENT_TIME_MIN).then(|| Watermark::new(timestamp))
    }

    pub fn output_status(&self) -> WatermarkStatus {
        if self.valve.is_idle() {
            WatermarkStatus::Idle
        } else {
            WatermarkStatus::Active
        }
    }

    fn slot_index(&self, channel: ChannelId) -> Result<usize> {
        self.index
            .get(&channel)
            .copied()
            .ok_or(InputError::UnknownChannel(channel))
    }

    fn slot(&self, channel: ChannelId) -> Result<&ChannelSlot> {
        let slot = self.slot_index(channel)?;
        Ok(&self.slots[slot])
    }
}

#[cfg(test)]
#[path = "tests/input_tests.rs"]
mod tests;
