use super::*;

/// Event the valve forwards downstream after an input update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveOutput {
    Watermark(Watermark),
    Status(WatermarkStatus),
}

#[derive(Debug, Clone, Copy)]
struct ChannelProgress {
    /// Starts at EVENT_TIME_MIN until the channel reports.
    watermark: EventTime,
    status: WatermarkStatus,
    finished: bool,
}

impl ChannelProgress {
    fn is_contributing(&self) -> bool {
        !self.finished && self.status.is_active()
    }
}

/// Combines per-channel watermarks and activity status into one downstream stream.
///
/// The combined watermark is the minimum over channels that are ACTIVE and not
/// finished. It is only emitted when it strictly exceeds the last emitted value, so
/// the output never regresses, even when a channel rejoins with an old watermark.
///
/// # Idle channels
/// An IDLE channel is excluded from the minimum until it reports ACTIVE again. When
/// no active channel remains the valve itself goes IDLE and says so once.
///
/// Reactivating an IDLE valve returns the ACTIVE status first. A watermark the
/// channel reported while idle is then held until [`take_pending`] collects it.
///
/// [`take_pending`]: StatusWatermarkValve::take_pending
pub struct StatusWatermarkValve {
    channels: Vec<ChannelProgress>,
    last_output_watermark: EventTime,
    output_status: WatermarkStatus,
    /// Watermark that follows a status change returned by the same call.
    pending: Option<Watermark>,
}

impl StatusWatermarkValve {
    pub fn new(num_channels: usize) -> Self {
        Self {
            channels: vec![
                ChannelProgress {
                    watermark: EVENT_TIME_MIN,
                    status: WatermarkStatus::Active,
                    finished: false,
                };
                num_channels
            ],
            last_output_watermark: EVENT_TIME_MIN,
            output_status: WatermarkStatus::Active,
            pending: None,
        }
    }

    /// Record a watermark for `slot`.
    ///
    /// Values not above the channel's previous watermark are dropped. The stored
    /// value advances even while the channel is idle, but only an active channel
    /// triggers re-evaluation.
    pub fn input_watermark(&mut self, slot: usize, watermark: Watermark) -> Option<ValveOutput> {
        let channel = self.channels.get_mut(slot)?;
        if channel.finished || watermark.timestamp <= channel.watermark {
            return None;
        }
        channel.watermark = watermark.timestamp;
        if !channel.status.is_active() {
            return None;
        }
        self.advance()
    }

    pub fn input_watermark_status(
        &mut self,
        slot: usize,
        status: WatermarkStatus,
    ) -> Option<ValveOutput> {
        let channel = self.channels.get_mut(slot)?;
        if channel.finished || channel.status == status {
            return None;
        }
        channel.status = status;

        match status {
            WatermarkStatus::Idle => self.advance_or_go_idle(),
            WatermarkStatus::Active => {
                if self.output_status.is_active() {
                    // Re-included; a stale value just holds back the next emission.
                    self.advance()
                } else {
                    self.output_status = WatermarkStatus::Active;
                    if let Some(ValveOutput::Watermark(watermark)) = self.advance() {
                        self.pending = Some(watermark);
                    }
                    Some(ValveOutput::Status(WatermarkStatus::Active))
                }
            }
        }
    }

    /// The channel delivered its last element and stops taking part in the minimum.
    pub fn input_end_of_channel(&mut self, slot: usize) -> Option<ValveOutput> {
        let channel = self.channels.get_mut(slot)?;
        if channel.finished {
            return None;
        }
        channel.finished = true;
        if self.channels.iter().all(|channel| channel.finished) {
            return None;
        }
        self.advance_or_go_idle()
    }

    fn advance_or_go_idle(&mut self) -> Option<ValveOutput> {
        if self.channels.iter().any(ChannelProgress::is_contributing) {
            return self.advance();
        }
        if self.output_status.is_active() {
            self.output_status = WatermarkStatus::Idle;
            return Some(ValveOutput::Status(WatermarkStatus::Idle));
        }
        None
    }

    fn advance(&mut self) -> Option<ValveOutput> {
        let new_min = self.compute_min()?;
        if new_min > self.last_output_watermark {
            self.last_output_watermark = new_min;
            // A newer emission supersedes a held one.
            self.pending = None;
            Some(ValveOutput::Watermark(Watermark::new(new_min)))
        } else {
            None
        }
    }

    /// Minimum across active, unfinished channels. `None` when there are none.
    fn compute_min(&self) -> Option<EventTime> {
        self.channels
            .iter()
            .filter(|channel| channel.is_contributing())
            .map(|channel| channel.watermark)
            .min()
    }

    /// Take the watermark held behind the last status change, if any.
    pub fn take_pending(&mut self) -> Option<Watermark> {
        self.pending.take()
    }

    pub fn last_output_watermark(&self) -> EventTime {
        self.last_output_watermark
    }

    /// Whether the valve last told downstream it is IDLE.
    pub fn is_idle(&self) -> bool {
        !self.output_status.is_active()
    }

    pub fn channel_watermark(&self, slot: usize) -> Option<EventTime> {
        self.channels.get(slot).map(|channel| channel.watermark)
    }

    pub fn channel_status(&self, slot: usize) -> Option<WatermarkStatus> {
        self.channels.get(slot).map(|channel| channel.status)
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
}
