use super::*;

/// Once this many consumed bytes sit at the front of the buffer they are dropped.
const COMPACT_MIN_BYTES: usize = 64 * 1024;

/// Spilled prefix of the frame body currently being accumulated.
struct SpilledPrefix {
    handle: SpillHandle,
    len: usize,
}

/// The frame whose header has been read but whose body is not complete yet.
struct PartialFrame {
    header: [u8; FRAME_HEADER_BYTES],
    body_len: usize,
    /// Known once the first body byte arrived.
    frame_type: Option<FrameType>,
    spill: Option<SpilledPrefix>,
}

impl PartialFrame {
    fn spilled_len(&self) -> usize {
        self.spill.as_ref().map_or(0, |spill| spill.len)
    }
}

/// Turns one channel's raw chunks back into frames.
///
/// Bytes are consumed strictly in arrival order and every frame is yielded exactly
/// once. When a record body outgrows `spill_threshold_bytes` in memory the
/// accumulated bytes move to [`SpillStorage`] and are read back on completion.
/// Control markers are fixed-size and never spilled.
pub struct ChannelReassembler {
    channel: ChannelId,
    storage: Arc<dyn SpillStorage>,
    spill_threshold: usize,
    max_frame_bytes: usize,
    buffer: Vec<u8>,
    /// Read offset into `buffer`; everything before it is consumed.
    pos: usize,
    partial: Option<PartialFrame>,
    consumed_bytes: u64,
}

impl ChannelReassembler {
    pub fn new(
        channel: ChannelId,
        storage: Arc<dyn SpillStorage>,
        config: &NetworkInputConfig,
    ) -> Self {
        Self {
            channel,
            storage,
            spill_threshold: config.spill_threshold_bytes,
            max_frame_bytes: config.max_frame_bytes,
            buffer: Vec::new(),
            pos: 0,
            partial: None,
            consumed_bytes: 0,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel
    }

    /// Append a chunk without decoding anything yet.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.compact();
        self.buffer.extend_from_slice(chunk);
    }

    /// Append a chunk and iterate the frames that became complete.
    ///
    /// Dropping the iterator early leaves the remaining bytes buffered for the
    /// next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.push_chunk(chunk);
        Frames {
            reassembler: self,
            failed: false,
        }
    }

    /// Decode the next complete frame, if the buffered bytes contain one.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.partial.is_none() && !self.start_frame()? {
            return Ok(None);
        }
        let Some(partial) = self.partial.as_mut() else {
            return Ok(None);
        };

        let in_memory = self.buffer.len() - self.pos;
        if partial.frame_type.is_none() && in_memory > 0 {
            partial.frame_type = Some(check_frame_type(
                self.channel,
                self.buffer[self.pos],
                partial.body_len,
            )?);
        }

        let needed = partial.body_len - partial.spilled_len();
        if in_memory < needed {
            if in_memory > self.spill_threshold && partial.frame_type == Some(FrameType::Record) {
                let tail = &self.buffer[self.pos..];
                match partial.spill.as_mut() {
                    Some(spill) => {
                        append(&*self.storage, self.channel, &spill.handle, tail)?;
                        spill.len += tail.len();
                    }
                    None => {
                        let handle = self
                            .storage
                            .allocate_spill_target(self.channel)
                            .map_err(|source| InputError::SpillIo {
                                channel: self.channel,
                                source,
                            })?;
                        tracing::debug!(
                            channel = %self.channel,
                            frame_bytes = partial.body_len,
                            spill_id = handle.id(),
                            "spilling partial record"
                        );
                        // Owned by the partial frame before the first write, so a
                        // failed append is still released on close.
                        let spill = partial.spill.insert(SpilledPrefix { handle, len: 0 });
                        append(&*self.storage, self.channel, &spill.handle, tail)?;
                        spill.len = tail.len();
                    }
                }
                self.pos = self.buffer.len();
                self.compact();
            }
            return Ok(None);
        }

        let mut body = match &partial.spill {
            Some(spill) => read_spilled(&*self.storage, self.channel, spill)?,
            None => Vec::with_capacity(needed),
        };
        body.extend_from_slice(&self.buffer[self.pos..self.pos + needed]);

        let body_len = partial.body_len;
        let spill = self.partial.take().and_then(|partial| partial.spill);
        self.pos += needed;
        self.consumed_bytes += (FRAME_HEADER_BYTES + body_len) as u64;
        self.compact();

        if let Some(spill) = spill {
            tracing::debug!(
                channel = %self.channel,
                frame_bytes = body_len,
                spill_id = spill.handle.id(),
                "spilled record complete"
            );
            self.storage
                .release(spill.handle)
                .map_err(|source| InputError::SpillIo {
                    channel: self.channel,
                    source,
                })?;
        }

        Frame::decode(&body)
            .map(Some)
            .map_err(|err| InputError::framing(self.channel, err.to_string()))
    }

    /// Parse the next header. Returns `false` when fewer than four bytes are buffered.
    fn start_frame(&mut self) -> Result<bool> {
        let Some(header_bytes) = self.buffer.get(self.pos..self.pos + FRAME_HEADER_BYTES) else {
            return Ok(false);
        };
        let mut header = [0u8; FRAME_HEADER_BYTES];
        header.copy_from_slice(header_bytes);

        let body_len = decode_header(header);
        if body_len == 0 {
            return Err(InputError::framing(self.channel, "zero-length frame"));
        }
        if body_len > self.max_frame_bytes {
            return Err(InputError::framing(
                self.channel,
                format!(
                    "declared frame length {} exceeds limit {}",
                    body_len, self.max_frame_bytes
                ),
            ));
        }

        self.pos += FRAME_HEADER_BYTES;
        self.partial = Some(PartialFrame {
            header,
            body_len,
            frame_type: None,
            spill: None,
        });
        Ok(true)
    }

    fn compact(&mut self) {
        if self.pos == self.buffer.len() {
            self.buffer.clear();
            self.pos = 0;
        } else if self.pos >= COMPACT_MIN_BYTES && self.pos * 2 >= self.buffer.len() {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
    }

    /// The exact bytes received but not yet yielded as frames, including the header
    /// and spilled prefix of a partially received frame.
    pub fn unconsumed_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.buffered_bytes());
        if let Some(partial) = &self.partial {
            out.extend_from_slice(&partial.header);
            if let Some(spill) = &partial.spill {
                out.extend(read_spilled(&*self.storage, self.channel, spill)?);
            }
        }
        out.extend_from_slice(&self.buffer[self.pos..]);
        Ok(out)
    }

    /// Unconsumed bytes held in memory. Never above the spill threshold once
    /// [`next_frame`](Self::next_frame) returned for a partial record; only the chunk
    /// pushed since the last call can take it past the threshold.
    pub fn in_memory_bytes(&self) -> usize {
        self.buffer.len() - self.pos
    }

    /// Unconsumed bytes held in memory or in spill storage.
    pub fn buffered_bytes(&self) -> usize {
        let partial = self
            .partial
            .as_ref()
            .map_or(0, |partial| FRAME_HEADER_BYTES + partial.spilled_len());
        partial + self.buffer.len() - self.pos
    }

    /// Total bytes of all frames yielded so far. Never decreases.
    pub fn consumed_bytes(&self) -> u64 {
        self.consumed_bytes
    }

    pub fn is_spilling(&self) -> bool {
        self.partial
            .as_ref()
            .is_some_and(|partial| partial.spill.is_some())
    }

    /// Whether some received bytes do not form a complete frame.
    pub fn has_partial_frame(&self) -> bool {
        self.partial.is_some() || self.pos < self.buffer.len()
    }

    /// Validate that the channel ended on a frame boundary.
    pub fn finish(&self) -> Result<()> {
        if self.has_partial_frame() {
            return Err(InputError::framing(
                self.channel,
                format!(
                    "channel closed mid-frame with {} unconsumed bytes",
                    self.buffered_bytes()
                ),
            ));
        }
        Ok(())
    }

    /// Release the spill target (if any) and drop buffered bytes.
    pub fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        self.pos = 0;
        if let Some(spill) = self.partial.take().and_then(|partial| partial.spill) {
            self.storage
                .release(spill.handle)
                .map_err(|source| InputError::SpillIo {
                    channel: self.channel,
                    source,
                })?;
        }
        Ok(())
    }
}

impl Drop for ChannelReassembler {
    fn drop(&mut self) {
        if let Some(spill) = self.partial.take().and_then(|partial| partial.spill) {
            if let Err(err) = self.storage.release(spill.handle) {
                tracing::warn!(channel = %self.channel, "failed to release spill target: {err:#}");
            }
        }
    }
}

/// Iterator over the frames completed by one [`ChannelReassembler::feed`] call.
///
/// Stops after the first error.
pub struct Frames<'a> {
    reassembler: &'a mut ChannelReassembler,
    failed: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reassembler.next_frame() {
            Ok(frame) => frame.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

fn check_frame_type(channel: ChannelId, tag: u8, body_len: usize) -> Result<FrameType> {
    let frame_type =
        FrameType::try_from(tag).map_err(|err| InputError::framing(channel, err.to_string()))?;
    if let Some(payload_len) = frame_type.control_payload_len() {
        if body_len != 1 + payload_len {
            return Err(InputError::framing(
                channel,
                format!(
                    "{:?} marker declares {} body bytes, expected {}",
                    frame_type,
                    body_len,
                    1 + payload_len
                ),
            ));
        }
    }
    Ok(frame_type)
}

fn append(
    storage: &dyn SpillStorage,
    channel: ChannelId,
    handle: &SpillHandle,
    bytes: &[u8],
) -> Result<()> {
    storage
        .append_bytes(handle, bytes)
        .map_err(|source| InputError::SpillIo { channel, source })
}

fn read_spilled(
    storage: &dyn SpillStorage,
    channel: ChannelId,
    spill: &SpilledPrefix,
) -> Result<Vec<u8>> {
    let bytes = storage
        .read_all(&spill.handle)
        .map_err(|source| InputError::SpillIo { channel, source })?;
    if bytes.len() != spill.len {
        return Err(InputError::SpillIo {
            channel,
            source: anyhow!(
                "spill target {} returned {} bytes, expected {}",
                spill.handle.id(),
                bytes.len(),
                spill.len
            ),
        });
    }
    Ok(bytes)
}
