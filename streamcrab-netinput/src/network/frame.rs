use anyhow::{Result, anyhow, bail};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::types::{
    AlignmentMode, Barrier, CheckpointId, CheckpointOptions, Watermark, WatermarkStatus,
};

/// Size of the big-endian `u32` body-length prefix.
pub const FRAME_HEADER_BYTES: usize = 4;

const WATERMARK_PAYLOAD_BYTES: usize = 8;
const STATUS_PAYLOAD_BYTES: usize = 1;
const BARRIER_PAYLOAD_BYTES: usize = 8 + 8 + 1;
const CANCEL_PAYLOAD_BYTES: usize = 8;

/// Largest body (tag + payload) any control marker can have.
pub const MAX_CONTROL_BODY_BYTES: usize = 1 + BARRIER_PAYLOAD_BYTES;

const FLAG_UNALIGNED: u8 = 1 << 0;
const FLAG_AT_LEAST_ONCE: u8 = 1 << 1;
const KNOWN_FLAGS: u8 = FLAG_UNALIGNED | FLAG_AT_LEAST_ONCE;

const STATUS_ACTIVE: u8 = 0;
const STATUS_IDLE: u8 = 1;

/// Frame discriminant, the first byte of every frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Record = 1,
    Watermark = 2,
    WatermarkStatus = 3,
    Barrier = 4,
    EndOfChannel = 5,
    CancelCheckpoint = 6,
}

impl TryFrom<u8> for FrameType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FrameType::Record),
            2 => Ok(FrameType::Watermark),
            3 => Ok(FrameType::WatermarkStatus),
            4 => Ok(FrameType::Barrier),
            5 => Ok(FrameType::EndOfChannel),
            6 => Ok(FrameType::CancelCheckpoint),
            other => Err(anyhow!("unknown frame type: {}", other)),
        }
    }
}

impl FrameType {
    /// Fixed payload length of a control marker, `None` for records.
    pub fn control_payload_len(self) -> Option<usize> {
        match self {
            FrameType::Record => None,
            FrameType::Watermark => Some(WATERMARK_PAYLOAD_BYTES),
            FrameType::WatermarkStatus => Some(STATUS_PAYLOAD_BYTES),
            FrameType::Barrier => Some(BARRIER_PAYLOAD_BYTES),
            FrameType::EndOfChannel => Some(0),
            FrameType::CancelCheckpoint => Some(CANCEL_PAYLOAD_BYTES),
        }
    }

    pub fn is_control(self) -> bool {
        self != FrameType::Record
    }
}

/// One decoded frame of a channel's byte stream.
///
/// Wire layout: `[body_len:u32][type:u8][payload]` with `body_len = 1 + payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Record(Vec<u8>),
    Watermark(Watermark),
    WatermarkStatus(WatermarkStatus),
    Barrier(Barrier),
    EndOfChannel,
    CancelCheckpoint(CheckpointId),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Record(_) => FrameType::Record,
            Frame::Watermark(_) => FrameType::Watermark,
            Frame::WatermarkStatus(_) => FrameType::WatermarkStatus,
            Frame::Barrier(_) => FrameType::Barrier,
            Frame::EndOfChannel => FrameType::EndOfChannel,
            Frame::CancelCheckpoint(_) => FrameType::CancelCheckpoint,
        }
    }

    /// Encode header, discriminant and payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            Frame::Record(bytes) => payload.extend_from_slice(bytes),
            Frame::Watermark(wm) => payload.extend_from_slice(&wm.timestamp.to_be_bytes()),
            Frame::WatermarkStatus(status) => payload.push(match status {
                WatermarkStatus::Active => STATUS_ACTIVE,
                WatermarkStatus::Idle => STATUS_IDLE,
            }),
            Frame::Barrier(barrier) => {
                payload.extend_from_slice(&barrier.checkpoint_id.to_be_bytes());
                payload.extend_from_slice(&barrier.timestamp.to_be_bytes());
                payload.push(encode_options(&barrier.options));
            }
            Frame::EndOfChannel => {}
            Frame::CancelCheckpoint(checkpoint_id) => {
                payload.extend_from_slice(&checkpoint_id.to_be_bytes())
            }
        }

        let body_len = 1 + payload.len();
        let mut out = Vec::with_capacity(FRAME_HEADER_BYTES + body_len);
        out.extend_from_slice(&(body_len as u32).to_be_bytes());
        out.push(self.frame_type() as u8);
        out.extend_from_slice(&payload);
        out
    }

    /// Decode a frame body (everything after the length prefix).
    pub fn decode(body: &[u8]) -> Result<Self> {
        let Some((&tag, payload)) = body.split_first() else {
            bail!("empty frame body");
        };
        let frame_type = FrameType::try_from(tag)?;
        if let Some(expected) = frame_type.control_payload_len() {
            if payload.len() != expected {
                bail!(
                    "{:?} marker payload must be {} bytes, got {}",
                    frame_type,
                    expected,
                    payload.len()
                );
            }
        }

        let frame = match frame_type {
            FrameType::Record => Frame::Record(payload.to_vec()),
            FrameType::Watermark => Frame::Watermark(Watermark::new(i64::from_be_bytes(
                read_array(payload, 0)?,
            ))),
            FrameType::WatermarkStatus => Frame::WatermarkStatus(match payload[0] {
                STATUS_ACTIVE => WatermarkStatus::Active,
                STATUS_IDLE => WatermarkStatus::Idle,
                other => bail!("unknown watermark status: {}", other),
            }),
            FrameType::Barrier => Frame::Barrier(Barrier::with_options(
                u64::from_be_bytes(read_array(payload, 0)?),
                i64::from_be_bytes(read_array(payload, 8)?),
                decode_options(payload[16])?,
            )),
            FrameType::EndOfChannel => Frame::EndOfChannel,
            FrameType::CancelCheckpoint => {
                Frame::CancelCheckpoint(u64::from_be_bytes(read_array(payload, 0)?))
            }
        };
        Ok(frame)
    }
}

/// Read the declared body length from a frame header.
pub fn decode_header(header: [u8; FRAME_HEADER_BYTES]) -> usize {
    u32::from_be_bytes(header) as usize
}

fn read_array(payload: &[u8], offset: usize) -> Result<[u8; 8]> {
    payload
        .get(offset..offset + 8)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| anyhow!("truncated control marker"))
}

fn encode_options(options: &CheckpointOptions) -> u8 {
    let mut flags = 0;
    if options.alignment == AlignmentMode::Unaligned {
        flags |= FLAG_UNALIGNED;
    }
    if options.at_least_once {
        flags |= FLAG_AT_LEAST_ONCE;
    }
    flags
}

fn decode_options(flags: u8) -> Result<CheckpointOptions> {
    if flags & !KNOWN_FLAGS != 0 {
        bail!("unknown barrier option flags: {:#04x}", flags);
    }
    Ok(CheckpointOptions {
        alignment: if flags & FLAG_UNALIGNED != 0 {
            AlignmentMode::Unaligned
        } else {
            AlignmentMode::Aligned
        },
        at_least_once: flags & FLAG_AT_LEAST_ONCE != 0,
    })
}

/// Write one encoded frame; used by producers and transport tests.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/frame_tests.rs"]
mod tests;
