//! Wire framing for non-raw links.
//!
//! Frame layout (multi-byte fields MSB first):
//!
//! ```text
//! ┌──────┬──────┬─────┬────────┬────────┬──────────────┬─────┬────────┬────────┐
//! │ SYNC │ SYNC │ STX │ LEN_HI │ LEN_LO │ payload[LEN] │ ETX │ CRC_HI │ CRC_LO │
//! │ 0x22 │ 0x22 │0x02 │        │        │              │0x03 │        │        │
//! └──────┴──────┴─────┴────────┴────────┴──────────────┴─────┴────────┴────────┘
//! ```
//!
//! The CRC covers `payload ++ ETX`. A frame is therefore `LEN + 8` bytes.
//!
//! Scanning is tolerant: a candidate that fails any check is skipped one byte
//! at a time, so noise in front of a good frame costs only the noise.

pub mod crc;

use thiserror::Error;

use crate::error::{CommsError, Result};

pub use crc::{crc16, Crc16};

/// Sync byte, sent twice
pub const SYNC: u8 = 0x22;
/// Start-of-text marker following the sync pair
pub const STX: u8 = 0x02;
/// End-of-text marker following the payload
pub const ETX: u8 = 0x03;

/// The three bytes every frame starts with
pub const MARKER: [u8; 3] = [SYNC, SYNC, STX];
/// Marker plus 16-bit length
pub const HEADER_LEN: usize = 5;
/// ETX plus 16-bit CRC
pub const TRAILER_LEN: usize = 3;
/// Bytes added around every payload
pub const FRAME_OVERHEAD: usize = HEADER_LEN + TRAILER_LEN;
/// Largest payload the length field can express
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Location of a valid frame inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMatch {
    /// Where the marker starts
    pub offset: usize,
    /// Payload length
    pub len: usize,
}

impl FrameMatch {
    /// Bytes occupied by the frame itself
    pub fn frame_len(&self) -> usize {
        self.len + FRAME_OVERHEAD
    }

    /// Bytes to discard from the front of the buffer, including skipped noise
    pub fn consumed(&self) -> usize {
        self.offset + self.frame_len()
    }

    /// The payload slice within the scanned buffer
    pub fn payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        let start = self.offset + HEADER_LEN;
        &buf[start..start + self.len]
    }
}

/// Why a candidate position is not a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Desync {
    #[error("no frame marker")]
    BadMarker,
    #[error("truncated frame: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("missing end marker")]
    BadTerminator,
    #[error("crc mismatch: frame says {expected:#06x}, computed {actual:#06x}")]
    BadCrc { expected: u16, actual: u16 },
    #[error("{extra} trailing bytes after frame")]
    TrailingBytes { extra: usize },
}

impl From<Desync> for CommsError {
    fn from(desync: Desync) -> Self {
        CommsError::ProtocolDesync {
            reason: desync.to_string(),
        }
    }
}

/// Wrap a payload in a frame
///
/// # Errors
///
/// `PayloadTooLarge` if the payload does not fit the 16-bit length field.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(CommsError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_FRAME_PAYLOAD,
        });
    }

    let len = payload.len() as u16;
    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&MARKER);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame.push(ETX);

    let crc = crc16(&frame[HEADER_LEN..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    Ok(frame)
}

/// Validate the candidate frame starting at `pos`, returning its payload length
pub fn check_at(buf: &[u8], pos: usize) -> std::result::Result<usize, Desync> {
    let avail = &buf[pos.min(buf.len())..];
    if avail.len() < HEADER_LEN {
        return Err(Desync::Truncated {
            needed: HEADER_LEN,
            have: avail.len(),
        });
    }
    if avail[..MARKER.len()] != MARKER {
        return Err(Desync::BadMarker);
    }

    let len = u16::from_be_bytes([avail[3], avail[4]]) as usize;
    let needed = len + FRAME_OVERHEAD;
    if avail.len() < needed {
        return Err(Desync::Truncated {
            needed,
            have: avail.len(),
        });
    }

    let etx_at = HEADER_LEN + len;
    if avail[etx_at] != ETX {
        return Err(Desync::BadTerminator);
    }

    let expected = u16::from_be_bytes([avail[etx_at + 1], avail[etx_at + 2]]);
    let actual = crc16(&avail[HEADER_LEN..=etx_at]);
    if expected != actual {
        return Err(Desync::BadCrc { expected, actual });
    }

    Ok(len)
}

/// Find the first complete, CRC-valid frame in `buf`
pub fn find_frame(buf: &[u8]) -> Option<FrameMatch> {
    let mut pos = 0;
    while pos + FRAME_OVERHEAD <= buf.len() {
        match check_at(buf, pos) {
            Ok(len) => return Some(FrameMatch { offset: pos, len }),
            Err(Desync::BadMarker) => {}
            Err(reason) => tracing::trace!(pos, %reason, "skipping frame candidate"),
        }
        pos += 1;
    }
    None
}

/// Number of leading bytes that cannot be the start of any frame
///
/// Everything before the first full or partial marker is noise and may be
/// discarded once a scan has failed.
pub fn discardable_prefix(buf: &[u8]) -> usize {
    (0..buf.len())
        .find(|&i| {
            let tail = &buf[i..];
            let n = tail.len().min(MARKER.len());
            tail[..n] == MARKER[..n]
        })
        .unwrap_or(buf.len())
}

/// Decode exactly one complete frame
///
/// # Errors
///
/// `ProtocolDesync` naming the first check that failed.
pub fn decode(frame: &[u8]) -> Result<Vec<u8>> {
    let len = check_at(frame, 0)?;
    let extra = frame.len() - (len + FRAME_OVERHEAD);
    if extra > 0 {
        return Err(Desync::TrailingBytes { extra }.into());
    }
    Ok(frame[HEADER_LEN..HEADER_LEN + len].to_vec())
}
