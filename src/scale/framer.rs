//! Incremental decoder for the scale's binary weight frames.
//!
//! The scale streams fixed-size frames:
//!
//!   positive: `[0xBB][status][6 ASCII digits]`        (8 bytes)
//!   negative: `[0xBB][0xE0][status][6 ASCII digits]`  (9 bytes)
//!
//! Status `0xE2` is an error, `0xE3` an overload, anything else a normal reading.
//! The decoder can be fed arbitrary chunks and yields whole frames when available.
//! A frame's bytes leave the buffer only once the whole frame has been parsed.
use bytes::{Buf, BytesMut};

use super::{Classification, WeightReading};

pub const MARKER: u8 = 0xBB;
pub const NEGATIVE: u8 = 0xE0;
/// Status the scale sends for an ordinary reading; any non-fault status is treated the same.
pub const STATUS_NORMAL: u8 = 0xE1;
pub const STATUS_ERROR: u8 = 0xE2;
pub const STATUS_OVERLOAD: u8 = 0xE3;

const PAYLOAD_LEN: usize = 6;
const POSITIVE_FRAME_LEN: usize = 2 + PAYLOAD_LEN;
const NEGATIVE_FRAME_LEN: usize = 3 + PAYLOAD_LEN;

/// Magnitude reported when the payload is not a number.
pub const SENTINEL: f64 = -1.0;

/// One complete frame as it appeared on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    pub marker: u8,
    pub negative: bool,
    pub status: u8,
    pub payload: [u8; PAYLOAD_LEN],
}

impl RawFrame {
    pub fn classification(&self) -> Classification {
        match self.status {
            STATUS_ERROR => Classification::Error,
            STATUS_OVERLOAD => Classification::Overload,
            _ => Classification::Normal,
        }
    }

    pub fn wire_len(&self) -> usize {
        if self.negative {
            NEGATIVE_FRAME_LEN
        } else {
            POSITIVE_FRAME_LEN
        }
    }

    /// Scaled, signed value of the frame. An unparseable payload gives [`SENTINEL`]
    /// and the sign is not applied to it.
    pub fn value(&self, decimal_places: u32) -> f64 {
        let cleaned: String = self
            .payload
            .iter()
            .map(|&b| b as char)
            .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '+')
            .collect();
        let raw = match cleaned.parse::<i64>() {
            Ok(raw) => raw,
            Err(_) => return SENTINEL,
        };
        let magnitude = if decimal_places == 0 {
            raw as f64
        } else {
            raw as f64 / 10f64.powi(decimal_places as i32)
        };
        if self.negative {
            -magnitude
        } else {
            magnitude
        }
    }

    pub fn into_reading(self, decimal_places: u32) -> WeightReading {
        WeightReading::new(self.value(decimal_places), self.classification())
    }
}

/// Build the wire bytes for an unscaled magnitude (0..=999999), as the scale would send it.
pub fn encode(magnitude: u32, negative: bool, status: u8) -> Vec<u8> {
    let digits = format!("{:06}", magnitude % 1_000_000);
    let mut out = Vec::with_capacity(NEGATIVE_FRAME_LEN);
    out.push(MARKER);
    if negative {
        out.push(NEGATIVE);
    }
    out.push(status);
    out.extend_from_slice(digits.as_bytes());
    out
}

#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Extract the next complete frame, or None if the buffer holds no whole frame yet.
    /// Bytes before a marker can never become part of a frame and are dropped.
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        let idx = match self.buf.iter().position(|&b| b == MARKER) {
            Some(idx) => idx,
            None => {
                self.buf.clear();
                return None;
            }
        };
        if idx > 0 {
            self.buf.advance(idx);
        }
        if self.buf.len() < POSITIVE_FRAME_LEN {
            return None;
        }

        let negative = self.buf[1] == NEGATIVE;
        let (status, start) = if negative {
            if self.buf.len() < NEGATIVE_FRAME_LEN {
                return None;
            }
            (self.buf[2], 3)
        } else {
            (self.buf[1], 2)
        };

        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&self.buf[start..start + PAYLOAD_LEN]);
        let frame = RawFrame {
            marker: self.buf[0],
            negative,
            status,
            payload,
        };
        self.buf.advance(frame.wire_len());
        Some(frame)
    }

    /// Push a chunk and drain every frame it completes, in arrival order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<RawFrame> {
        self.push(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }
}
