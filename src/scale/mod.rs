//! # Scale Device Module
//!
//! Everything between the serial wire and a judged weight value:
//!
//! - [`framer`] - incremental decoder for the scale's binary frames
//! - [`stability`] - settled-weight judgment over the last few samples
//! - [`link`] - the physical connection (serial port, or in-memory for tests)
//! - [`channel`] - the one active connection, decoding only while a request is pending
//!
//! ## Wire format
//!
//! ```text
//! positive: BB <status> d d d d d d
//! negative: BB E0 <status> d d d d d d
//! status:   E2 = error, E3 = overload, anything else = normal
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod channel;
pub mod framer;
pub mod link;
pub mod stability;

pub use channel::{PendingAcquisition, ReadingSink, ScaleChannel};
pub use framer::{FrameDecoder, RawFrame};
pub use link::{LinkHandle, MemoryLink, ScaleLink, SerialLink};
pub use stability::StabilityFilter;

use crate::error::ScaleFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Normal,
    Error,
    Overload,
}

impl Classification {
    pub fn fault(self) -> Option<ScaleFault> {
        match self {
            Classification::Normal => None,
            Classification::Error => Some(ScaleFault::Error),
            Classification::Overload => Some(ScaleFault::Overload),
        }
    }
}

/// One decoded weight value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightReading {
    pub value: f64,
    pub classification: Classification,
    /// Set by the channel once the stability window has judged this reading.
    pub stable: bool,
    pub received_at: DateTime<Utc>,
}

impl WeightReading {
    pub fn new(value: f64, classification: Classification) -> Self {
        Self {
            value,
            classification,
            stable: false,
            received_at: Utc::now(),
        }
    }

    pub fn is_fault(&self) -> bool {
        self.classification != Classification::Normal
    }
}

/// Format a weight with at most three fractional digits, trailing zeros trimmed.
pub fn format_weight(value: f64) -> String {
    let mut s = format!("{:.3}", value);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}
