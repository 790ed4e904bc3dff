//! Typed errors for the scale pipeline and configuration loading.
//!
//! Everything below configuration loading is recoverable: channel and fault
//! errors are logged at the component boundary and never stop the process.

use thiserror::Error;

/// Fault reported by the scale itself through the frame status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScaleFault {
    #[error("scale reported an error status")]
    Error,
    #[error("scale reported an overload")]
    Overload,
}

/// Failure to bring up the physical connection for a profile.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("cannot open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("serial support not compiled in (enable the 'serial' feature)")]
    Unsupported,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup-only configuration problems. These abort the service.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("no serial port profiles configured")]
    NoProfiles,

    #[error("duplicate serial port profile name: {0}")]
    DuplicateProfile(String),

    #[error("profile {name}: data_bits must be between 5 and 8 (got {value})")]
    DataBits { name: String, value: u8 },

    #[error("profile {name}: timeout_ms must be greater than zero")]
    ZeroTimeout { name: String },

    #[error("profile {name}: decimal_places must be at most {max} (got {value})")]
    DecimalPlaces { name: String, value: u32, max: u32 },

    #[error("trigger.request_timeout_ms must be greater than zero")]
    ZeroRequestTimeout,

    #[error("profile name cannot be empty or contain ':'")]
    InvalidName,
}
