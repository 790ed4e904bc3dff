//! # Scalebridge - Network Bridge for Serial Weighing Scales
//!
//! Scalebridge sits between networked clients and serial-attached weighing scales. A
//! client sends `SEND:<port>` over TCP and gets back one stable weight for that port;
//! meanwhile every decoded weight is pushed to long-lived subscriber connections.
//!
//! ## Features
//!
//! - **On-demand acquisition**: one stable reading per trigger, with a per-port timeout.
//! - **Serialized hardware access**: a single global lock, so only one port is read at a time.
//! - **Incremental framing**: frames split across serial reads decode exactly once.
//! - **Subscriber push**: readings fan out to a listener port and to configured targets.
//! - **TTY-aware logging**: timestamped lines to a log file and the console.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scalebridge::bridge::BridgeService;
//! use scalebridge::config::Config;
//! use scalebridge::scale::SerialLink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let service = BridgeService::bind(config, Arc::new(SerialLink)).await?;
//!     service.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`scale`] - frame decoding, stability judgment, serial link and the scale channel
//! - [`bridge`] - acquisition coordinator, trigger server, broadcaster and service wiring
//! - [`config`] - configuration loading and validation
//! - [`error`] - typed errors
//! - [`metrics`] - process-wide counters
//! - [`logutil`] - log formatting helpers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │ Trigger Server  │      │  Broadcaster    │ → subscribers
//! └─────────────────┘      └─────────────────┘
//!          │                        ↑
//! ┌─────────────────┐               │
//! │  Coordinator    │ ← global lock │
//! └─────────────────┘               │
//!          │                        │
//! ┌─────────────────┐               │
//! │ Scale Channel   │ ──────────────┘
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Serial Link    │ ← reader thread
//! └─────────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod logutil;
pub mod metrics;
pub mod scale;
