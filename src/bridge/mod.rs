//! # Network Bridge Module
//!
//! Turns network requests into serialized scale acquisitions and pushes readings to
//! subscribers:
//!
//! - [`coordinator`] - the global hardware lock and the result/timeout race
//! - [`server`] - `SEND:<port>` trigger listener
//! - [`broadcast`] - subscriber registry fed by every decoded reading
//! - [`service`] - startup and orderly shutdown of all of the above

pub mod broadcast;
pub mod coordinator;
pub mod server;
pub mod service;

pub use broadcast::{Broadcaster, SubscriberId};
pub use coordinator::{Acquisition, AcquisitionCoordinator};
pub use server::{handle_trigger, parse_request, TriggerServer};
pub use service::BridgeService;

use std::time::Duration;

/// Pause after a failed `accept()` so a persistent error (e.g. EMFILE) does not spin.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) async fn accept_backoff(listener: &str, e: &std::io::Error) {
    log::warn!("{} accept failed: {} (retrying in {:?})", listener, e, ACCEPT_BACKOFF);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn accept_error_pauses_before_retry() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "too many open files");
        let started = Instant::now();
        accept_backoff("Trigger", &err).await;
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }
}
