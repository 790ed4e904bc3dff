//! Serialized access to the scale hardware.
//!
//! One async mutex around the [`ScaleChannel`] is the global hardware lock: at most one
//! acquisition is in flight across all profiles. Waiters are not queued in arrival
//! order; tokio's fair mutex happens to grant it in FIFO order, but callers must not
//! rely on that.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::PortProfile;
use crate::error::ScaleFault;
use crate::metrics;
use crate::scale::framer::SENTINEL;
use crate::scale::{ReadingSink, ScaleChannel, ScaleLink, WeightReading};

/// Result of an acquisition that did not fault.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Acquisition {
    Stable(f64),
    TimedOut,
}

impl Acquisition {
    /// Weight reported to clients; a timeout maps to the sentinel.
    pub fn value(&self) -> f64 {
        match self {
            Acquisition::Stable(v) => *v,
            Acquisition::TimedOut => SENTINEL,
        }
    }
}

pub struct AcquisitionCoordinator {
    channel: Mutex<ScaleChannel>,
}

impl AcquisitionCoordinator {
    pub fn new(link: Arc<dyn ScaleLink>) -> Self {
        Self {
            channel: Mutex::new(ScaleChannel::new(link)),
        }
    }

    /// Register an observer for every decoded reading.
    pub async fn add_sink(&self, sink: Arc<dyn ReadingSink>) {
        self.channel.lock().await.add_sink(sink);
    }

    pub async fn acquire(&self, profile: &PortProfile) -> Result<Acquisition, ScaleFault> {
        self.acquire_with_timeout(profile, profile.timeout()).await
    }

    /// Obtain one stable reading for `profile`, waiting at most `timeout` once the
    /// hardware lock is held. The pending slot is cleared and the lock released on
    /// every exit path, including cancellation of this future. The channel is left
    /// open afterwards.
    pub async fn acquire_with_timeout(
        &self,
        profile: &PortProfile,
        timeout: Duration,
    ) -> Result<Acquisition, ScaleFault> {
        let mut channel = self.channel.lock().await;
        debug!("Acquisition started on {} (timeout {:?})", profile.name, timeout);

        if let Err(e) = channel.open(profile).await {
            warn!("Failed to open {}: {}", profile.name, e);
        }

        let mut pending = channel.arm();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let result = tokio::select! {
            Some(outcome) = pending.wait() => {
                outcome.map(|reading: WeightReading| Acquisition::Stable(reading.value))
            }
            _ = &mut deadline => {
                metrics::inc_timeouts();
                info!("Acquisition on {} timed out after {:?}", profile.name, timeout);
                Ok(Acquisition::TimedOut)
            }
        };
        drop(pending);
        result
    }

    pub async fn last_reading(&self) -> Option<WeightReading> {
        self.channel.lock().await.last_reading()
    }

    /// Close the channel, waiting for any in-flight acquisition to finish first.
    pub async fn close(&self) {
        self.channel.lock().await.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::scale::framer::{encode, STATUS_ERROR, STATUS_NORMAL};
    use crate::scale::MemoryLink;

    fn profile() -> PortProfile {
        Config::default().serial_ports.remove(0)
    }

    /// Feed the same frame every 300ms until the returned task is aborted.
    fn feed_steadily(link: Arc<MemoryLink>, frame: Vec<u8>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                link.feed(&frame);
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        })
    }

    #[tokio::test]
    async fn stable_stream_yields_value() {
        let link = MemoryLink::new();
        let coordinator = AcquisitionCoordinator::new(link.clone());
        let feeder = feed_steadily(link.clone(), encode(1200, false, STATUS_NORMAL));

        let result = coordinator
            .acquire_with_timeout(&profile(), Duration::from_secs(3))
            .await;
        feeder.abort();
        assert_eq!(result, Ok(Acquisition::Stable(12.0)));
        assert!(coordinator.last_reading().await.unwrap().stable);
    }

    #[tokio::test]
    async fn silent_channel_times_out_with_sentinel() {
        let link = MemoryLink::new();
        let coordinator = AcquisitionCoordinator::new(link);
        let result = coordinator
            .acquire_with_timeout(&profile(), Duration::from_millis(150))
            .await
            .unwrap();
        assert_eq!(result, Acquisition::TimedOut);
        assert_eq!(result.value(), -1.0);
    }

    #[tokio::test]
    async fn open_failure_runs_to_timeout() {
        let link = MemoryLink::new();
        link.fail_opens(true);
        let coordinator = AcquisitionCoordinator::new(link);
        let result = coordinator
            .acquire_with_timeout(&profile(), Duration::from_millis(100))
            .await;
        assert_eq!(result, Ok(Acquisition::TimedOut));
    }

    #[tokio::test]
    async fn fault_frame_fails_acquisition() {
        let link = MemoryLink::new();
        let coordinator = Arc::new(AcquisitionCoordinator::new(link.clone()));
        let feeder = feed_steadily(link.clone(), encode(0, false, STATUS_ERROR));
        let result = coordinator
            .acquire_with_timeout(&profile(), Duration::from_secs(2))
            .await;
        feeder.abort();
        assert_eq!(result, Err(ScaleFault::Error));
    }

    #[tokio::test]
    async fn cancelled_acquisition_releases_lock() {
        let link = MemoryLink::new();
        let coordinator = AcquisitionCoordinator::new(link);
        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            coordinator.acquire_with_timeout(&profile(), Duration::from_secs(30)),
        )
        .await;
        assert!(cancelled.is_err());

        let again = tokio::time::timeout(
            Duration::from_secs(1),
            coordinator.acquire_with_timeout(&profile(), Duration::from_millis(50)),
        )
        .await
        .expect("lock must be free after cancellation");
        assert_eq!(again, Ok(Acquisition::TimedOut));
    }
}
