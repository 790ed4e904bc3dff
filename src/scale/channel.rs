//! The single active scale connection.
//!
//! A [`ScaleChannel`] is either closed or open for one [`PortProfile`]. While open, a
//! decode worker task drains the link's byte chunks in arrival order. Chunks are only
//! decoded while a [`PendingAcquisition`] is armed; otherwise they are read and thrown
//! away so the device never backs up. Arming drops any partial frame left over from
//! the previous request, so decoding restarts at the next marker byte.
//!
//! The stability window lives as long as the channel and is never reset between
//! requests; old samples simply age out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::{debug, info, trace, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::framer::FrameDecoder;
use super::link::{LinkControl, LinkHandle, ScaleLink};
use super::stability::StabilityFilter;
use super::{format_weight, WeightReading};
use crate::config::PortProfile;
use crate::error::{ChannelError, ScaleFault};
use crate::logutil::hex_snippet;
use crate::metrics;

/// Receives every decoded reading, stable or not, faulted or not.
pub trait ReadingSink: Send + Sync {
    fn publish(&self, reading: &WeightReading);
}

/// What a pending acquisition resolves to.
pub type Outcome = Result<WeightReading, ScaleFault>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct DecodeState {
    decoder: FrameDecoder,
    filter: StabilityFilter,
    decimal_places: u32,
}

struct Shared {
    armed: AtomicBool,
    pending: Mutex<Option<oneshot::Sender<Outcome>>>,
    decode: Mutex<DecodeState>,
    last: Mutex<Option<WeightReading>>,
    sinks: Mutex<Vec<Arc<dyn ReadingSink>>>,
}

impl Shared {
    fn handle_chunk(&self, chunk: &[u8], port: &str) {
        if !self.armed.load(Ordering::Acquire) {
            metrics::inc_chunks_discarded();
            trace!("{}: no pending request, discarding {} bytes", port, chunk.len());
            return;
        }
        trace!("{}: frame bytes {}", port, hex_snippet(chunk, 32));

        let readings = {
            let mut state = lock(&self.decode);
            let decimal_places = state.decimal_places;
            let frames = state.decoder.feed(chunk);
            let mut readings = Vec::with_capacity(frames.len());
            for frame in frames {
                let mut reading = frame.into_reading(decimal_places);
                let now = Instant::now();
                if reading.is_fault() {
                    state.filter.push(reading.value, now);
                } else {
                    reading.stable = state.filter.observe(reading.value, now);
                }
                readings.push(reading);
            }
            readings
        };

        for reading in readings {
            self.dispatch(reading, port);
        }
    }

    fn dispatch(&self, reading: WeightReading, port: &str) {
        metrics::inc_frames_decoded();
        debug!(
            "{}: weight parsed {} ({:?}, stable={})",
            port,
            format_weight(reading.value),
            reading.classification,
            reading.stable
        );
        *lock(&self.last) = Some(reading.clone());

        let sinks = lock(&self.sinks).clone();
        for sink in sinks {
            sink.publish(&reading);
        }

        let outcome = match reading.classification.fault() {
            Some(fault) => {
                metrics::inc_faults();
                warn!("{}: {}", port, fault);
                Err(fault)
            }
            None if reading.stable => {
                metrics::inc_stable_readings();
                info!("{}: stable weight detected {}", port, format_weight(reading.value));
                Ok(reading)
            }
            None => return,
        };
        if let Some(tx) = lock(&self.pending).take() {
            let _ = tx.send(outcome);
        }
    }
}

struct OpenPort {
    profile: String,
    control: LinkControl,
    worker: JoinHandle<()>,
}

pub struct ScaleChannel {
    link: Arc<dyn ScaleLink>,
    shared: Arc<Shared>,
    open: Option<OpenPort>,
}

impl ScaleChannel {
    pub fn new(link: Arc<dyn ScaleLink>) -> Self {
        Self {
            link,
            shared: Arc::new(Shared {
                armed: AtomicBool::new(false),
                pending: Mutex::new(None),
                decode: Mutex::new(DecodeState {
                    decoder: FrameDecoder::new(),
                    filter: StabilityFilter::new(),
                    decimal_places: 0,
                }),
                last: Mutex::new(None),
                sinks: Mutex::new(Vec::new()),
            }),
            open: None,
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn ReadingSink>) {
        lock(&self.shared.sinks).push(sink);
    }

    /// Tear down any previous connection, then open the port for `profile`.
    /// On failure the channel stays closed and yields no frames.
    pub async fn open(&mut self, profile: &PortProfile) -> Result<(), ChannelError> {
        self.close().await;
        lock(&self.shared.decode).decimal_places = profile.decimal_places;

        let LinkHandle { chunks, control } = self.link.open(profile)?;
        let worker = tokio::spawn(decode_worker(
            chunks,
            self.shared.clone(),
            profile.name.clone(),
        ));
        self.open = Some(OpenPort {
            profile: profile.name.clone(),
            control,
            worker,
        });
        Ok(())
    }

    /// Release the physical connection. Safe to call when already closed.
    pub async fn close(&mut self) {
        if let Some(port) = self.open.take() {
            port.worker.abort();
            port.control.shutdown().await;
            info!("Scale channel {} closed", port.profile);
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn current_profile(&self) -> Option<&str> {
        self.open.as_ref().map(|p| p.profile.as_str())
    }

    pub fn last_reading(&self) -> Option<WeightReading> {
        lock(&self.shared.last).clone()
    }

    /// Start decoding on behalf of one request. Decoding stops when the returned
    /// guard is dropped, whichever way the request ends.
    pub fn arm(&mut self) -> PendingAcquisition {
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.decode).decoder.clear();
        *lock(&self.shared.pending) = Some(tx);
        self.shared.armed.store(true, Ordering::Release);
        PendingAcquisition {
            rx,
            shared: self.shared.clone(),
        }
    }
}

impl Drop for ScaleChannel {
    fn drop(&mut self) {
        if let Some(port) = self.open.take() {
            port.worker.abort();
        }
    }
}

async fn decode_worker(
    mut chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
    port: String,
) {
    while let Some(chunk) = chunks.recv().await {
        shared.handle_chunk(&chunk, &port);
    }
    debug!("{}: link closed, decode worker exiting", port);
}

/// An outstanding request for one stable reading. At most one exists because
/// arming requires exclusive access to the channel.
pub struct PendingAcquisition {
    rx: oneshot::Receiver<Outcome>,
    shared: Arc<Shared>,
}

impl PendingAcquisition {
    /// First stable reading or fault. None if the slot was dropped without a result.
    pub async fn wait(&mut self) -> Option<Outcome> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for PendingAcquisition {
    fn drop(&mut self) {
        self.shared.armed.store(false, Ordering::Release);
        lock(&self.shared.pending).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::scale::framer::{encode, STATUS_NORMAL, STATUS_OVERLOAD};
    use crate::scale::link::MemoryLink;
    use crate::scale::Classification;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<WeightReading>>);

    impl ReadingSink for Recorder {
        fn publish(&self, reading: &WeightReading) {
            self.0.lock().unwrap().push(reading.clone());
        }
    }

    fn profile() -> PortProfile {
        Config::default().serial_ports.remove(0)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn idle_bytes_are_discarded() {
        let link = MemoryLink::new();
        let recorder = Arc::new(Recorder::default());
        let mut channel = ScaleChannel::new(link.clone());
        channel.add_sink(recorder.clone());
        channel.open(&profile()).await.unwrap();

        assert!(link.feed(&encode(1200, false, STATUS_NORMAL)));
        settle().await;
        assert!(channel.last_reading().is_none());
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn armed_channel_decodes_and_publishes() {
        let link = MemoryLink::new();
        let recorder = Arc::new(Recorder::default());
        let mut channel = ScaleChannel::new(link.clone());
        channel.add_sink(recorder.clone());
        channel.open(&profile()).await.unwrap();

        let _pending = channel.arm();
        link.feed(&encode(1200, true, STATUS_NORMAL));
        settle().await;

        let last = channel.last_reading().unwrap();
        assert_eq!(last.value, -12.0);
        assert!(!last.stable);
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fault_completes_pending_with_error() {
        let link = MemoryLink::new();
        let mut channel = ScaleChannel::new(link.clone());
        channel.open(&profile()).await.unwrap();

        let mut pending = channel.arm();
        link.feed(&encode(0, false, STATUS_OVERLOAD));
        let outcome = tokio::time::timeout(Duration::from_secs(1), pending.wait())
            .await
            .unwrap();
        assert_eq!(outcome, Some(Err(ScaleFault::Overload)));
        assert_eq!(
            channel.last_reading().unwrap().classification,
            Classification::Overload
        );
    }

    #[tokio::test]
    async fn dropping_the_guard_disarms() {
        let link = MemoryLink::new();
        let mut channel = ScaleChannel::new(link.clone());
        channel.open(&profile()).await.unwrap();

        drop(channel.arm());
        link.feed(&encode(500, false, STATUS_NORMAL));
        settle().await;
        assert!(channel.last_reading().is_none());
    }

    #[tokio::test]
    async fn arming_drops_stale_partial_frame() {
        let link = MemoryLink::new();
        let mut channel = ScaleChannel::new(link.clone());
        channel.open(&profile()).await.unwrap();

        let first = channel.arm();
        let frame = encode(1200, false, STATUS_NORMAL);
        link.feed(&frame[..5]);
        settle().await;
        drop(first);

        let _second = channel.arm();
        link.feed(&frame[5..]);
        settle().await;
        assert!(channel.last_reading().is_none());

        link.feed(&frame);
        settle().await;
        assert_eq!(channel.last_reading().unwrap().value, 12.0);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_open_failure_leaves_channel_closed() {
        let link = MemoryLink::new();
        let mut channel = ScaleChannel::new(link.clone());
        channel.close().await;
        channel.open(&profile()).await.unwrap();
        assert_eq!(channel.current_profile(), Some("COM3"));
        channel.close().await;
        channel.close().await;
        assert!(!channel.is_open());

        link.fail_opens(true);
        assert!(matches!(
            channel.open(&profile()).await,
            Err(ChannelError::Open { .. })
        ));
        assert!(!channel.is_open());
    }
}
