//! Physical connection to the scale.
//!
//! A [`ScaleLink`] opens a port for a [`PortProfile`] and hands back a stream of raw
//! byte chunks. The serial implementation reads on a dedicated thread so blocking
//! port reads never stall the async runtime; the device is read continuously even
//! when nobody is waiting for a weight, which keeps it from backing up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::{mpsc, oneshot};

use crate::config::PortProfile;
use crate::error::ChannelError;

/// How long `close` waits for a reader thread to release its port.
const CLOSE_WAIT: Duration = Duration::from_secs(1);

pub trait ScaleLink: Send + Sync + 'static {
    fn open(&self, profile: &PortProfile) -> Result<LinkHandle, ChannelError>;
}

/// Byte stream of an open port plus the means to stop it.
pub struct LinkHandle {
    pub chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    pub control: LinkControl,
}

pub struct LinkControl {
    stop: Arc<AtomicBool>,
    done: Option<oneshot::Receiver<()>>,
}

impl LinkControl {
    pub fn new(stop: Arc<AtomicBool>, done: Option<oneshot::Receiver<()>>) -> Self {
        Self { stop, done }
    }

    /// Signal the reader to stop and wait (bounded) until it has released the port.
    pub async fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(done) = self.done.take() {
            if tokio::time::timeout(CLOSE_WAIT, done).await.is_err() {
                debug!("reader did not confirm shutdown within {:?}", CLOSE_WAIT);
            }
        }
    }
}

impl Drop for LinkControl {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(feature = "serial")]
pub use serial::SerialLink;

#[cfg(feature = "serial")]
mod serial {
    use std::io::Read;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use log::{debug, info, trace, warn};
    use serialport::{DataBits, FlowControl, SerialPort};
    use tokio::sync::{mpsc, oneshot};

    use super::{LinkControl, LinkHandle, ScaleLink};
    use crate::config::{Handshake, Parity, PortProfile, StopBits};
    use crate::error::ChannelError;
    use crate::logutil::hex_snippet;

    const READ_TIMEOUT: Duration = Duration::from_millis(100);

    /// Serial port link backed by the `serialport` crate.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SerialLink;

    impl ScaleLink for SerialLink {
        fn open(&self, profile: &PortProfile) -> Result<LinkHandle, ChannelError> {
            let path = profile.device_path().to_string();
            debug!(
                "Opening serial port {} at {} baud (data bits {}, parity {:?}, stop bits {:?}, handshake {:?})",
                path,
                profile.baud_rate,
                profile.data_bits,
                profile.parity,
                profile.stop_bits,
                profile.handshake
            );

            let port = serialport::new(&path, profile.baud_rate)
                .data_bits(data_bits(profile.data_bits))
                .parity(parity(profile.parity))
                .stop_bits(stop_bits(profile.stop_bits))
                .flow_control(flow_control(profile.handshake))
                .timeout(READ_TIMEOUT)
                .open()
                .map_err(|e| ChannelError::Open {
                    port: path.clone(),
                    reason: e.to_string(),
                })?;

            let (tx, rx) = mpsc::unbounded_channel();
            let (done_tx, done_rx) = oneshot::channel();
            let stop = Arc::new(AtomicBool::new(false));
            let thread_stop = stop.clone();
            let thread_path = path.clone();
            std::thread::Builder::new()
                .name(format!("serial-{}", profile.name))
                .spawn(move || {
                    read_loop(port, tx, thread_stop, &thread_path);
                    let _ = done_tx.send(());
                })?;

            info!("Serial port opened: {}", path);
            Ok(LinkHandle {
                chunks: rx,
                control: LinkControl::new(stop, Some(done_rx)),
            })
        }
    }

    fn read_loop(
        mut port: Box<dyn SerialPort>,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        stop: Arc<AtomicBool>,
        path: &str,
    ) {
        let mut buffer = [0u8; 1024];
        while !stop.load(Ordering::Relaxed) {
            match port.read(&mut buffer) {
                Ok(0) => {}
                Ok(n) => {
                    trace!("RAW {} bytes from {}: {}", n, path, hex_snippet(&buffer[..n], 64));
                    if tx.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("Serial read error on {}: {} (closing port)", path, e);
                    break;
                }
            }
        }
        debug!("Serial reader for {} stopped", path);
    }

    fn data_bits(bits: u8) -> DataBits {
        match bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        }
    }

    fn parity(p: Parity) -> serialport::Parity {
        match p {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }

    fn stop_bits(s: StopBits) -> serialport::StopBits {
        match s {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }

    fn flow_control(h: Handshake) -> FlowControl {
        match h {
            Handshake::None => FlowControl::None,
            Handshake::Software => FlowControl::Software,
            Handshake::Hardware => FlowControl::Hardware,
        }
    }
}

/// In-process link: bytes passed to [`MemoryLink::feed`] arrive on the most recently
/// opened port. Used by tests and dry runs without hardware.
#[derive(Debug, Default)]
pub struct MemoryLink {
    state: Mutex<MemoryLinkState>,
}

#[derive(Debug, Default)]
struct MemoryLinkState {
    current: Option<mpsc::UnboundedSender<Vec<u8>>>,
    opens: Vec<(String, Instant)>,
    fail_opens: bool,
}

impl MemoryLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver a chunk to the open port. Returns false when no port is open.
    pub fn feed(&self, bytes: &[u8]) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &state.current {
            Some(tx) => tx.send(bytes.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Profile names opened so far, with the instant of each open.
    pub fn opens(&self) -> Vec<(String, Instant)> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .opens
            .clone()
    }

    pub fn fail_opens(&self, fail: bool) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_opens = fail;
    }
}

impl ScaleLink for MemoryLink {
    fn open(&self, profile: &PortProfile) -> Result<LinkHandle, ChannelError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.fail_opens {
            return Err(ChannelError::Open {
                port: profile.device_path().to_string(),
                reason: "port unavailable".to_string(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.current = Some(tx);
        state.opens.push((profile.name.clone(), Instant::now()));
        Ok(LinkHandle {
            chunks: rx,
            control: LinkControl::new(Arc::new(AtomicBool::new(false)), None),
        })
    }
}

/// Link used when serial support is compiled out: every open fails.
#[cfg(not(feature = "serial"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialLink;

#[cfg(not(feature = "serial"))]
impl ScaleLink for SerialLink {
    fn open(&self, _profile: &PortProfile) -> Result<LinkHandle, ChannelError> {
        Err(ChannelError::Unsupported)
    }
}
