//! Push every decoded weight to long-lived subscriber connections.
//!
//! The subscriber registry is owned by one task and mutated only through commands
//! sent by a cloneable [`Broadcaster`] handle. Publishing never waits on the network:
//! the decode pipeline just enqueues the reading and returns. The task writes each
//! reading as one CRLF-terminated line to every subscriber in turn; a subscriber
//! whose write fails or exceeds the write timeout is dropped and closed, and the
//! rest are unaffected. There is no per-subscriber backlog.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};

use super::accept_backoff;
use crate::config::TcpTarget;
use crate::metrics;
use crate::scale::{format_weight, ReadingSink, WeightReading};

pub type SubscriberId = u64;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Subscriber {
    id: SubscriberId,
    label: String,
    writer: Writer,
}

enum BroadcastCommand {
    Register(Subscriber),
    Unregister(SubscriberId),
    Publish(f64),
    Count(oneshot::Sender<usize>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct Broadcaster {
    tx: mpsc::UnboundedSender<BroadcastCommand>,
    next_id: Arc<AtomicU64>,
}

impl Broadcaster {
    /// Spawn the registry task and return a handle to it.
    pub fn start(write_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_registry(rx, write_timeout));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn register<W>(&self, writer: W, label: impl Into<String>) -> SubscriberId
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(BroadcastCommand::Register(Subscriber {
            id,
            label: label.into(),
            writer: Box::new(writer),
        }));
        id
    }

    pub fn unregister(&self, id: SubscriberId) {
        let _ = self.tx.send(BroadcastCommand::Unregister(id));
    }

    pub fn publish_value(&self, value: f64) {
        let _ = self.tx.send(BroadcastCommand::Publish(value));
    }

    /// Current number of subscribers, or 0 once the registry task has stopped.
    pub async fn subscriber_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(BroadcastCommand::Count(tx)).is_ok() {
            rx.await.unwrap_or(0)
        } else {
            0
        }
    }

    /// Close every subscriber and stop the registry task.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(BroadcastCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl ReadingSink for Broadcaster {
    fn publish(&self, reading: &WeightReading) {
        self.publish_value(reading.value);
    }
}

async fn run_registry(mut rx: mpsc::UnboundedReceiver<BroadcastCommand>, write_timeout: Duration) {
    let mut subscribers: Vec<Subscriber> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        match cmd {
            BroadcastCommand::Register(sub) => {
                info!("Subscriber {} registered ({})", sub.id, sub.label);
                subscribers.push(sub);
            }
            BroadcastCommand::Unregister(id) => {
                let found = subscribers.iter().position(|s| s.id == id);
                if let Some(pos) = found {
                    let mut sub = subscribers.remove(pos);
                    let _ = sub.writer.shutdown().await;
                    info!("Subscriber {} unregistered ({})", sub.id, sub.label);
                }
            }
            BroadcastCommand::Publish(value) => {
                let line = format!("{}\r\n", format_weight(value));
                let mut kept = Vec::with_capacity(subscribers.len());
                for mut sub in subscribers.drain(..) {
                    match tokio::time::timeout(write_timeout, sub.writer.write_all(line.as_bytes()))
                        .await
                    {
                        Ok(Ok(())) => kept.push(sub),
                        Ok(Err(e)) => {
                            metrics::inc_subscribers_dropped();
                            warn!("Dropping subscriber {} ({}): {}", sub.id, sub.label, e);
                        }
                        Err(_) => {
                            metrics::inc_subscribers_dropped();
                            warn!(
                                "Dropping subscriber {} ({}): write exceeded {:?}",
                                sub.id, sub.label, write_timeout
                            );
                        }
                    }
                }
                subscribers = kept;
            }
            BroadcastCommand::Count(reply) => {
                let _ = reply.send(subscribers.len());
            }
            BroadcastCommand::Shutdown(done) => {
                for sub in subscribers.iter_mut() {
                    let _ = sub.writer.shutdown().await;
                }
                debug!("Broadcaster stopped ({} subscribers closed)", subscribers.len());
                let _ = done.send(());
                break;
            }
        }
    }
}

/// Accept subscriber connections until `shutdown` flips to true.
pub async fn serve_subscribers(
    listener: TcpListener,
    broadcaster: Broadcaster,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    broadcaster.register(stream, peer.to_string());
                }
                Err(e) => accept_backoff("Subscriber", &e).await,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Subscriber listener stopped");
}

/// Dial each configured target once and register the ones that answer.
pub async fn connect_targets(broadcaster: &Broadcaster, targets: &[TcpTarget]) -> usize {
    let mut connected = 0;
    for target in targets {
        let addr = target.addr();
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                broadcaster.register(stream, addr);
                connected += 1;
            }
            Err(e) => warn!("Cannot reach subscriber target {}: {}", addr, e),
        }
    }
    connected
}
