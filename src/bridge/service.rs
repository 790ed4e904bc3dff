//! Top-level wiring: coordinator, broadcaster, subscriber sources and trigger server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::broadcast::{connect_targets, serve_subscribers, Broadcaster};
use super::coordinator::AcquisitionCoordinator;
use super::server::TriggerServer;
use crate::config::Config;
use crate::metrics;
use crate::scale::ScaleLink;

pub struct BridgeService {
    config: Arc<Config>,
    coordinator: Arc<AcquisitionCoordinator>,
    broadcaster: Broadcaster,
    trigger: TriggerServer,
    subscribers: Option<TcpListener>,
}

impl BridgeService {
    /// Bind every listener and connect the broadcaster to the scale channel.
    /// Nothing is served until [`BridgeService::run_until`].
    pub async fn bind(config: Config, link: Arc<dyn ScaleLink>) -> Result<Self> {
        let config = Arc::new(config);
        let coordinator = Arc::new(AcquisitionCoordinator::new(link));
        let broadcaster = Broadcaster::start(config.broadcast.write_timeout());
        coordinator.add_sink(Arc::new(broadcaster.clone())).await;

        let trigger = TriggerServer::bind(config.clone(), coordinator.clone())
            .await
            .with_context(|| {
                format!(
                    "binding trigger listener {}:{}",
                    config.trigger.bind, config.trigger.port
                )
            })?;

        let subscribers = match config.broadcast.listen_port {
            Some(port) => {
                let addr = format!("{}:{}", config.trigger.bind, port);
                let listener = TcpListener::bind(&addr)
                    .await
                    .with_context(|| format!("binding subscriber listener {}", addr))?;
                info!("Subscriber listener on {}", listener.local_addr()?);
                Some(listener)
            }
            None => None,
        };

        Ok(Self {
            config,
            coordinator,
            broadcaster,
            trigger,
            subscribers,
        })
    }

    pub fn trigger_addr(&self) -> std::io::Result<SocketAddr> {
        self.trigger.local_addr()
    }

    pub fn subscriber_addr(&self) -> Option<SocketAddr> {
        self.subscribers.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .await
    }

    /// Serve until `signal` resolves, then stop accepting, let in-flight triggers
    /// finish, close subscribers and release the serial port.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let BridgeService {
            config,
            coordinator,
            broadcaster,
            trigger,
            subscribers,
        } = self;

        let dialed = connect_targets(&broadcaster, &config.broadcast.targets).await;
        if !config.broadcast.targets.is_empty() {
            info!(
                "Connected to {}/{} subscriber targets",
                dialed,
                config.broadcast.targets.len()
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener_task = subscribers.map(|listener| {
            tokio::spawn(serve_subscribers(
                listener,
                broadcaster.clone(),
                shutdown_rx.clone(),
            ))
        });
        let trigger_task = tokio::spawn(trigger.run(shutdown_rx));

        signal.await;
        let _ = shutdown_tx.send(true);

        if let Err(e) = trigger_task.await {
            warn!("Trigger server task failed: {}", e);
        }
        if let Some(task) = listener_task {
            let _ = task.await;
        }
        broadcaster.shutdown().await;
        coordinator.close().await;

        let snapshot = metrics::snapshot();
        info!(
            "Shutdown complete: {} triggers served, {} rejected, {} stable, {} faults, {} timeouts",
            snapshot.triggers_served,
            snapshot.triggers_rejected,
            snapshot.stable_readings,
            snapshot.faults,
            snapshot.timeouts
        );
        Ok(())
    }
}
