//! TCP listener for `SEND:<port>` trigger requests.
//!
//! Each connection is handled in its own task: one read of at most 1024 bytes, one
//! acquisition, one CRLF-terminated reply, then close. A malformed request, an
//! unknown port name or a client that stays silent past `request_timeout_ms`
//! closes the connection without writing anything. Faults and
//! timeouts both answer `-1`; the logs keep them apart.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::accept_backoff;
use super::coordinator::AcquisitionCoordinator;
use crate::config::Config;
use crate::logutil::escape_log;
use crate::metrics;
use crate::scale::format_weight;
use crate::scale::framer::SENTINEL;

pub const MAX_REQUEST: usize = 1024;

/// Extract the requested port name from a trigger request.
///
/// Accepts `SEND:<name>` with surrounding whitespace, keyword in any case and exactly
/// one `:`. The returned name is trimmed but not case-folded.
pub fn parse_request(raw: &str) -> Option<&str> {
    let mut parts = raw.trim().split(':');
    let keyword = parts.next()?;
    let name = parts.next()?.trim();
    if parts.next().is_some() || !keyword.trim().eq_ignore_ascii_case("SEND") || name.is_empty() {
        return None;
    }
    Some(name)
}

/// Serve one trigger connection to completion.
pub async fn handle_trigger<S>(
    mut stream: S,
    peer: &str,
    config: &Config,
    coordinator: &AcquisitionCoordinator,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; MAX_REQUEST];
    let read_timeout = config.trigger.request_timeout();
    let n = match tokio::time::timeout(read_timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            warn!("Trigger read from {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            metrics::inc_triggers_rejected();
            info!("No request from {} within {:?}, closing", peer, read_timeout);
            let _ = stream.shutdown().await;
            return;
        }
    };
    let raw = String::from_utf8_lossy(&buf[..n]);
    debug!("Trigger from {}: '{}'", peer, escape_log(&raw));

    let Some(profile) = parse_request(&raw).and_then(|name| config.find_profile(name)) else {
        metrics::inc_triggers_rejected();
        info!("Rejected trigger from {}: '{}'", peer, escape_log(raw.trim()));
        let _ = stream.shutdown().await;
        return;
    };

    let value = match coordinator.acquire(profile).await {
        Ok(acquisition) => acquisition.value(),
        Err(fault) => {
            warn!("Acquisition on {} for {} failed: {}", profile.name, peer, fault);
            SENTINEL
        }
    };
    metrics::inc_triggers_served();

    let reply = format!("{}\r\n", format_weight(value));
    info!("Replying to {} for {}: {}", peer, profile.name, reply.trim_end());
    if let Err(e) = stream.write_all(reply.as_bytes()).await {
        warn!("Trigger reply to {} failed: {}", peer, e);
        return;
    }
    let _ = stream.shutdown().await;
}

pub struct TriggerServer {
    listener: TcpListener,
    config: Arc<Config>,
    coordinator: Arc<AcquisitionCoordinator>,
}

impl TriggerServer {
    pub async fn bind(
        config: Arc<Config>,
        coordinator: Arc<AcquisitionCoordinator>,
    ) -> std::io::Result<Self> {
        let addr = format!("{}:{}", config.trigger.bind, config.trigger.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Trigger server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            config,
            coordinator,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept triggers until `shutdown` flips to true, then wait for in-flight
    /// triggers to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let config = self.config.clone();
                        let coordinator = self.coordinator.clone();
                        tasks.spawn(async move {
                            let peer = peer.to_string();
                            handle_trigger(stream, &peer, &config, &coordinator).await;
                        });
                    }
                    Err(e) => accept_backoff("Trigger", &e).await,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Trigger task ended abnormally: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        drop(self.listener);
        if !tasks.is_empty() {
            info!("Waiting for {} in-flight trigger(s)", tasks.len());
        }
        while tasks.join_next().await.is_some() {}
        info!("Trigger server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::MemoryLink;
    use std::time::Duration;

    #[test]
    fn parses_valid_requests() {
        assert_eq!(parse_request("SEND:COM3"), Some("COM3"));
        assert_eq!(parse_request("  send:com3\r\n"), Some("com3"));
        assert_eq!(parse_request("Send: COM3 "), Some("COM3"));
    }

    #[test]
    fn rejects_malformed_requests() {
        assert_eq!(parse_request(""), None);
        assert_eq!(parse_request("SEND"), None);
        assert_eq!(parse_request("SEND:"), None);
        assert_eq!(parse_request("GET:COM3"), None);
        assert_eq!(parse_request("SEND:COM3:extra"), None);
        assert_eq!(parse_request("SENDCOM3"), None);
    }

    #[tokio::test]
    async fn unknown_port_closes_without_reply() {
        let config = Config::default();
        let coordinator = AcquisitionCoordinator::new(MemoryLink::new());
        // The mock fails the test if anything is written back.
        let stream = tokio_test::io::Builder::new().read(b"SEND:COM9").build();
        handle_trigger(stream, "test", &config, &coordinator).await;
    }

    #[tokio::test]
    async fn silent_client_is_closed_after_request_timeout() {
        let mut config = Config::default();
        config.trigger.request_timeout_ms = 50;
        let coordinator = AcquisitionCoordinator::new(MemoryLink::new());
        // The read never completes; nothing may be written back.
        let stream = tokio_test::io::Builder::new()
            .wait(Duration::from_secs(60))
            .build();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            handle_trigger(stream, "test", &config, &coordinator),
        )
        .await;
        assert!(result.is_ok(), "silent client must not hold the handler open");
    }

    #[tokio::test]
    async fn timeout_replies_sentinel() {
        let mut config = Config::default();
        config.serial_ports[0].timeout_ms = 100;
        let coordinator = AcquisitionCoordinator::new(MemoryLink::new());
        let stream = tokio_test::io::Builder::new()
            .read(b"send:com3\r\n")
            .write(b"-1\r\n")
            .build();
        handle_trigger(stream, "test", &config, &coordinator).await;
    }
}
