//! Test utilities & fixtures.
//! Builds loopback configurations and drives a bridge over an in-memory scale link.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use scalebridge::bridge::BridgeService;
use scalebridge::config::Config;
use scalebridge::scale::MemoryLink;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Default config rebound to ephemeral loopback ports with a short timeout.
pub fn loopback_config(timeout_ms: u64) -> Config {
    let mut config = Config::default();
    config.trigger.bind = "127.0.0.1".to_string();
    config.trigger.port = 0;
    config.trigger.request_timeout_ms = 500;
    config.serial_ports[0].timeout_ms = timeout_ms;
    config.logging.file = None;
    config
}

pub struct RunningBridge {
    pub trigger: SocketAddr,
    #[allow(dead_code)] // only subscriber tests enable the listener
    pub subscribers: Option<SocketAddr>,
    pub link: Arc<MemoryLink>,
    #[allow(dead_code)]
    pub broadcaster: scalebridge::bridge::Broadcaster,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl RunningBridge {
    pub async fn start(config: Config) -> Self {
        let link = MemoryLink::new();
        let service = BridgeService::bind(config, link.clone()).await.unwrap();
        let trigger = service.trigger_addr().unwrap();
        let subscribers = service.subscriber_addr();
        let broadcaster = service.broadcaster().clone();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(service.run_until(async {
            let _ = stopped.await;
        }));
        Self {
            trigger,
            subscribers,
            link,
            broadcaster,
            stop: Some(stop),
            task,
        }
    }

    #[allow(dead_code)]
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap().unwrap();
    }
}

/// Send one trigger request and collect everything the server writes before closing.
pub async fn trigger(addr: SocketAddr, request: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut reply))
        .await
        .expect("server must close the connection")
        .unwrap();
    reply
}
