// Integration tests for pushing readings to subscriber connections

mod common;

use std::time::Duration;

use common::{loopback_config, trigger, RunningBridge};
use scalebridge::config::TcpTarget;
use scalebridge::scale::framer::{encode, STATUS_NORMAL};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

async fn wait_for_subscribers(bridge: &RunningBridge, expected: usize) {
    for _ in 0..100 {
        if bridge.broadcaster.subscriber_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} subscribers", expected);
}

#[tokio::test]
async fn test_subscriber_receives_every_decoded_reading() {
    let mut config = loopback_config(5000);
    config.broadcast.listen_port = Some(0);
    let bridge = RunningBridge::start(config).await;

    let sub = TcpStream::connect(bridge.subscribers.unwrap()).await.unwrap();
    wait_for_subscribers(&bridge, 1).await;
    let mut lines = BufReader::new(sub).lines();

    let link = bridge.link.clone();
    let feeder = tokio::spawn(async move {
        loop {
            link.feed(&encode(2000, false, STATUS_NORMAL));
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    });
    let reply = trigger(bridge.trigger, "SEND:COM3").await;
    feeder.abort();
    assert_eq!(reply, b"20\r\n");

    // Unsettled readings are pushed too, so at least the three window samples arrive
    for _ in 0..3 {
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, "20");
    }

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_disconnected_subscriber_is_pruned() {
    let mut config = loopback_config(5000);
    config.broadcast.listen_port = Some(0);
    config.broadcast.write_timeout_ms = 200;
    let bridge = RunningBridge::start(config).await;

    let gone = TcpStream::connect(bridge.subscribers.unwrap()).await.unwrap();
    let kept = TcpStream::connect(bridge.subscribers.unwrap()).await.unwrap();
    wait_for_subscribers(&bridge, 2).await;
    drop(gone);

    // A write to a reset socket can succeed once before the error surfaces
    for _ in 0..20 {
        bridge.broadcaster.publish_value(1.5);
        if bridge.broadcaster.subscriber_count().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(bridge.broadcaster.subscriber_count().await, 1);

    let mut lines = BufReader::new(kept).lines();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "1.5");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_configured_targets_are_dialed_at_startup() {
    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = target.local_addr().unwrap().port();

    let mut config = loopback_config(5000);
    config.broadcast.targets = vec![TcpTarget {
        ip: "127.0.0.1".to_string(),
        port,
    }];
    let bridge = RunningBridge::start(config).await;

    let (stream, _) = target.accept().await.unwrap();
    wait_for_subscribers(&bridge, 1).await;
    bridge.broadcaster.publish_value(-3.0);

    let mut lines = BufReader::new(stream).lines();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "-3");

    bridge.shutdown().await;
}
