//! Gateway server end to end over plaintext TCP.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use edge_gate::config::GatewayConfig;
use edge_gate::lifecycle::Shutdown;
use edge_gate::net::connection::ConnectionTracker;
use edge_gate::net::listener::{AdmissionListener, NoSocketOptions};
use edge_gate::GatewayServer;

mod common;

#[tokio::test]
async fn test_serves_health_and_shuts_down() {
    let (controller, _monitor) = common::controller(0.8, 4);
    let tracker = ConnectionTracker::new();

    let mut config = GatewayConfig::default();
    config.timeouts.shutdown_grace_secs = 1;

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = AdmissionListener::new(tcp, controller.clone(), NoSocketOptions, tracker.clone());
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = GatewayServer::new(config, controller.clone(), tracker.clone());
    let handle = tokio::spawn(server.run(listener, None, shutdown.subscribe()));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("ok"), "{response}");
    // Plaintext connections are active as soon as they are configured.
    assert!(controller.registry().is_empty());

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(tracker.open_count(), 0);
}
