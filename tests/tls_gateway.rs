//! Gateway server end to end over TLS with a self-signed certificate.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;

use edge_gate::config::{GatewayConfig, TlsConfig};
use edge_gate::lifecycle::Shutdown;
use edge_gate::net::connection::ConnectionTracker;
use edge_gate::net::listener::{AdmissionListener, NoSocketOptions};
use edge_gate::net::tls;
use edge_gate::GatewayServer;

mod common;

struct Certificate {
    _dir: tempfile::TempDir,
    config: TlsConfig,
    der: rustls::pki_types::CertificateDer<'static>,
}

fn self_signed() -> Certificate {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, certified.cert.pem()).unwrap();
    std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();

    Certificate {
        config: TlsConfig {
            cert_path: cert_path.to_string_lossy().into_owned(),
            key_path: key_path.to_string_lossy().into_owned(),
        },
        der: certified.cert.der().clone(),
        _dir: dir,
    }
}

fn connector(cert: &Certificate) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add(cert.der.clone()).unwrap();
    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_stalled_handshake_is_evicted_and_later_client_served() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let cert = self_signed();
    let acceptor = tls::build_acceptor(&cert.config, Duration::from_secs(30)).await.unwrap();

    let (controller, monitor) = common::controller(0.8, 4);
    let tracker = ConnectionTracker::new();
    let mut config = GatewayConfig::default();
    config.timeouts.shutdown_grace_secs = 1;

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = AdmissionListener::new(tcp, controller.clone(), NoSocketOptions, tracker.clone());
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = GatewayServer::new(config, controller.clone(), tracker.clone());
    let handle = tokio::spawn(server.run(listener, Some(acceptor), shutdown.subscribe()));

    // Connects but never sends a ClientHello.
    let mut stalled = TcpStream::connect(addr).await.unwrap();
    wait_for(|| controller.registry().size() == 1).await;

    monitor.set(95, 100);
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(5), stalled.read(&mut buf))
        .await
        .expect("evicted connection was not closed");
    assert!(matches!(read, Ok(0) | Err(_)), "{read:?}");
    assert_eq!(controller.stats().total_evicted, 1);
    assert!(controller.registry().is_empty());

    monitor.set(0, 100);
    let tcp = TcpStream::connect(addr).await.unwrap();
    let domain = ServerName::try_from("localhost").unwrap();
    let mut client = tokio::time::timeout(Duration::from_secs(5), connector(&cert).connect(domain, tcp))
        .await
        .unwrap()
        .unwrap();
    client
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let mut chunk = [0u8; 1024];
        loop {
            match client.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => response.extend_from_slice(&chunk[..n]),
            }
        }
    })
    .await;
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("ok"), "{response}");

    assert_eq!(controller.stats().total_evicted, 1);
    assert!(controller.registry().is_empty());

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(tracker.open_count(), 0);
}
