//! Shared utilities for admission integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::DuplexStream;

use edge_gate::admission::monitor::ManualMonitor;
use edge_gate::admission::{AdmissionController, SocketHandle};
use edge_gate::config::{AdmissionConfig, ResourceKind};
use edge_gate::net::listener::RawAcceptor;

/// Socket handle that counts how often it was closed.
#[derive(Debug, Default)]
pub struct CountingSocket {
    closes: AtomicUsize,
    fail: bool,
}

impl CountingSocket {
    pub fn failing() -> Self {
        Self {
            closes: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl SocketHandle for CountingSocket {
    fn close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "close failed"))
        } else {
            Ok(())
        }
    }
}

/// Admission settings with binary pressure. Every check resamples the monitor.
pub fn admission_config(high_water_ratio: f64, max_batch: usize) -> AdmissionConfig {
    AdmissionConfig {
        enabled: true,
        resource: ResourceKind::Connections,
        high_water_ratio,
        low_water_ratio: None,
        max_batch,
        eviction_factor: 1.0,
        sample_interval_ms: 0,
    }
}

pub fn controller(high_water_ratio: f64, max_batch: usize) -> (Arc<AdmissionController>, Arc<ManualMonitor>) {
    let monitor = Arc::new(ManualMonitor::new(0, 100));
    let controller = Arc::new(AdmissionController::new(
        admission_config(high_water_ratio, max_batch),
        monitor.clone(),
    ));
    (controller, monitor)
}

/// Acceptor fed from a script of results; pends forever once exhausted.
#[derive(Default)]
pub struct ScriptedAcceptor {
    script: Mutex<VecDeque<io::Result<(DuplexStream, SocketAddr)>>>,
}

impl ScriptedAcceptor {
    pub fn push_error(&self, error: io::Error) {
        self.script.lock().push_back(Err(error));
    }

    /// Queue a connection and return the client end.
    pub fn push_connection(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(1024);
        let peer: SocketAddr = ([127, 0, 0, 1], 40000 + self.script.lock().len() as u16).into();
        self.script.lock().push_back(Ok((server, peer)));
        client
    }
}

impl RawAcceptor for ScriptedAcceptor {
    type Stream = DuplexStream;

    fn accept_raw(&self) -> impl Future<Output = io::Result<(DuplexStream, SocketAddr)>> + Send {
        let next = self.script.lock().pop_front();
        async move {
            match next {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(([127, 0, 0, 1], 0).into())
    }
}
