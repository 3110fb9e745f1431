//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use payment_gateway::config::GatewayConfig;
use payment_gateway::lifecycle::{Gateway, Shutdown, StartupError};
use payment_gateway::net::Listener;
use payment_gateway::payments::{HttpProcessor, InMemoryPaymentStore, Processor};
use payment_gateway::queue::{DrainReport, RetryQueue};

/// Status meaning "drop the connection without answering".
pub const HANG_UP: u16 = 0;

/// A mock payment processor on raw TCP with a programmable status.
#[derive(Clone)]
pub struct MockProcessor {
    pub addr: SocketAddr,
    status: Arc<AtomicU16>,
    delay_ms: Arc<AtomicU64>,
    received: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl MockProcessor {
    pub async fn start(status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mock = Self {
            addr: listener.local_addr().unwrap(),
            status: Arc::new(AtomicU16::new(status)),
            delay_ms: Arc::new(AtomicU64::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
        };

        let shared = mock.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let shared = shared.clone();
                tokio::spawn(async move { shared.answer(socket).await });
            }
        });
        mock
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    /// Hold every answer back by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Bodies of every request received so far.
    pub fn received(&self) -> Vec<serde_json::Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    async fn answer(&self, mut socket: TcpStream) {
        let Some(body) = read_request(&mut socket).await else {
            return;
        };
        if let Ok(json) = serde_json::from_slice(&body) {
            self.received.lock().unwrap().push(json);
        }

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let status = self.status.load(Ordering::SeqCst);
        if status == HANG_UP {
            return;
        }
        let response = format!(
            "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{{}}",
            status
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    }
}

/// Read one request and return its body.
async fn read_request(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(buf[head_end..head_end + length].to_vec())
}

/// A gateway running on an ephemeral port with an in-memory store.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub store: InMemoryPaymentStore,
    pub queue: Arc<RetryQueue>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<DrainReport, StartupError>>,
}

impl TestGateway {
    pub async fn start(config: GatewayConfig, default: &MockProcessor, fallback: &MockProcessor) -> Self {
        let (gateway, store) = build(config.clone(), default, fallback);
        let mut listener_config = config.listener.clone();
        listener_config.bind_address = "127.0.0.1:0".to_string();
        let listener = Listener::bind(&listener_config).await.unwrap();

        Self {
            addr: listener.local_addr().unwrap(),
            store,
            queue: Arc::clone(gateway.queue()),
            shutdown: gateway.shutdown_handle(),
            handle: tokio::spawn(gateway.run(listener)),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the drain report.
    pub async fn stop(self) -> DrainReport {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap()
    }
}

/// Wire a gateway around the mocks without binding anything.
pub fn build(
    config: GatewayConfig,
    default: &MockProcessor,
    fallback: &MockProcessor,
) -> (Gateway, InMemoryPaymentStore) {
    let connect = config.timeouts.processor_connect();
    let request = config.timeouts.processor_request();
    let default = HttpProcessor::new(Processor::Default, &default.url(), connect, request).unwrap();
    let fallback = HttpProcessor::new(Processor::Fallback, &fallback.url(), connect, request).unwrap();
    let store = InMemoryPaymentStore::new();
    let gateway = Gateway::build_with(
        config,
        Arc::new(default),
        Arc::new(fallback),
        Arc::new(store.clone()),
    );
    (gateway, store)
}

/// Config tuned for fast tests: short backoff, few workers, no exporter.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.queue.workers = 2;
    config.queue.retry_interval_ms = 20;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 20;
    config.shutdown.drain_timeout_secs = 2;
    config.observability.metrics_enabled = false;
    config
}

/// Write `request` on a fresh connection and read until the server closes it.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    read_all(&mut stream).await
}

pub async fn read_all(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8(out).unwrap()
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Wait until `store` holds `count` records; false after five seconds.
pub async fn wait_for_records(store: &InMemoryPaymentStore, count: usize) -> bool {
    for _ in 0..250 {
        if store.len().await == count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub fn payment_body(correlation_id: &str, amount: &str) -> String {
    format!(r#"{{"correlationId":"{}","amount":{}}}"#, correlation_id, amount)
}

pub fn post_payment(correlation_id: &str, amount: &str, close: bool) -> String {
    let body = payment_body(correlation_id, amount);
    format!(
        "POST /payments HTTP/1.1\r\nHost: gateway\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}\r\n{}",
        body.len(),
        if close { "Connection: close\r\n" } else { "" },
        body
    )
}
