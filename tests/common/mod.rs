//! Shared utilities for end-to-end tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use request_governor::clock::ManualClock;
use request_governor::config::GovernorConfig;
use request_governor::governance::GovernanceStore;
use request_governor::lifecycle::Shutdown;
use request_governor::HttpServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const ADMIN_KEY: &str = "test-admin-key";

/// Start of every test clock, in epoch milliseconds.
pub const CLOCK_START_MS: u64 = 1_700_000_000_000;

/// Request line and headers as the upstream received them.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub head: String,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

#[derive(Debug, Clone)]
pub struct MockUpstream {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockUpstream {
    pub fn hits(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

async fn read_head(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        201 => "201 Created",
        204 => "204 No Content",
        400 => "400 Bad Request",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a programmable upstream on an ephemeral port.
///
/// `f` receives the method and path and returns status and body.
pub async fn start_programmable_upstream<F, Fut>(f: F) -> MockUpstream
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let recorded = seen.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let Some(head) = read_head(&mut socket).await else {
                            return;
                        };
                        let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
                        let method = request_line.next().unwrap_or("").to_string();
                        let path = request_line.next().unwrap_or("").to_string();
                        recorded.lock().unwrap().push(SeenRequest {
                            method: method.clone(),
                            path: path.clone(),
                            head: head.clone(),
                        });

                        let (status, body) = f(method, path).await;
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockUpstream { addr, seen }
}

/// Upstream that answers every request with 200 and `body`.
pub async fn start_mock_upstream(body: &'static str) -> MockUpstream {
    start_programmable_upstream(move |_, _| async move { (200, body.to_string()) }).await
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub admin_addr: Option<SocketAddr>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<GovernanceStore>,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        let addr = self.admin_addr.expect("admin API not enabled");
        format!("http://{}{}", addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Config pointing at `upstream` with the admin API on a test key.
pub fn config_for(upstream: &MockUpstream) -> GovernorConfig {
    let mut config = GovernorConfig::default();
    config.upstream.address = upstream.addr.to_string();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

/// Start the gateway (and admin API when enabled) on ephemeral ports.
pub async fn start_gateway(config: GovernorConfig) -> TestGateway {
    let clock = Arc::new(ManualClock::new(CLOCK_START_MS));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let admin_listener = if config.admin.enabled {
        Some(TcpListener::bind("127.0.0.1:0").await.unwrap())
    } else {
        None
    };
    let admin_addr = admin_listener.as_ref().map(|l| l.local_addr().unwrap());

    let server = HttpServer::with_clock(config, clock.clone());
    let store = server.store().clone();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move { server.serve(listener, admin_listener, server_shutdown).await });

    TestGateway {
        addr,
        admin_addr,
        clock,
        store,
        shutdown,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
