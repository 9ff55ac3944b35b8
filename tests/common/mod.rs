//! Shared fixtures for forwarding tests: in-process backends, scripted
//! resolvers and a raw TCP client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dnsfwd::config::Config;
use dnsfwd::context::InstanceContext;
use dnsfwd::http::connection::RequestLimits;
use dnsfwd::http::headers::Headers;
use dnsfwd::http::parser::{decode_chunked, parse_http_request, parse_response_head};
use dnsfwd::proxy::Forwarder;
use dnsfwd::resolver::{Resolve, ResolveError};
use dnsfwd::server::listener;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Resolver returning a fixed address list and counting calls.
#[derive(Clone, Default)]
pub struct FixedResolver {
    pub addresses: Vec<String>,
    pub calls: Arc<AtomicUsize>,
}

impl FixedResolver {
    pub fn new(addresses: &[&str]) -> Self {
        Self {
            addresses: addresses.iter().map(|s| s.to_string()).collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Resolve for FixedResolver {
    async fn resolve(&self, _name: &str) -> Result<Vec<String>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.addresses.clone())
    }
}

/// Resolver that always fails like a missing DNS name.
#[derive(Clone, Default)]
pub struct FailingResolver {
    pub calls: Arc<AtomicUsize>,
}

impl Resolve for FailingResolver {
    async fn resolve(&self, _name: &str) -> Result<Vec<String>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ResolveError::Lookup(std::io::Error::other("no such host")))
    }
}

/// Resolver that never answers in time.
#[derive(Clone, Default)]
pub struct HangingResolver;

impl Resolve for HangingResolver {
    async fn resolve(&self, _name: &str) -> Result<Vec<String>, ResolveError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(vec!["127.0.0.1".to_string()])
    }
}

/// A backend that answers every request with a canned response.
pub struct Backend {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Backend {
    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> String {
        let requests = self.requests.lock().unwrap();
        String::from_utf8_lossy(requests.last().expect("no request received")).to_string()
    }
}

async fn read_full_request(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut temp = [0u8; 4096];
    loop {
        if let Ok((_, consumed)) = parse_http_request(&buf) {
            buf.truncate(consumed);
            return Some(buf);
        }
        let n = stream.read(&mut temp).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&temp[..n]);
    }
}

/// Starts a backend on 127.0.0.1 that records raw requests and replies
/// with `response`, then closes.
pub async fn spawn_backend(response: &[u8]) -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let response = response.to_vec();

    let recorded = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let recorded = recorded.clone();
            let response = response.clone();
            tokio::spawn(async move {
                if let Some(raw) = read_full_request(&mut stream).await {
                    recorded.lock().unwrap().push(raw);
                    let _ = stream.write_all(&response).await;
                    let _ = stream.shutdown().await;
                }
            });
        }
    });

    Backend { port, requests }
}

/// Starts a backend that reads requests but never answers. Each time the
/// forwarder drops such a connection, a message is sent on the channel.
pub async fn spawn_silent_backend() -> (u16, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = read_full_request(&mut stream).await;
                let mut temp = [0u8; 64];
                while let Ok(n) = stream.read(&mut temp).await {
                    if n == 0 {
                        break;
                    }
                }
                let _ = tx.send(());
            });
        }
    });

    (port, rx)
}

/// A port on 127.0.0.1 with nothing listening.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn test_config(backend_port: u16) -> Config {
    Config {
        listen_addr: "127.0.0.1:0".to_string(),
        backend_port,
        connect_timeout_ms: 1_000,
        response_timeout_ms: 2_000,
        resolve_timeout_ms: 1_000,
        ..Config::default()
    }
}

/// Serves `resolver` through the real listener on an ephemeral port.
pub async fn spawn_forwarder<R: Resolve>(cfg: Config, resolver: R) -> SocketAddr {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let forwarder = Arc::new(Forwarder::new(&cfg, resolver));

    tokio::spawn(listener::serve(
        tcp,
        forwarder,
        RequestLimits::from_config(&cfg),
        InstanceContext::with_id("test0"),
    ));

    addr
}

pub struct ClientResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ClientResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// Sends raw bytes and reads until the forwarder closes the connection.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> ClientResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut raw))
        .await
        .expect("forwarder did not close the connection")
        .unwrap();

    parse_client_response(&raw)
}

pub fn parse_client_response(raw: &[u8]) -> ClientResponse {
    let (head, used) = parse_response_head(raw, 64 * 1024).expect("malformed response head");
    let rest = &raw[used..];

    let body = if head.headers.get("Transfer-Encoding") == Some("chunked") {
        decode_chunked(rest).expect("malformed chunked body").0
    } else {
        rest.to_vec()
    };

    ClientResponse {
        status: head.status.as_u16(),
        headers: head.headers,
        body,
    }
}

/// Reads exactly one Content-Length framed response from a kept-alive
/// connection.
pub async fn read_one_response(stream: &mut TcpStream) -> ClientResponse {
    let mut raw = Vec::new();
    let mut temp = [0u8; 4096];
    loop {
        if let Ok((head, used)) = parse_response_head(&raw, 64 * 1024) {
            let len: usize = head
                .headers
                .get("Content-Length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if raw.len() >= used + len {
                return ClientResponse {
                    status: head.status.as_u16(),
                    headers: head.headers,
                    body: raw[used..used + len].to_vec(),
                };
            }
        }
        let n = stream.read(&mut temp).await.unwrap();
        assert!(n > 0, "connection closed before a full response");
        raw.extend_from_slice(&temp[..n]);
    }
}
