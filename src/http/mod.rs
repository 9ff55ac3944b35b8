//! HTTP protocol implementation.
//!
//! A small HTTP/1.1 implementation covering both sides of the forwarder:
//! the server side that accepts caller requests and the client side that
//! talks to the backend.
//!
//! # Architecture
//!
//! - **`connection`**: Per-connection state machine handing requests to the forwarder
//! - **`headers`**: Ordered, case-insensitive header multimap
//! - **`parser`**: Request parsing, backend response head parsing, chunked decoding
//! - **`request`**: HTTP request representation and builder
//! - **`response`**: Status codes and locally generated responses
//! - **`writer`**: Serializes responses and response heads
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received          Malformed request
//!               ▼                                  │
//!        ┌──────────────────┐             ┌────────▼─────────┐
//!        │   Forwarding     │             │    Writing       │ ← 400 / 431
//!        └──────┬───────────┘             └────────┬─────────┘
//!               │ Relay cycle done                 │
//!               ├─ Keep-Alive → Reading            └─ Closed
//!               └─ Close → Closed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dnsfwd::config::Config;
//! use dnsfwd::http::connection::{Connection, RequestLimits};
//! use dnsfwd::proxy::Forwarder;
//! use dnsfwd::resolver::DnsResolver;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cfg = Config::default();
//!     let forwarder = Arc::new(Forwarder::new(&cfg, DnsResolver::new()));
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!
//!     loop {
//!         let (socket, _addr) = listener.accept().await?;
//!         let forwarder = forwarder.clone();
//!         tokio::spawn(async move {
//!             let mut conn = Connection::new(socket, forwarder, RequestLimits::from_config(&cfg));
//!             if let Err(e) = conn.run().await {
//!                 eprintln!("Connection error: {}", e);
//!             }
//!         });
//!     }
//! }
//! ```

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
