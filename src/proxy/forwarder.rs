//! The resolve-then-forward relay cycle.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::Config;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{ResponseWriter, serialize_head};
use crate::proxy::error::ForwardError;
use crate::proxy::selector::Selector;
use crate::proxy::upstream::{BackendResponse, RelayedRequest, Upstream};
use crate::resolver::{Resolve, ResolveError};

/// What happened to one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Status written to the caller, if any
    pub status: Option<StatusCode>,
    /// Whether the caller connection can carry another request
    pub keep_alive: bool,
}

/// Relays each inbound request to one address of the backend name.
///
/// The name is resolved again for every request; there is no caching of
/// addresses or responses between requests.
pub struct Forwarder<R> {
    resolver: R,
    selector: Selector,
    upstream: Upstream,
    backend_name: String,
    backend_port: u16,
    resolve_timeout: Duration,
}

impl<R: Resolve> Forwarder<R> {
    pub fn new(cfg: &Config, resolver: R) -> Self {
        Self {
            resolver,
            selector: Selector::new(cfg.selection),
            upstream: Upstream::new(
                cfg.connect_timeout(),
                cfg.response_timeout(),
                cfg.max_header_bytes,
            ),
            backend_name: cfg.backend_name.clone(),
            backend_port: cfg.backend_port,
            resolve_timeout: cfg.resolve_timeout(),
        }
    }

    /// Resolves the backend name once, logging the result.
    pub async fn resolve_backends(&self) -> Result<Vec<String>, ForwardError> {
        let name = self.backend_name.as_str();

        let result = match timeout(self.resolve_timeout, self.resolver.resolve(name)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(self.resolve_timeout)),
        };

        match result {
            Ok(addresses) => {
                tracing::info!(name, addresses = ?addresses, "Resolved backend");
                Ok(addresses)
            }
            Err(source) => {
                tracing::warn!(name, error = %source, "Failed to resolve backend");
                Err(ForwardError::Resolution {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Runs one relay cycle and writes the result to `client`.
    ///
    /// Failures never escape: the caller gets 503/500 or, once the backend
    /// status has been committed, a truncated body and a closed connection.
    pub async fn handle(&self, request: Request, client: &mut TcpStream) -> RelayOutcome {
        let keep_alive = request.keep_alive();

        tracing::info!(
            method = %request.method,
            path = %request.path,
            "Received request"
        );

        match self.forward(request, keep_alive, client).await {
            Ok(outcome) => outcome,
            Err(e) => self.fail(e, keep_alive, client).await,
        }
    }

    async fn forward(
        &self,
        request: Request,
        keep_alive: bool,
        client: &mut TcpStream,
    ) -> Result<RelayOutcome, ForwardError> {
        let addresses = self.resolve_backends().await?;

        let address = self
            .selector
            .select(&addresses)
            .ok_or_else(|| ForwardError::NoBackends(self.backend_name.clone()))?;

        let method = request.method.clone();
        let accepts_chunked = request.accepts_chunked();
        let relayed = RelayedRequest::build(request, address, self.backend_port)?;

        tracing::info!(
            backend = %relayed.authority(),
            policy = ?self.selector.policy(),
            method = %relayed.method,
            target = %relayed.target,
            "Forwarding request"
        );

        let mut response = tokio::select! {
            res = self.upstream.send(&relayed) => res?,
            _ = caller_closed(&*client, !keep_alive) => return Err(ForwardError::CallerDisconnected),
        };

        // The inbound body is no longer needed once the backend answered
        drop(relayed);

        if !accepts_chunked {
            response.dechunk();
        }

        self.relay(response, &method, keep_alive, client).await
    }

    async fn relay(
        &self,
        response: BackendResponse,
        method: &Method,
        keep_alive: bool,
        client: &mut TcpStream,
    ) -> Result<RelayOutcome, ForwardError> {
        let status = response.status();
        let keep_alive = keep_alive && response.is_delimited() && status.as_u16() != 101;

        let head = serialize_head(status, &response.relay_headers(keep_alive));
        let streaming = |source: std::io::Error| ForwardError::Streaming {
            status: status.as_u16(),
            source,
        };

        client.write_all(&head).await.map_err(streaming)?;
        let bytes = response.copy_body(client).await.map_err(streaming)?;

        tracing::info!(
            status = status.as_u16(),
            bytes,
            method = %method,
            "Response relayed"
        );

        Ok(RelayOutcome {
            status: Some(status),
            keep_alive,
        })
    }

    async fn fail(&self, error: ForwardError, keep_alive: bool, client: &mut TcpStream) -> RelayOutcome {
        match &error {
            ForwardError::Construction(_) => {
                tracing::error!(error = %error, "Failed to build outbound request")
            }
            ForwardError::Streaming { .. } => {
                tracing::warn!(error = %error, "Response truncated")
            }
            ForwardError::CallerDisconnected => {
                tracing::info!("Caller disconnected, abandoning backend exchange")
            }
            _ => tracing::warn!(error = %error, "Backend unavailable"),
        }

        let Some(status) = error.status() else {
            return RelayOutcome {
                status: None,
                keep_alive: false,
            };
        };

        let mut response = Response::plain(status);
        if !keep_alive {
            response = response.closing();
        }

        if let Err(e) = ResponseWriter::new(&response).write_to_stream(client).await {
            tracing::debug!(error = %e, "Failed to write error response");
            return RelayOutcome {
                status: None,
                keep_alive: false,
            };
        }

        RelayOutcome {
            status: Some(status),
            keep_alive,
        }
    }
}

/// Completes when the caller has gone away.
///
/// Pipelined bytes waiting in the socket mean the caller is still there;
/// in that case this never completes. A caller that will not reuse the
/// connection may shut down its write side right after the request, so
/// with `half_close_ok` end of stream is not taken as a disconnect and only
/// a reset is.
async fn caller_closed(client: &TcpStream, half_close_ok: bool) {
    let mut peeked = [0u8; 1];
    match client.peek(&mut peeked).await {
        Err(_) => {}
        Ok(0) if !half_close_ok => {}
        Ok(_) => std::future::pending::<()>().await,
    }
}
