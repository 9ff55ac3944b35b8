use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::Config;
use crate::http::parser::{BodyDecoder, ParseError, parse_request_head};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::ResponseWriter;
use crate::proxy::forwarder::Forwarder;
use crate::resolver::Resolve;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// How long unread client bytes are drained after we decide to close.
const LINGER: Duration = Duration::from_secs(2);

/// Size limits for inbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl RequestLimits {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_header_bytes: cfg.max_header_bytes,
            max_body_bytes: cfg.max_body_bytes,
        }
    }
}

pub struct Connection<R> {
    stream: TcpStream,
    buffer: Vec<u8>,
    state: ConnectionState,
    forwarder: Arc<Forwarder<R>>,
    limits: RequestLimits,
    sent_continue: bool,
}

/// A request whose head has been parsed and whose body is still arriving.
struct PendingRequest {
    request: Request,
    head_len: usize,
    body: BodyDecoder,
}

pub enum ConnectionState {
    Reading,
    Forwarding(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

impl<R: Resolve> Connection<R> {
    pub fn new(stream: TcpStream, forwarder: Arc<Forwarder<R>>, limits: RequestLimits) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            forwarder,
            limits,
            sent_continue: false,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            self.state = match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => match self.read_request().await? {
                    Ok(Some(req)) => ConnectionState::Forwarding(req),
                    Ok(None) => ConnectionState::Closed,
                    Err(response) => ConnectionState::Writing(ResponseWriter::new(&response), false),
                },

                ConnectionState::Forwarding(req) => {
                    let outcome = self.forwarder.handle(req, &mut self.stream).await;

                    tracing::debug!(
                        status = outcome.status.map(|s| s.as_u16()),
                        keep_alive = outcome.keep_alive,
                        "Relay cycle finished"
                    );

                    if outcome.keep_alive {
                        ConnectionState::Reading
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        ConnectionState::Reading
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => break,
            };
        }

        // Drain what the client still sends so the close does not become a reset
        let _ = self.stream.shutdown().await;
        let _ = tokio::time::timeout(LINGER, self.drain()).await;
        Ok(())
    }

    async fn drain(&mut self) {
        let mut scratch = [0u8; 4096];
        while let Ok(n) = self.stream.read(&mut scratch).await {
            if n == 0 {
                break;
            }
        }
    }

    /// Reads the next request.
    ///
    /// The head is parsed once; after that only the body decoder sees new
    /// bytes. The outer error is an I/O failure on the socket. The inner
    /// `Err` is a protocol error to report to the client before closing.
    pub async fn read_request(&mut self) -> anyhow::Result<Result<Option<Request>, Response>> {
        self.sent_continue = false;
        let mut pending: Option<PendingRequest> = None;

        loop {
            if pending.is_none() {
                match parse_request_head(&self.buffer, self.limits.max_header_bytes) {
                    Ok((request, head_len)) => {
                        match BodyDecoder::for_request(&request.headers, self.limits.max_body_bytes) {
                            Ok(body) => {
                                pending = Some(PendingRequest {
                                    request,
                                    head_len,
                                    body,
                                })
                            }
                            Err(e) => return Ok(Err(self.reject(e))),
                        }
                    }

                    Err(ParseError::Incomplete) => {
                        // Need more data → fall through to read
                    }

                    Err(e) => return Ok(Err(self.reject(e))),
                }
            }

            let decoded = match pending.as_mut() {
                Some(p) => p.body.decode(&self.buffer[p.head_len..]),
                None => Ok(None),
            };

            match decoded {
                Ok(Some((body, used))) => {
                    if let Some(PendingRequest {
                        mut request,
                        head_len,
                        ..
                    }) = pending.take()
                    {
                        // Remove consumed bytes
                        self.buffer.drain(..head_len + used);
                        request.body = body;
                        return Ok(Ok(Some(request)));
                    }
                }
                Ok(None) => {}
                Err(e) => return Ok(Err(self.reject(e))),
            }

            let wants_continue = pending.as_ref().is_some_and(|p| p.request.expects_continue());
            if !self.sent_continue && wants_continue {
                self.stream.write_all(CONTINUE).await?;
                self.sent_continue = true;
            }

            // Read more data
            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                if !self.buffer.is_empty() {
                    tracing::debug!(buffered = self.buffer.len(), "Client closed mid-request");
                }
                return Ok(Ok(None));
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }

    /// The response for a request that cannot be forwarded.
    fn reject(&self, error: ParseError) -> Response {
        match error {
            ParseError::HeadersTooLarge => {
                tracing::warn!(limit = self.limits.max_header_bytes, "Request head too large");
                Response::plain(StatusCode::HEADER_FIELDS_TOO_LARGE).closing()
            }
            ParseError::BodyTooLarge => {
                tracing::warn!(limit = self.limits.max_body_bytes, "Request body too large");
                Response::plain(StatusCode::CONTENT_TOO_LARGE).closing()
            }
            e => {
                tracing::warn!(error = %e, "Malformed request");
                Response::bad_request().closing()
            }
        }
    }
}
