//! Outbound exchange with the selected backend.
//!
//! This module builds the outbound request from the inbound one, sends it
//! over a fresh TCP connection and streams the backend response body to the
//! caller.

use std::io;
use std::net::Ipv6Addr;
use std::time::Duration;

use anyhow::bail;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::http::headers::Headers;
use crate::http::parser::{
    ParseError, ResponseHead, content_length, find_crlf, is_chunked, parse_chunk_size,
    parse_response_head,
};
use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;
use crate::proxy::error::ForwardError;

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Longest chunk-size or trailer line accepted from a backend
const MAX_LINE: usize = 4096;

/// Headers that describe one hop and are never relayed from the backend.
const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "Upgrade",
    "TE",
    "Trailer",
];

/// The outbound request for one relay cycle.
///
/// Owns the inbound body; dropping it releases the body.
#[derive(Debug)]
pub struct RelayedRequest {
    pub method: Method,
    pub url: Url,
    pub address: String,
    pub port: u16,
    /// Path and query exactly as the caller sent them
    pub target: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    framed: bool,
}

impl RelayedRequest {
    /// Builds `http://<address>:<port><path-and-query>` from the inbound request.
    ///
    /// Headers are carried over untouched.
    pub fn build(request: Request, address: &str, port: u16) -> Result<Self, ForwardError> {
        if !request.method.is_valid() {
            return Err(ForwardError::Construction(format!(
                "invalid method {:?}",
                request.method.as_str()
            )));
        }

        let target = request.path_and_query();
        if !target.starts_with('/') {
            return Err(ForwardError::Construction(format!(
                "request target {target:?} has no path"
            )));
        }

        let url = Url::parse(&format!("http://{}:{}{}", host_for_url(address), port, target))
            .map_err(|e| ForwardError::Construction(format!("invalid target url: {e}")))?;

        let framed =
            request.headers.contains("Content-Length") || request.headers.contains("Transfer-Encoding");

        Ok(Self {
            method: request.method,
            url,
            address: address.to_string(),
            port,
            target,
            headers: request.headers,
            body: request.body,
            framed,
        })
    }

    /// `host:port` of the backend, IPv6 hosts bracketed.
    pub fn authority(&self) -> String {
        format!("{}:{}", host_for_url(&self.address), self.port)
    }

    /// Serializes the request as HTTP/1.1.
    ///
    /// Content-Length and Transfer-Encoding are rewritten to describe the
    /// decoded body; Host is only added when the caller sent none.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(256 + self.body.len());

        // Request line
        buffer.extend_from_slice(format!("{} {} HTTP/1.1\r\n", self.method, self.target).as_bytes());

        if !self.headers.contains("Host") {
            buffer.extend_from_slice(format!("Host: {}\r\n", self.authority()).as_bytes());
        }

        for (key, value) in self.headers.iter() {
            if key.eq_ignore_ascii_case("Content-Length")
                || key.eq_ignore_ascii_case("Transfer-Encoding")
            {
                continue;
            }
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        if self.framed || !self.body.is_empty() {
            buffer.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }

        // End of headers
        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(&self.body);

        buffer
    }
}

fn host_for_url(address: &str) -> String {
    if address.parse::<Ipv6Addr>().is_ok() {
        format!("[{address}]")
    } else {
        address.to_string()
    }
}

/// How the end of a backend response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body (HEAD, 1xx, 204, 304)
    Empty,
    Length(usize),
    Chunked,
    /// Body ends when the backend closes the connection
    UntilClose,
}

impl BodyFraming {
    pub fn for_response(method: &Method, head: &ResponseHead) -> Result<Self, ParseError> {
        if *method == Method::HEAD || head.status.is_bodyless() {
            return Ok(BodyFraming::Empty);
        }

        match is_chunked(&head.headers) {
            Ok(true) => return Ok(BodyFraming::Chunked),
            Ok(false) => {}
            // Unknown final coding: only the connection close delimits it
            Err(_) => return Ok(BodyFraming::UntilClose),
        }

        Ok(match content_length(&head.headers)? {
            Some(len) => BodyFraming::Length(len),
            None => BodyFraming::UntilClose,
        })
    }

    /// True when the caller can tell where the body ends without a close.
    pub fn is_delimited(&self) -> bool {
        !matches!(self, BodyFraming::UntilClose)
    }
}

/// Sends relayed requests, one fresh connection per request.
#[derive(Debug, Clone)]
pub struct Upstream {
    connect_timeout: Duration,
    response_timeout: Duration,
    max_header_bytes: usize,
}

impl Upstream {
    pub fn new(connect_timeout: Duration, response_timeout: Duration, max_header_bytes: usize) -> Self {
        Self {
            connect_timeout,
            response_timeout,
            max_header_bytes,
        }
    }

    /// Connects, sends the request and waits for the final response head.
    ///
    /// Every failure up to and including the response head is an exchange
    /// failure.
    pub async fn send(&self, request: &RelayedRequest) -> Result<BackendResponse, ForwardError> {
        let backend = request.authority();

        // Connect to backend with timeout
        let mut stream = timeout(
            self.connect_timeout,
            TcpStream::connect((request.address.as_str(), request.port)),
        )
        .await
        .map_err(|_| ForwardError::exchange(&backend, "connect timeout"))?
        .map_err(|e| ForwardError::exchange(&backend, e))?;

        tracing::trace!(backend = %backend, "Connected to backend");

        let (head, buffered) = timeout(
            self.response_timeout,
            self.exchange(&mut stream, request),
        )
        .await
        .map_err(|_| ForwardError::exchange(&backend, "response timeout"))?
        .map_err(|e| ForwardError::exchange(&backend, e))?;

        let framing = BodyFraming::for_response(&request.method, &head)
            .map_err(|e| ForwardError::exchange(&backend, e))?;

        tracing::debug!(
            backend = %backend,
            status = head.status.as_u16(),
            framing = ?framing,
            "Received response head"
        );

        Ok(BackendResponse {
            head,
            framing,
            stream,
            buffered,
            dechunk: false,
        })
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        request: &RelayedRequest,
    ) -> anyhow::Result<(ResponseHead, BytesMut)> {
        stream.write_all(&request.to_bytes()).await?;
        stream.flush().await?;

        tracing::trace!("Request sent to backend");

        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
        loop {
            match parse_response_head(&buffer, self.max_header_bytes) {
                Ok((head, used)) => {
                    buffer.advance(used);
                    let code = head.status.as_u16();
                    if (100..200).contains(&code) && code != 101 {
                        tracing::trace!(status = code, "Skipping interim response");
                        continue;
                    }
                    return Ok((head, buffer));
                }
                Err(ParseError::Incomplete) => {}
                Err(e) => bail!("malformed response head: {e}"),
            }

            let n = stream.read_buf(&mut buffer).await?;
            if n == 0 {
                bail!("connection closed before complete response head");
            }
        }
    }
}

/// A backend response whose head has arrived and whose body is still on
/// the wire.
#[derive(Debug)]
pub struct BackendResponse {
    pub head: ResponseHead,
    pub framing: BodyFraming,
    stream: TcpStream,
    buffered: BytesMut,
    dechunk: bool,
}

impl BackendResponse {
    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    /// Relays a chunked body as plain bytes delimited by the connection
    /// close, for callers that cannot parse chunked framing.
    pub fn dechunk(&mut self) {
        self.dechunk = self.framing == BodyFraming::Chunked;
    }

    /// True when the caller can tell where the relayed body ends without a
    /// close.
    pub fn is_delimited(&self) -> bool {
        self.framing.is_delimited() && !self.dechunk
    }

    /// Headers for the caller: the backend's end-to-end headers plus framing
    /// that matches how the body will be written.
    pub fn relay_headers(&self, keep_alive: bool) -> Headers {
        let named_by_connection: Vec<String> = self
            .head
            .headers
            .get_all("Connection")
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .collect();

        let mut headers: Headers = self
            .head
            .headers
            .iter()
            .filter(|(k, _)| {
                !HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(k))
                    && !k.eq_ignore_ascii_case("Content-Length")
                    && !named_by_connection.contains(&k.to_ascii_lowercase())
            })
            .collect();

        match self.framing {
            BodyFraming::Length(len) => headers.append("Content-Length", len.to_string()),
            BodyFraming::Chunked if !self.dechunk => headers.append("Transfer-Encoding", "chunked"),
            BodyFraming::Chunked | BodyFraming::UntilClose => {}
            BodyFraming::Empty => {
                // HEAD answers advertise the length of the body they omit
                if !self.head.status.is_bodyless() {
                    if let Some(len) = self.head.headers.get("Content-Length") {
                        headers.append("Content-Length", len);
                    }
                }
            }
        }

        if !keep_alive {
            headers.set("Connection", "close");
        }

        headers
    }

    /// Streams the body to `client` verbatim; chunked bodies keep their
    /// chunk framing unless [`BackendResponse::dechunk`] was called. Consumes the response, closing the backend connection.
    pub async fn copy_body<W>(mut self, client: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let copied = match self.framing {
            BodyFraming::Empty => 0,
            BodyFraming::Length(len) => {
                copy_exact(&mut self.stream, &mut self.buffered, client, len).await?
            }
            BodyFraming::Chunked => {
                let framed = !self.dechunk;
                copy_chunked(&mut self.stream, &mut self.buffered, client, framed).await?
            }
            BodyFraming::UntilClose => {
                copy_to_end(&mut self.stream, &mut self.buffered, client).await?
            }
        };
        client.flush().await?;
        Ok(copied)
    }
}

/// Copies exactly `len` body bytes, draining `buffered` first.
pub async fn copy_exact<R, W>(
    reader: &mut R,
    buffered: &mut BytesMut,
    writer: &mut W,
    len: usize,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut remaining = len;

    let take = buffered.len().min(remaining);
    writer.write_all(&buffered[..take]).await?;
    buffered.advance(take);
    remaining -= take;

    let mut chunk = vec![0u8; BUFFER_SIZE];
    while remaining > 0 {
        let want = remaining.min(BUFFER_SIZE);
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "backend closed before end of body",
            ));
        }
        writer.write_all(&chunk[..n]).await?;
        remaining -= n;
    }

    Ok(len as u64)
}

/// Copies a chunked body. With `framed` the chunk framing and trailers are
/// copied too; without it only the payload is written. Returns the number of
/// payload bytes.
pub async fn copy_chunked<R, W>(
    reader: &mut R,
    buffered: &mut BytesMut,
    writer: &mut W,
    framed: bool,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;

    loop {
        let line = read_line(reader, buffered).await?;
        let size = parse_chunk_size(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if framed {
            writer.write_all(&line).await?;
            writer.write_all(b"\r\n").await?;
        }

        if size == 0 {
            break;
        }

        total += copy_exact(reader, buffered, writer, size).await?;

        if !read_line(reader, buffered).await?.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing CRLF after chunk data",
            ));
        }
        if framed {
            writer.write_all(b"\r\n").await?;
        }
    }

    // Trailers, terminated by an empty line
    loop {
        let line = read_line(reader, buffered).await?;
        if framed {
            writer.write_all(&line).await?;
            writer.write_all(b"\r\n").await?;
        }
        if line.is_empty() {
            return Ok(total);
        }
    }
}

/// Copies everything until the backend closes.
pub async fn copy_to_end<R, W>(
    reader: &mut R,
    buffered: &mut BytesMut,
    writer: &mut W,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let already = buffered.len() as u64;
    writer.write_all(&buffered[..]).await?;
    buffered.clear();

    let rest = tokio::io::copy(reader, writer).await?;
    Ok(already + rest)
}

async fn read_line<R>(reader: &mut R, buffered: &mut BytesMut) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = find_crlf(&buffered[..]) {
            let line = buffered.split_to(pos).to_vec();
            buffered.advance(2);
            return Ok(line);
        }

        if buffered.len() > MAX_LINE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
        }

        let n = reader.read_buf(buffered).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "backend closed inside chunked body",
            ));
        }
    }
}
