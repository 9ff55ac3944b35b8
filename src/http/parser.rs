use crate::http::headers::Headers;
use crate::http::request::{Method, Request, is_token};
use crate::http::response::StatusCode;

/// Upper bound on the request head when no explicit limit is given.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    InvalidStatus,
    HeadersTooLarge,
    BodyTooLarge,
    Incomplete,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ParseError::InvalidRequest => "invalid request line",
            ParseError::InvalidMethod => "invalid method",
            ParseError::InvalidHeader => "invalid header line",
            ParseError::InvalidContentLength => "invalid content-length",
            ParseError::InvalidChunk => "invalid chunked encoding",
            ParseError::InvalidStatus => "invalid status line",
            ParseError::HeadersTooLarge => "header section too large",
            ParseError::BodyTooLarge => "body too large",
            ParseError::Incomplete => "incomplete message",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

/// Status line and headers of a backend response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: String,
    pub status: StatusCode,
    pub headers: Headers,
}

pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    parse_http_request_with_limit(buf, DEFAULT_MAX_HEADER_BYTES)
}

/// Parses one complete request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied. The body is
/// decoded from `Content-Length` or chunked framing.
pub fn parse_http_request_with_limit(
    buf: &[u8],
    max_header_bytes: usize,
) -> Result<(Request, usize), ParseError> {
    let (mut request, head_len) = parse_request_head(buf, max_header_bytes)?;

    let (body, body_len) = BodyDecoder::for_request(&request.headers, usize::MAX)?
        .decode(&buf[head_len..])?
        .ok_or(ParseError::Incomplete)?;
    request.body = body;

    Ok((request, head_len + body_len))
}

/// Parses the request line and headers from the front of `buf`.
///
/// The returned request has an empty body; the `usize` is where the body
/// starts in `buf`.
pub fn parse_request_head(
    buf: &[u8],
    max_header_bytes: usize,
) -> Result<(Request, usize), ParseError> {
    // Look for header/body separator
    let headers_end = match find_headers_end(buf) {
        Some(end) if end > max_header_bytes => return Err(ParseError::HeadersTooLarge),
        Some(end) => end,
        None if buf.len() > max_header_bytes => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };

    let headers_str =
        std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split(' ');

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if parts.next().is_some() || path.is_empty() || !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_token(method_str).ok_or(ParseError::InvalidMethod)?;
    let headers = parse_header_lines(lines)?;

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body: Vec::new(),
    };

    Ok((request, headers_end + 4))
}

/// Incremental decoder for a request body.
///
/// Fed the body bytes received so far on every call; work already done is
/// not repeated.
#[derive(Debug)]
pub enum BodyDecoder {
    Length(usize),
    Chunked(ChunkedDecoder),
}

impl BodyDecoder {
    /// Picks the decoder for a request with `headers`.
    ///
    /// A declared `Content-Length` over `max_body_bytes` is rejected before
    /// any of the body is read.
    pub fn for_request(headers: &Headers, max_body_bytes: usize) -> Result<Self, ParseError> {
        if is_chunked(headers)? {
            return Ok(BodyDecoder::Chunked(ChunkedDecoder::new(max_body_bytes)));
        }

        let len = content_length(headers)?.unwrap_or(0);
        if len > max_body_bytes {
            return Err(ParseError::BodyTooLarge);
        }
        Ok(BodyDecoder::Length(len))
    }

    /// Returns the decoded body and how much of `buf` it used once the body
    /// is complete, `None` while more bytes are needed.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, ParseError> {
        match self {
            BodyDecoder::Length(len) if buf.len() >= *len => Ok(Some((buf[..*len].to_vec(), *len))),
            BodyDecoder::Length(_) => Ok(None),
            BodyDecoder::Chunked(decoder) => decoder.decode(buf),
        }
    }
}

/// Resumable decoder for chunked bodies.
///
/// `buf` must start at the first chunk-size line and only grow between
/// calls. Chunk framing counts against the limit while the body is still
/// arriving.
#[derive(Debug)]
pub struct ChunkedDecoder {
    body: Vec<u8>,
    pos: usize,
    in_trailers: bool,
    limit: usize,
}

impl ChunkedDecoder {
    pub fn new(limit: usize) -> Self {
        Self {
            body: Vec::new(),
            pos: 0,
            in_trailers: false,
            limit,
        }
    }

    pub fn decode(&mut self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, ParseError> {
        match self.advance(buf) {
            Ok(()) => Ok(Some((std::mem::take(&mut self.body), self.pos))),
            Err(ParseError::Incomplete) if buf.len() > self.limit => Err(ParseError::BodyTooLarge),
            Err(ParseError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn advance(&mut self, buf: &[u8]) -> Result<(), ParseError> {
        while !self.in_trailers {
            let rest = &buf[self.pos..];
            let line_end = find_crlf(rest).ok_or(ParseError::Incomplete)?;
            let size = parse_chunk_size(&rest[..line_end])?;

            if size == 0 {
                self.pos += line_end + 2;
                self.in_trailers = true;
                break;
            }

            if self.body.len().saturating_add(size) > self.limit {
                return Err(ParseError::BodyTooLarge);
            }

            let data_start = line_end + 2;
            let data_end = data_start.checked_add(size).ok_or(ParseError::InvalidChunk)?;
            if rest.len() < data_end + 2 {
                return Err(ParseError::Incomplete);
            }
            if &rest[data_end..data_end + 2] != b"\r\n" {
                return Err(ParseError::InvalidChunk);
            }

            self.body.extend_from_slice(&rest[data_start..data_end]);
            self.pos += data_end + 2;
        }

        // Trailer section ends with an empty line
        loop {
            let line_end = find_crlf(&buf[self.pos..]).ok_or(ParseError::Incomplete)?;
            self.pos += line_end + 2;
            if line_end == 0 {
                return Ok(());
            }
        }
    }
}

/// Parses a response status line and headers from the front of `buf`.
///
/// Returns the head and the number of bytes it occupied; body bytes that
/// follow are left for the caller.
pub fn parse_response_head(
    buf: &[u8],
    max_header_bytes: usize,
) -> Result<(ResponseHead, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) if end > max_header_bytes => return Err(ParseError::HeadersTooLarge),
        Some(end) => end,
        None if buf.len() > max_header_bytes => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };

    let head_str =
        std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidStatus)?;
    let mut lines = head_str.split("\r\n");

    let status_line = lines.next().ok_or(ParseError::InvalidStatus)?;
    let mut parts = status_line.splitn(3, ' ');

    let version = parts.next().ok_or(ParseError::InvalidStatus)?;
    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidStatus);
    }

    let code = parts.next().ok_or(ParseError::InvalidStatus)?;
    if code.len() != 3 {
        return Err(ParseError::InvalidStatus);
    }
    let status = code
        .parse::<u16>()
        .ok()
        .and_then(StatusCode::from_u16)
        .ok_or(ParseError::InvalidStatus)?;

    let headers = parse_header_lines(lines)?;

    let head = ResponseHead {
        version: version.to_string(),
        status,
        headers,
    };
    Ok((head, headers_end + 4))
}

fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let key = key.trim();
        if !is_token(key) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    Ok(headers)
}

/// Content-Length, if present. Repeated identical values are accepted.
pub fn content_length(headers: &Headers) -> Result<Option<usize>, ParseError> {
    let mut found: Option<usize> = None;
    for raw in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
        let value = raw
            .trim()
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidContentLength)?;
        match found {
            Some(prev) if prev != value => return Err(ParseError::InvalidContentLength),
            _ => found = Some(value),
        }
    }
    Ok(found)
}

/// Whether the message body uses chunked framing.
///
/// Only `chunked` is understood as a transfer coding; any other final coding
/// is rejected.
pub fn is_chunked(headers: &Headers) -> Result<bool, ParseError> {
    let last = headers
        .get_all("Transfer-Encoding")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .last();

    match last {
        None => Ok(false),
        Some(coding) if coding.eq_ignore_ascii_case("chunked") => Ok(true),
        Some(_) => Err(ParseError::InvalidRequest),
    }
}

/// Parses a chunk-size line (without its CRLF), ignoring chunk extensions.
pub fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    let size = line.split(';').next().unwrap_or("").trim();
    if size.is_empty() {
        return Err(ParseError::InvalidChunk);
    }
    usize::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk)
}

/// Decodes a complete chunked body from the front of `buf`.
///
/// Returns the decoded bytes and how much of `buf` the encoded body used.
/// Trailer fields are skipped.
pub fn decode_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    ChunkedDecoder::new(usize::MAX)
        .decode(buf)?
        .ok_or(ParseError::Incomplete)
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_http_request(req).unwrap();

        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn chunk_size_with_extension() {
        assert_eq!(parse_chunk_size(b"1a;name=value").unwrap(), 26);
        assert!(matches!(parse_chunk_size(b"zz"), Err(ParseError::InvalidChunk)));
    }

    #[test]
    fn chunked_decoder_resumes_where_it_stopped() {
        let raw = b"3\r\nabc\r\n4\r\ndefg\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new(1024);

        assert_eq!(decoder.decode(&raw[..10]).unwrap(), None);
        assert_eq!(decoder.pos, 8);
        assert_eq!(decoder.decode(&raw[..17]).unwrap(), None);
        assert_eq!(decoder.pos, 17);

        let (body, used) = decoder.decode(raw).unwrap().unwrap();
        assert_eq!(body, b"abcdefg");
        assert_eq!(used, raw.len());
    }

    #[test]
    fn chunked_trailers_are_skipped() {
        let raw = b"3\r\nabc\r\n0\r\nX-Checksum: 1\r\n\r\nNEXT";
        let (body, used) = decode_chunked(raw).unwrap();
        assert_eq!(body, b"abc");
        assert_eq!(&raw[used..], b"NEXT");
    }
}
