//! Tests for outbound request construction

use dnsfwd::http::request::{Method, RequestBuilder};
use dnsfwd::proxy::{ForwardError, RelayedRequest};

fn request_text(relayed: &RelayedRequest) -> String {
    String::from_utf8_lossy(&relayed.to_bytes()).to_string()
}

#[test]
fn test_build_http_request() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/api/users?page=2")
        .header("Host", "public.example.com")
        .header("User-Agent", "Test")
        .build()
        .unwrap();

    let relayed = RelayedRequest::build(request, "10.0.0.5", 8080).unwrap();
    let text = request_text(&relayed);

    assert_eq!(relayed.url.as_str(), "http://10.0.0.5:8080/api/users?page=2");
    assert!(text.starts_with("GET /api/users?page=2 HTTP/1.1\r\n"));
    // Host is relayed as sent, not rewritten to the backend
    assert!(text.contains("Host: public.example.com\r\n"));
    assert!(!text.contains("10.0.0.5"));
    assert!(text.contains("User-Agent: Test\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[test]
fn test_build_http_request_copies_every_header() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .header("Host", "example.com")
        .header("Connection", "keep-alive")
        .header("X-Forwarded-For", "203.0.113.9")
        .header("Forwarded", "for=203.0.113.9")
        .header("Cookie", "a=1")
        .header("Cookie", "b=2")
        .build()
        .unwrap();

    let relayed = RelayedRequest::build(request, "10.0.0.5", 8080).unwrap();
    let text = request_text(&relayed);

    assert!(text.contains("Connection: keep-alive\r\n"));
    assert!(text.contains("X-Forwarded-For: 203.0.113.9\r\n"));
    assert!(text.contains("Forwarded: for=203.0.113.9\r\n"));
    assert!(text.contains("Cookie: a=1\r\nCookie: b=2\r\n"));
}

#[test]
fn test_build_http_request_reframes_body() {
    let request = RequestBuilder::new()
        .method(Method::POST)
        .path("/upload")
        .header("Host", "example.com")
        .header("Transfer-Encoding", "chunked")
        .body("hello world")
        .build()
        .unwrap();

    let relayed = RelayedRequest::build(request, "10.0.0.5", 8080).unwrap();
    let text = request_text(&relayed);

    assert!(!text.contains("Transfer-Encoding"));
    assert!(text.contains("Content-Length: 11\r\n"));
    assert!(text.ends_with("\r\n\r\nhello world"));
}

#[test]
fn test_build_http_request_keeps_zero_length() {
    let request = RequestBuilder::new()
        .method(Method::POST)
        .path("/empty")
        .header("Content-Length", "0")
        .build()
        .unwrap();

    let text = request_text(&RelayedRequest::build(request, "10.0.0.5", 8080).unwrap());
    assert!(text.contains("Content-Length: 0\r\n"));
}

#[test]
fn test_build_http_request_adds_missing_host() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .version("HTTP/1.0")
        .build()
        .unwrap();

    let relayed = RelayedRequest::build(request, "10.0.0.5", 9000).unwrap();
    let text = request_text(&relayed);

    assert!(text.starts_with("GET / HTTP/1.1\r\nHost: 10.0.0.5:9000\r\n"));
    assert!(!text.contains("Content-Length"));
}

#[test]
fn test_build_http_request_ipv6_target() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/status")
        .build()
        .unwrap();

    let relayed = RelayedRequest::build(request, "fd00::5", 8080).unwrap();

    assert_eq!(relayed.authority(), "[fd00::5]:8080");
    assert_eq!(relayed.url.as_str(), "http://[fd00::5]:8080/status");
}

#[test]
fn test_build_http_request_absolute_form_target() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("http://example.com/x?y=1")
        .build()
        .unwrap();

    let relayed = RelayedRequest::build(request, "10.0.0.5", 8080).unwrap();
    assert_eq!(relayed.target, "/x?y=1");
}

#[test]
fn test_build_http_request_rejects_pathless_target() {
    let request = RequestBuilder::new()
        .method(Method::OPTIONS)
        .path("*")
        .build()
        .unwrap();

    let err = RelayedRequest::build(request, "10.0.0.5", 8080).unwrap_err();
    assert!(matches!(err, ForwardError::Construction(_)));
    assert_eq!(err.status().unwrap().as_u16(), 500);
}

#[test]
fn test_build_http_request_rejects_invalid_method() {
    let request = RequestBuilder::new()
        .method(Method::Extension("NOT VALID".to_string()))
        .path("/")
        .build()
        .unwrap();

    let err = RelayedRequest::build(request, "10.0.0.5", 8080).unwrap_err();
    assert!(matches!(err, ForwardError::Construction(_)));
}

#[test]
fn test_build_http_request_rejects_unusable_address() {
    let request = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .build()
        .unwrap();

    let err = RelayedRequest::build(request, "bad host", 8080).unwrap_err();
    assert!(matches!(err, ForwardError::Construction(_)));
}
