//! Protocol-agnostic request/response exchange.
//!
//! # Responsibilities
//! - Normalize an HTTP/1.x or HTTP/2 exchange into one capability set
//! - Expose the request body either fully buffered or as a chunk reader
//! - Enforce the single-response invariant on terminal sends
//! - Translate file-serving failures into 404/500 responses
//!
//! # Design Decisions
//! - The hyper service owns the receiving half of a oneshot channel; a terminal
//!   send hands the finished `Response` over that channel. The sending half
//!   sits in a [`ResponseSlot`] the dispatcher can keep after a failing handler
//!   has dropped the `Streamer`. Once every holder is gone without a send, the
//!   service falls back to a 500.
//! - A closed receiver means the client went away; [`Streamer::is_aborted`]
//!   reports it without waiting for a send to fail.
//! - One struct serves both protocols. hyper already hands HTTP/1 and HTTP/2
//!   requests over as the same `Request` type, so the protocol only changes
//!   host resolution and response header filtering, selected by [`Protocol`].
//! - HTTP/2 carries the host in `:authority` (the request URI authority) and may
//!   split `cookie` across several fields; HTTP/1 uses the `Host` header.
//! - Connection-specific headers are illegal in HTTP/2 responses and are
//!   stripped there.

use axum::body::{Body, BodyDataStream};
use axum::http::{
    header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Version,
};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use url::Url;

/// Headers that only make sense on an HTTP/1 connection.
const CONNECTION_SPECIFIC_HEADERS: [&str; 5] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Errors raised by the transport adapter.
#[derive(Debug, Error)]
pub enum StreamerError {
    /// A terminal send was attempted after the response had been handed off.
    #[error("response headers were already sent")]
    HeadersAlreadySent,

    /// The body was already taken by `read_body` or `take_reader`.
    #[error("request body was already consumed")]
    BodyConsumed,

    /// The body exceeded the configured limit.
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    /// The connection closed before the exchange completed.
    #[error("connection aborted: {0}")]
    Aborted(String),

    /// The inbound request could not be normalized.
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] header::InvalidHeaderValue),
}

/// Wire protocol an exchange arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    Http2,
}

impl Protocol {
    fn from_version(version: Version) -> Self {
        if version == Version::HTTP_2 {
            Protocol::Http2
        } else {
            Protocol::Http1
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http1 => "HTTP/1.1",
            Protocol::Http2 => "HTTP/2",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw incoming body, yielded chunk by chunk in arrival order.
pub struct BodyReader {
    inner: BodyDataStream,
}

impl BodyReader {
    /// Next chunk of the body, `None` once the peer finished sending.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamerError> {
        match self.inner.next().await {
            None => Ok(None),
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(StreamerError::Aborted(e.to_string())),
        }
    }
}

type Responder = oneshot::Sender<Response<Body>>;

/// The single place a response for one exchange can go.
#[derive(Clone)]
pub struct ResponseSlot {
    protocol: Protocol,
    sender: Arc<Mutex<Option<Responder>>>,
}

impl ResponseSlot {
    fn new(protocol: Protocol, sender: Responder) -> Self {
        Self {
            protocol,
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Responder>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once a response went through this slot.
    pub fn is_filled(&self) -> bool {
        self.lock().is_none()
    }

    /// True when nobody is waiting for the response any more.
    pub fn is_closed(&self) -> bool {
        self.lock().as_ref().is_some_and(|sender| sender.is_closed())
    }

    /// Hand a response to the connection task.
    pub fn send(&self, status: StatusCode, mut headers: HeaderMap, body: Body) -> Result<(), StreamerError> {
        let sender = self.lock().take().ok_or(StreamerError::HeadersAlreadySent)?;

        if self.protocol == Protocol::Http2 {
            for name in CONNECTION_SPECIFIC_HEADERS {
                headers.remove(name);
            }
        }

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        sender
            .send(response)
            .map_err(|_| StreamerError::Aborted("client went away before the response".into()))
    }
}

/// One in-flight request/response exchange.
pub struct Streamer {
    protocol: Protocol,
    method: Method,
    host: String,
    url: Url,
    headers: HeaderMap,
    body: Option<Body>,
    responder: ResponseSlot,
    sent_status: Option<StatusCode>,
}

impl Streamer {
    /// Wrap an inbound request. Host and header handling follow the
    /// negotiated protocol version.
    pub fn new(
        request: Request<Body>,
        responder: Responder,
    ) -> Result<Self, StreamerError> {
        let (parts, body) = request.into_parts();
        let protocol = Protocol::from_version(parts.version);

        let from_header = || {
            parts
                .headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let from_authority = || parts.uri.authority().map(|a| a.as_str().to_string());
        let host = match protocol {
            Protocol::Http2 => from_authority().or_else(from_header),
            Protocol::Http1 => from_header().or_else(from_authority),
        }
        .filter(|h| !h.is_empty())
        .ok_or(StreamerError::InvalidRequest("missing host"))?;

        let target = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        if !target.starts_with('/') {
            return Err(StreamerError::InvalidRequest("request target must be a path"));
        }
        let scheme = parts.uri.scheme_str().unwrap_or("http");
        let url = Url::parse(&format!("{scheme}://{host}{target}"))
            .map_err(|_| StreamerError::InvalidRequest("malformed request url"))?;

        Ok(Self {
            protocol,
            method: parts.method,
            host,
            url,
            headers: parts.headers,
            body: Some(body),
            responder: ResponseSlot::new(protocol, responder),
            sent_status: None,
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value with duplicates joined: `cookie` fields with `"; "`,
    /// everything else with `", "`.
    pub fn header(&self, name: &str) -> Option<String> {
        let separator = if name.eq_ignore_ascii_case("cookie") { "; " } else { ", " };
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(separator))
        }
    }

    /// Every value of a header, in arrival order (e.g. `set-cookie`).
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// True once a terminal send has been issued.
    pub fn headers_sent(&self) -> bool {
        self.responder.is_filled()
    }

    /// True when the client disconnected before a response was sent.
    pub fn is_aborted(&self) -> bool {
        self.responder.is_closed()
    }

    /// A handle on this exchange's response slot that outlives the `Streamer`.
    pub fn response_slot(&self) -> ResponseSlot {
        self.responder.clone()
    }

    /// Status of the response already handed off, if any.
    pub fn sent_status(&self) -> Option<StatusCode> {
        self.sent_status
    }

    /// Take the raw body stream. Fails if the body was already consumed.
    pub fn take_reader(&mut self) -> Result<BodyReader, StreamerError> {
        self.body
            .take()
            .map(|body| BodyReader {
                inner: body.into_data_stream(),
            })
            .ok_or(StreamerError::BodyConsumed)
    }

    /// Buffer the entire body, failing once it grows past `limit` bytes.
    pub async fn read_body(&mut self, limit: usize) -> Result<Bytes, StreamerError> {
        let mut reader = self.take_reader()?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = reader.next_chunk().await? {
            if buffer.len() + chunk.len() > limit {
                return Err(StreamerError::BodyTooLarge(limit));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    pub fn send_empty(&mut self, status: StatusCode, headers: HeaderMap) -> Result<(), StreamerError> {
        self.respond(status, headers, Body::empty())
    }

    pub fn send_string(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
        data: impl Into<String>,
    ) -> Result<(), StreamerError> {
        self.respond(status, headers, Body::from(data.into()))
    }

    pub fn send_buffer(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
        data: Bytes,
    ) -> Result<(), StreamerError> {
        self.respond(status, headers, Body::from(data))
    }

    /// Send headers now and let `body` produce the payload as it becomes
    /// available.
    pub fn send_stream(&mut self, status: StatusCode, headers: HeaderMap, body: Body) -> Result<(), StreamerError> {
        self.respond(status, headers, body)
    }

    /// Serve `reqpath` from below `root`. Missing files, dotfiles and paths
    /// escaping the root answer 404; other I/O failures answer 500.
    pub async fn send_file(
        &mut self,
        status: StatusCode,
        mut headers: HeaderMap,
        root: &Path,
        reqpath: &str,
    ) -> Result<(), StreamerError> {
        let Some(path) = resolve_within(root, reqpath) else {
            tracing::debug!(reqpath, "Rejected file path");
            return self.send_empty(StatusCode::NOT_FOUND, HeaderMap::new());
        };

        match tokio::fs::read(&path).await {
            Ok(contents) => {
                headers
                    .entry(header::CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static("application/octet-stream"));
                self.send_buffer(status, headers, Bytes::from(contents))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "File not found");
                self.send_empty(StatusCode::NOT_FOUND, HeaderMap::new())
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read file");
                self.send_empty(StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new())
            }
        }
    }

    pub fn redirect(&mut self, status: StatusCode, location: &str) -> Result<(), StreamerError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_str(location)?);
        self.send_empty(status, headers)
    }

    fn respond(&mut self, status: StatusCode, headers: HeaderMap, body: Body) -> Result<(), StreamerError> {
        if self.responder.is_filled() {
            tracing::error!(
                url = %self.url,
                status = %status,
                "Terminal send after the response was already sent"
            );
            return Err(StreamerError::HeadersAlreadySent);
        }
        self.sent_status = Some(status);
        self.responder.send(status, headers, body)
    }
}

/// Join `reqpath` onto `root`, refusing traversal and dotfiles.
fn resolve_within(root: &Path, reqpath: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(reqpath.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => {
                if part.to_string_lossy().starts_with('.') {
                    return None;
                }
                resolved.push(part);
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streamer(request: Request<Body>) -> (Streamer, oneshot::Receiver<Response<Body>>) {
        let (tx, rx) = oneshot::channel();
        (Streamer::new(request, tx).unwrap(), rx)
    }

    #[test]
    fn http1_host_comes_from_header() {
        let req = Request::builder()
            .uri("/wiki/page?x=1")
            .header("Host", "example.com:8080")
            .body(Body::empty())
            .unwrap();
        let (s, _rx) = streamer(req);
        assert_eq!(s.protocol(), Protocol::Http1);
        assert_eq!(s.host(), "example.com:8080");
        assert_eq!(s.url().as_str(), "http://example.com:8080/wiki/page?x=1");
    }

    #[test]
    fn http2_host_comes_from_authority() {
        let req = Request::builder()
            .version(Version::HTTP_2)
            .uri("https://wiki.local/auth/login")
            .body(Body::empty())
            .unwrap();
        let (s, _rx) = streamer(req);
        assert_eq!(s.protocol(), Protocol::Http2);
        assert_eq!(s.host(), "wiki.local");
        assert_eq!(s.url().path(), "/auth/login");
    }

    #[test]
    fn missing_host_is_rejected() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (tx, _rx) = oneshot::channel();
        assert!(matches!(
            Streamer::new(req, tx),
            Err(StreamerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn split_cookie_fields_are_rejoined() {
        let req = Request::builder()
            .version(Version::HTTP_2)
            .uri("https://wiki.local/")
            .header("cookie", "a=1")
            .header("cookie", "b=2")
            .header("accept", "text/html")
            .header("accept", "text/plain")
            .body(Body::empty())
            .unwrap();
        let (s, _rx) = streamer(req);
        assert_eq!(s.header("Cookie").as_deref(), Some("a=1; b=2"));
        assert_eq!(s.header("accept").as_deref(), Some("text/html, text/plain"));
        assert_eq!(s.header_all("cookie"), vec!["a=1", "b=2"]);
        assert_eq!(s.header("x-missing"), None);
    }

    #[tokio::test]
    async fn second_terminal_send_fails() {
        let req = Request::builder()
            .uri("/")
            .header("host", "h")
            .body(Body::empty())
            .unwrap();
        let (mut s, rx) = streamer(req);
        s.send_string(StatusCode::OK, HeaderMap::new(), "first").unwrap();
        assert!(s.headers_sent());
        assert!(matches!(
            s.send_empty(StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new()),
            Err(StreamerError::HeadersAlreadySent)
        ));
        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn http2_strips_connection_headers() {
        let req = Request::builder()
            .version(Version::HTTP_2)
            .uri("https://h/")
            .body(Body::empty())
            .unwrap();
        let (mut s, rx) = streamer(req);
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("x-kept", HeaderValue::from_static("yes"));
        s.send_empty(StatusCode::OK, headers).unwrap();
        let response = rx.await.unwrap();
        assert!(response.headers().get("connection").is_none());
        assert_eq!(response.headers()["x-kept"], "yes");
    }

    #[tokio::test]
    async fn read_body_enforces_limit_and_single_consumption() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header("host", "h")
            .body(Body::from("0123456789"))
            .unwrap();
        let (mut s, _rx) = streamer(req);
        assert!(matches!(s.read_body(4).await, Err(StreamerError::BodyTooLarge(4))));
        assert!(matches!(s.read_body(100).await, Err(StreamerError::BodyConsumed)));
    }

    #[tokio::test]
    async fn redirect_sets_location() {
        let req = Request::builder()
            .uri("/")
            .header("host", "h")
            .body(Body::empty())
            .unwrap();
        let (mut s, rx) = streamer(req);
        s.redirect(StatusCode::FOUND, "/auth/login").unwrap();
        let response = rx.await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/auth/login");
    }

    #[test]
    fn file_paths_stay_inside_root() {
        let root = Path::new("public");
        assert_eq!(
            resolve_within(root, "/login.html"),
            Some(PathBuf::from("public/login.html"))
        );
        assert_eq!(resolve_within(root, "../secret"), None);
        assert_eq!(resolve_within(root, "a/.env"), None);
    }

    #[tokio::test]
    async fn missing_file_answers_404() {
        let req = Request::builder()
            .uri("/")
            .header("host", "h")
            .body(Body::empty())
            .unwrap();
        let (mut s, rx) = streamer(req);
        s.send_file(StatusCode::OK, HeaderMap::new(), Path::new("public"), "no-such-file.html")
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn dropped_receiver_reads_as_aborted() {
        let req = Request::builder()
            .uri("/")
            .header("host", "h")
            .body(Body::empty())
            .unwrap();
        let (s, rx) = streamer(req);
        assert!(!s.is_aborted());
        drop(rx);
        assert!(s.is_aborted());
        assert!(!s.headers_sent());
    }

    #[tokio::test]
    async fn response_slot_outlives_the_streamer() {
        let req = Request::builder()
            .uri("/")
            .header("host", "h")
            .body(Body::empty())
            .unwrap();
        let (s, rx) = streamer(req);
        let slot = s.response_slot();
        drop(s);

        slot.send(StatusCode::BAD_REQUEST, HeaderMap::new(), Body::from("bad"))
            .unwrap();
        assert!(slot.is_filled());
        assert_eq!(rx.await.unwrap().status(), StatusCode::BAD_REQUEST);
        assert!(matches!(
            slot.send(StatusCode::OK, HeaderMap::new(), Body::empty()),
            Err(StreamerError::HeadersAlreadySent)
        ));
    }
}
