//! Per-request state handed through the handler chain.

use crate::http::multipart::{parse_boundary, MultipartError, MultipartReader};
use crate::http::response::{self, Prepared, ResponseBody, ResponseOptions};
use crate::http::sse::{self, SseSender};
use crate::http::streamer::{Streamer, StreamerError};
use crate::routing::body::{BodyData, BodyFormat};
use crate::routing::matcher::RouteMatch;
use crate::routing::router::{DispatchError, RouterOptions};
use crate::security::auth::AuthState;
use axum::body::Body;
use axum::http::{Extensions, HeaderMap, Method, StatusCode};
use bytes::Bytes;
use std::sync::Arc;
use url::Url;

/// Everything a handler knows about the request it is serving.
///
/// Handlers take the context by value and return it; the dispatcher moves
/// it from one handler to the next. Handlers that want to leave data for a
/// later handler put it in [`extensions_mut`](Self::extensions_mut).
pub struct RequestContext {
    streamer: Streamer,
    chain: Vec<RouteMatch>,
    current: usize,
    body_format: Option<BodyFormat>,
    data: BodyData,
    auth: AuthState,
    query: Vec<(String, String)>,
    extensions: Extensions,
    options: Arc<RouterOptions>,
}

impl RequestContext {
    pub(crate) fn new(
        streamer: Streamer,
        chain: Vec<RouteMatch>,
        body_format: Option<BodyFormat>,
        data: BodyData,
        auth: AuthState,
        options: Arc<RouterOptions>,
    ) -> Self {
        let query = streamer
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self {
            streamer,
            chain,
            current: 0,
            body_format,
            data,
            auth,
            query,
            extensions: Extensions::new(),
            options,
        }
    }

    pub(crate) fn enter(&mut self, index: usize) {
        self.current = index;
    }

    pub fn streamer(&self) -> &Streamer {
        &self.streamer
    }

    pub fn streamer_mut(&mut self) -> &mut Streamer {
        &mut self.streamer
    }

    pub fn method(&self) -> &Method {
        self.streamer.method()
    }

    pub fn url(&self) -> &Url {
        self.streamer.url()
    }

    pub fn host(&self) -> &str {
        self.streamer.host()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.streamer.headers()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.streamer.header(name)
    }

    /// The matched chain, root first.
    pub fn route_chain(&self) -> &[RouteMatch] {
        &self.chain
    }

    /// Captures of the route whose handler is running.
    pub fn params(&self) -> &[Option<String>] {
        self.chain
            .get(self.current)
            .map(|m| m.params.as_slice())
            .unwrap_or(&[])
    }

    /// Capture group `index` (0-based, excluding the whole match).
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params().get(index).and_then(|p| p.as_deref())
    }

    pub fn body_format(&self) -> Option<BodyFormat> {
        self.body_format
    }

    pub fn data(&self) -> &BodyData {
        &self.data
    }

    pub fn take_data(&mut self) -> BodyData {
        std::mem::take(&mut self.data)
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    /// First query-string value for `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    pub fn headers_sent(&self) -> bool {
        self.streamer.headers_sent()
    }

    pub fn send_empty(&mut self, status: StatusCode, headers: HeaderMap) -> Result<(), StreamerError> {
        self.streamer.send_empty(status, headers)
    }

    pub fn send_string(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
        data: impl Into<String>,
    ) -> Result<(), StreamerError> {
        self.streamer.send_string(status, headers, data)
    }

    pub fn send_buffer(&mut self, status: StatusCode, headers: HeaderMap, data: Bytes) -> Result<(), StreamerError> {
        self.streamer.send_buffer(status, headers, data)
    }

    pub fn send_stream(&mut self, status: StatusCode, headers: HeaderMap, body: Body) -> Result<(), StreamerError> {
        self.streamer.send_stream(status, headers, body)
    }

    /// Serve `reqpath` from the configured static root.
    pub async fn send_static(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
        reqpath: &str,
    ) -> Result<(), StreamerError> {
        let root = self.options.static_root.clone();
        self.streamer.send_file(status, headers, &root, reqpath).await
    }

    pub fn redirect(&mut self, status: StatusCode, location: &str) -> Result<(), StreamerError> {
        self.streamer.redirect(status, location)
    }

    /// Send with conditional caching and compression applied.
    pub fn send_response(
        &mut self,
        status: StatusCode,
        headers: HeaderMap,
        body: impl Into<ResponseBody>,
    ) -> Result<(), StreamerError> {
        let options = ResponseOptions {
            enable_browser_cache: self.options.enable_browser_cache,
            enable_gzip: self.options.enable_gzip,
        };
        match response::prepare(options, self.streamer.headers(), status, headers, body.into()) {
            Prepared::NotModified(headers) => self.streamer.send_empty(StatusCode::NOT_MODIFIED, headers),
            Prepared::Full {
                status,
                headers,
                body: ResponseBody::Text(text),
            } => self.streamer.send_string(status, headers, text),
            Prepared::Full {
                status,
                headers,
                body: ResponseBody::Binary(bytes),
            } => self.streamer.send_buffer(status, headers, bytes),
        }
    }

    /// Open a server-sent event stream. Headers go out immediately.
    pub fn send_sse(&mut self, retry_ms: i64) -> Result<SseSender, DispatchError> {
        let (headers, body, sender) = sse::open(retry_ms)?;
        self.streamer.send_stream(StatusCode::OK, headers, body)?;
        Ok(sender)
    }

    /// Read a `multipart/form-data` body part by part.
    ///
    /// The content type is checked before any body bytes are consumed.
    pub fn read_multipart(&mut self) -> Result<MultipartReader, MultipartError> {
        let content_type = self.streamer.header("content-type");
        let boundary = parse_boundary(content_type.as_deref())?;
        let reader = self.streamer.take_reader()?;
        Ok(MultipartReader::new(&boundary, reader))
    }
}
