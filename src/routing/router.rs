//! Request dispatch.
//!
//! # Responsibilities
//! - Run the auth gate, route matching and body materialization
//! - Drive the matched handler chain root to leaf
//! - Turn rejections into plain-text responses
//! - Log failures with the request URL and record request metrics
//!
//! # Data Flow
//! ```text
//! Received
//!     → AuthChecked      (405 unknown method, 400 malformed cookie)
//!     → RouteMatched     (404 empty chain)
//!     → AclChecked       (403 missing trusted-client header)
//!     → BodyMaterialized (400 bad UTF-8, 413 too large, 404 stopped at an
//!                         inner node, 500 no body format)
//!     → Handling         (root to leaf, stops once headers are sent or the
//!                         client is gone; 400 malformed multipart)
//!     → Responded | Rejected
//! ```
//!
//! # Design Decisions
//! - The tree and options are immutable and shared across request tasks
//! - The dispatcher keeps the exchange's `ResponseSlot`, so it can still answer
//!   after a failing handler dropped the context
//! - Malformed multipart framing is the client's fault and answers 400; any
//!   other handler error leaves the slot unsent and the server answers 500
//! - A chain that finishes without a response answers 404

use crate::config::ServerConfig;
use crate::http::multipart::MultipartError;
use crate::http::sse::SseError;
use crate::http::streamer::{ResponseSlot, Streamer, StreamerError};
use crate::observability::metrics;
use crate::routing::body::{BodyData, BodyError, BodyFormat};
use crate::routing::context::RequestContext;
use crate::routing::matcher::match_route;
use crate::routing::tree::RouteTree;
use crate::security::auth::{AuthGate, Rejection};
use crate::security::sessions::SessionStore;
use axum::body::Body;
use axum::http::header::InvalidHeaderName;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

/// Failures that abort a request after dispatch started.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] StreamerError),

    #[error(transparent)]
    Sse(#[from] SseError),

    #[error(transparent)]
    Multipart(#[from] MultipartError),

    /// Raised by application handlers.
    #[error("{0}")]
    Handler(String),
}

impl DispatchError {
    pub fn handler(message: impl Into<String>) -> Self {
        DispatchError::Handler(message.into())
    }
}

/// How a dispatched request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler (or the 404 fallback) sent a response.
    Responded(StatusCode),
    /// The pipeline refused the request before any handler ran.
    Rejected(StatusCode),
}

impl DispatchOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchOutcome::Responded(status) | DispatchOutcome::Rejected(status) => *status,
        }
    }
}

/// Settings the pipeline and handlers read at request time.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Stripped from the request path before matching; empty for none.
    pub path_prefix: String,
    pub server_name: String,
    pub csrf_disable: bool,
    pub enable_browser_cache: bool,
    pub enable_gzip: bool,
    pub max_body_size: usize,
    pub trusted_client_header: HeaderName,
    pub trusted_client_value: String,
    pub static_root: PathBuf,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            path_prefix: String::new(),
            server_name: "MWS".to_string(),
            csrf_disable: false,
            enable_browser_cache: true,
            enable_gzip: true,
            max_body_size: 2 * 1024 * 1024,
            trusted_client_header: HeaderName::from_static("x-requested-with"),
            trusted_client_value: "TiddlyWiki".to_string(),
            static_root: PathBuf::from("public"),
        }
    }
}

impl RouterOptions {
    pub fn from_config(config: &ServerConfig) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            path_prefix: config.router.path_prefix.clone(),
            server_name: config.router.server_name.clone(),
            csrf_disable: config.router.csrf_disable,
            enable_browser_cache: config.router.enable_browser_cache,
            enable_gzip: config.router.enable_gzip,
            max_body_size: config.security.max_body_size,
            trusted_client_header: HeaderName::try_from(config.router.trusted_client_header.as_str())?,
            trusted_client_value: config.router.trusted_client_value.clone(),
            static_root: PathBuf::from(&config.static_files.root),
        })
    }
}

pub struct Router {
    tree: RouteTree,
    gate: AuthGate,
    options: Arc<RouterOptions>,
}

impl Router {
    pub fn new(tree: RouteTree, options: RouterOptions, sessions: Arc<dyn SessionStore>) -> Self {
        let gate = AuthGate::new(&options, sessions);
        Self {
            tree,
            gate,
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Serve one request to completion. Never fails: errors are logged with
    /// the request URL and, when nothing was sent, surface as a 500 from the
    /// server's fallback.
    pub async fn handle(&self, streamer: Streamer) {
        let request_id = Uuid::new_v4();
        let method = streamer.method().clone();
        let url = streamer.url().clone();
        let span = tracing::info_span!(
            "request",
            %request_id,
            method = %method,
            path = %url.path(),
            protocol = %streamer.protocol()
        );
        let started = Instant::now();

        match self.dispatch(streamer).instrument(span).await {
            Ok(outcome) => {
                tracing::debug!(%request_id, status = %outcome.status(), "Request finished");
                metrics::record_request(&method, outcome.status(), started.elapsed());
            }
            Err(DispatchError::Transport(StreamerError::Aborted(reason))) => {
                tracing::debug!(%request_id, url = %url, %reason, "Client disconnected");
            }
            Err(e) => {
                tracing::error!(%request_id, url = %url, error = %e, "Request failed");
                metrics::record_request(&method, StatusCode::INTERNAL_SERVER_ERROR, started.elapsed());
            }
        }
    }

    /// Run the pipeline for one request.
    pub async fn dispatch(&self, mut streamer: Streamer) -> Result<DispatchOutcome, DispatchError> {
        let slot = streamer.response_slot();
        let auth = match self.gate.check_request(&streamer, self.tree.recognized_methods()) {
            Ok(auth) => auth,
            Err(rejection) => return reject(&slot, rejection),
        };

        tracing::debug!(
            path = %streamer.url().path(),
            headers = ?streamer.headers(),
            username = auth.username().unwrap_or("(anonymous)"),
            "Request received"
        );

        let path = streamer.url().path().to_string();
        let chain = match strip_prefix(&path, &self.options.path_prefix) {
            Some(routed) => match_route(self.tree.root(), routed, streamer.method()),
            None => Vec::new(),
        };
        if chain.is_empty() {
            return reject(&slot, Rejection::new(StatusCode::NOT_FOUND, "route", "Not found"));
        }

        if let Err(rejection) = self.gate.check_matched_routes(&auth, &chain, streamer.headers()) {
            return reject(&slot, rejection);
        }

        let body_format = chain.iter().find_map(|m| m.node.body_format());
        let data = if is_bodyless(streamer.method()) {
            BodyData::Unread
        } else {
            match body_format {
                // The request stopped at an inner node: none of its children
                // took this path.
                None if chain.last().is_some_and(|m| !m.node.children().is_empty()) => {
                    return reject(&slot, Rejection::new(StatusCode::NOT_FOUND, "route", "Not found"));
                }
                None => {
                    tracing::warn!(path = %path, "Route chain declares no body format for a request with a body");
                    return reject(
                        &slot,
                        Rejection::new(StatusCode::INTERNAL_SERVER_ERROR, "body_format", "Invalid bodyFormat"),
                    );
                }
                Some(BodyFormat::Stream) => BodyData::Unread,
                Some(format) => {
                    if streamer.is_aborted() {
                        return Err(client_gone().into());
                    }
                    let bytes = match streamer.read_body(self.options.max_body_size).await {
                        Ok(bytes) => bytes,
                        Err(StreamerError::BodyTooLarge(limit)) => {
                            return reject(
                                &slot,
                                Rejection::new(
                                    StatusCode::PAYLOAD_TOO_LARGE,
                                    "body_size",
                                    format!("Request body exceeds {limit} bytes"),
                                ),
                            );
                        }
                        Err(e) => return Err(e.into()),
                    };
                    match BodyData::decode(format, bytes) {
                        Ok(data) => data,
                        Err(BodyError::InvalidUtf8) => {
                            return reject(
                                &slot,
                                Rejection::new(StatusCode::BAD_REQUEST, "body_encoding", "Invalid UTF-8 in request body"),
                            );
                        }
                    }
                }
            }
        };

        let handlers: Vec<_> = chain.iter().map(|m| Arc::clone(m.node.handler())).collect();
        let mut ctx = RequestContext::new(streamer, chain, body_format, data, auth, Arc::clone(&self.options));

        for (index, handler) in handlers.iter().enumerate() {
            if ctx.streamer().is_aborted() {
                return Err(client_gone().into());
            }
            ctx.enter(index);
            ctx = match handler(ctx).await {
                Ok(ctx) => ctx,
                Err(DispatchError::Multipart(e)) if e.is_client_error() && !slot.is_filled() => {
                    return reject(&slot, Rejection::new(StatusCode::BAD_REQUEST, "multipart", e.to_string()));
                }
                Err(e) => return Err(e),
            };
            if ctx.headers_sent() {
                break;
            }
        }

        if !ctx.headers_sent() {
            tracing::debug!(path = %path, "No handler responded");
            ctx.send_string(StatusCode::NOT_FOUND, text_headers(), "Not found")?;
        }

        let status = ctx.streamer().sent_status().unwrap_or(StatusCode::OK);
        Ok(DispatchOutcome::Responded(status))
    }
}

/// Send a gate or pipeline rejection as plain text.
fn reject(slot: &ResponseSlot, rejection: Rejection) -> Result<DispatchOutcome, DispatchError> {
    tracing::debug!(
        status = %rejection.status,
        reason = rejection.reason,
        message = %rejection.message,
        "Request rejected"
    );
    metrics::record_rejection(rejection.reason);
    slot.send(rejection.status, text_headers(), Body::from(rejection.message))?;
    Ok(DispatchOutcome::Rejected(rejection.status))
}

fn client_gone() -> StreamerError {
    StreamerError::Aborted("client went away before the response".into())
}

fn text_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers
}

fn is_bodyless(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Remove the mount prefix. `None` when the path lies outside it.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    match path.strip_prefix(prefix)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}
