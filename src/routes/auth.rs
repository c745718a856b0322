//! Account registration and login routes.
//!
//! # Responsibilities
//! - Serve the login and registration pages
//! - Relay the two-step registration and login exchanges to a
//!   [`PasswordProtocol`] and keep the per-user server state between steps
//! - Open a session once a login completes
//!
//! # Data Flow
//! ```text
//! POST /auth/register/1  username, registrationRequest → registration response
//! POST /auth/register/2  username, registrationRecord → stored
//! POST /auth/login/1     username, startLoginRequest   → login response (login state kept)
//! POST /auth/login/2     username, finishLoginRequest  → session cookie
//! ```
//!
//! # Design Decisions
//! - The cryptography lives behind `PasswordProtocol`; these routes only move
//!   opaque strings between the client and the protocol
//! - Client mistakes (unknown user, missing field, out-of-order step) are
//!   400 text responses

use crate::routing::body::BodyFormat;
use crate::routing::context::RequestContext;
use crate::routing::tree::{handler, HandlerResult, RouteDef};
use crate::security::sessions::{Identity, SessionStore};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("password protocol is not configured")]
    Unavailable,

    #[error("protocol message rejected: {0}")]
    Rejected(String),
}

/// Server half of the login exchange after the first step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStart {
    pub server_login_state: String,
    pub login_response: String,
}

/// Server side of an asymmetric password-authenticated key exchange.
/// All messages are opaque, transport-encoded strings.
pub trait PasswordProtocol: Send + Sync {
    fn registration_response(
        &self,
        user_identifier: &str,
        registration_request: &str,
    ) -> Result<String, ProtocolError>;

    fn start_login(
        &self,
        user_identifier: &str,
        registration_record: &str,
        start_login_request: &str,
    ) -> Result<LoginStart, ProtocolError>;

    /// Returns the session key on success.
    fn finish_login(
        &self,
        server_login_state: &str,
        finish_login_request: &str,
    ) -> Result<String, ProtocolError>;
}

/// Placeholder used when no protocol implementation is wired in. Every step
/// fails with [`ProtocolError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableProtocol;

impl PasswordProtocol for UnavailableProtocol {
    fn registration_response(&self, _: &str, _: &str) -> Result<String, ProtocolError> {
        Err(ProtocolError::Unavailable)
    }

    fn start_login(&self, _: &str, _: &str, _: &str) -> Result<LoginStart, ProtocolError> {
        Err(ProtocolError::Unavailable)
    }

    fn finish_login(&self, _: &str, _: &str) -> Result<String, ProtocolError> {
        Err(ProtocolError::Unavailable)
    }
}

/// Per-user state kept between exchange steps, keyed by user identifier.
#[derive(Debug, Default)]
pub struct AuthStore {
    user_identifiers: DashMap<String, String>,
    registration_records: DashMap<String, String>,
    login_states: DashMap<String, String>,
    session_keys: DashMap<String, String>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `username` known and return its identifier. Idempotent.
    pub fn provision_user(&self, username: &str) -> String {
        self.user_identifiers
            .entry(username.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .value()
            .clone()
    }

    pub fn user_identifier(&self, username: &str) -> Option<String> {
        self.user_identifiers.get(username).map(|e| e.value().clone())
    }

    pub fn registration_record(&self, user_identifier: &str) -> Option<String> {
        self.registration_records
            .get(user_identifier)
            .map(|e| e.value().clone())
    }

    pub fn has_session_key(&self, user_identifier: &str) -> bool {
        self.session_keys.contains_key(user_identifier)
    }
}

/// Shared state for the `/auth` handlers.
#[derive(Clone)]
pub struct AuthRoutes {
    pub store: Arc<AuthStore>,
    pub protocol: Arc<dyn PasswordProtocol>,
    pub sessions: Arc<dyn SessionStore>,
}

impl AuthRoutes {
    /// The `/auth` subtree.
    pub fn route(self) -> RouteDef {
        let state = Arc::new(self);
        RouteDef::new("^/auth")
            .methods([Method::GET, Method::HEAD, Method::POST, Method::PUT])
            .child(
                RouteDef::new("^/register")
                    .methods([Method::GET, Method::HEAD])
                    .handler(handler(|ctx| page(ctx, "register.html"))),
            )
            .child(form_step("^/register/1", &state, register_start))
            .child(form_step("^/register/2", &state, register_finish))
            .child(
                RouteDef::new("^/login")
                    .methods([Method::GET, Method::HEAD])
                    .handler(handler(|ctx| page(ctx, "login.html"))),
            )
            .child(form_step("^/login/1", &state, login_start))
            .child(form_step("^/login/2", &state, login_finish))
    }
}

fn form_step<F, Fut>(pattern: &str, state: &Arc<AuthRoutes>, step: F) -> RouteDef
where
    F: Fn(RequestContext, Arc<AuthRoutes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let state = Arc::clone(state);
    RouteDef::new(pattern)
        .methods([Method::POST])
        .body_format(BodyFormat::FormUrlencoded)
        .handler(handler(move |ctx| step(ctx, Arc::clone(&state))))
}

async fn page(mut ctx: RequestContext, file: &'static str) -> HandlerResult {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    ctx.send_static(StatusCode::OK, headers, file).await?;
    Ok(ctx)
}

async fn register_start(ctx: RequestContext, auth: Arc<AuthRoutes>) -> HandlerResult {
    let (ctx, user_identifier) = match known_user(ctx, &auth) {
        Ok(found) => found,
        Err(sent) => return sent,
    };
    let (ctx, request) = match required_field(ctx, "registrationRequest") {
        Ok(found) => found,
        Err(sent) => return sent,
    };
    match auth.protocol.registration_response(&user_identifier, &request) {
        Ok(response) => text(ctx, StatusCode::OK, response),
        Err(e) => protocol_failure(ctx, e),
    }
}

async fn register_finish(ctx: RequestContext, auth: Arc<AuthRoutes>) -> HandlerResult {
    let (ctx, user_identifier) = match known_user(ctx, &auth) {
        Ok(found) => found,
        Err(sent) => return sent,
    };
    let (mut ctx, record) = match required_field(ctx, "registrationRecord") {
        Ok(found) => found,
        Err(sent) => return sent,
    };
    auth.store.registration_records.insert(user_identifier, record);
    tracing::info!(username = %form_value(&ctx, "username").unwrap_or_default(), "User registered");
    ctx.send_empty(StatusCode::OK, HeaderMap::new())?;
    Ok(ctx)
}

async fn login_start(ctx: RequestContext, auth: Arc<AuthRoutes>) -> HandlerResult {
    let (ctx, user_identifier) = match known_user(ctx, &auth) {
        Ok(found) => found,
        Err(sent) => return sent,
    };
    let (ctx, request) = match required_field(ctx, "startLoginRequest") {
        Ok(found) => found,
        Err(sent) => return sent,
    };
    let Some(record) = auth.store.registration_record(&user_identifier) else {
        return text(ctx, StatusCode::BAD_REQUEST, "User has not registered");
    };
    match auth.protocol.start_login(&user_identifier, &record, &request) {
        Ok(start) => {
            auth.store
                .login_states
                .insert(user_identifier, start.server_login_state);
            text(ctx, StatusCode::OK, start.login_response)
        }
        Err(e) => protocol_failure(ctx, e),
    }
}

async fn login_finish(ctx: RequestContext, auth: Arc<AuthRoutes>) -> HandlerResult {
    let (ctx, user_identifier) = match known_user(ctx, &auth) {
        Ok(found) => found,
        Err(sent) => return sent,
    };
    let (mut ctx, request) = match required_field(ctx, "finishLoginRequest") {
        Ok(found) => found,
        Err(sent) => return sent,
    };
    let Some((_, login_state)) = auth.store.login_states.remove(&user_identifier) else {
        return text(ctx, StatusCode::BAD_REQUEST, "No login in progress");
    };
    let session_key = match auth.protocol.finish_login(&login_state, &request) {
        Ok(key) => key,
        Err(e) => return protocol_failure(ctx, e),
    };
    auth.store
        .session_keys
        .insert(user_identifier.clone(), session_key);

    let username = form_value(&ctx, "username").unwrap_or_default();
    let session_id = auth.sessions.create(Identity {
        user_id: user_identifier,
        username: username.clone(),
    });
    tracing::info!(username = %username, "User logged in");

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&format!("session={session_id}; Path=/; HttpOnly; SameSite=Strict"))
            .map_err(crate::http::streamer::StreamerError::from)?,
    );
    ctx.send_empty(StatusCode::OK, headers)?;
    Ok(ctx)
}

fn form_value(ctx: &RequestContext, name: &str) -> Option<String> {
    ctx.data()
        .as_form()
        .and_then(|form| form.get(name))
        .map(str::to_string)
}

/// Look up the posted `username`. On failure the 400 has been sent and the
/// handler result is handed back for returning.
fn known_user(ctx: RequestContext, auth: &AuthRoutes) -> Result<(RequestContext, String), HandlerResult> {
    let (ctx, username) = required_field(ctx, "username")?;
    match auth.store.user_identifier(&username) {
        Some(id) => Ok((ctx, id)),
        None => {
            tracing::debug!(username = %username, "Unknown user");
            Err(text(ctx, StatusCode::BAD_REQUEST, format!("Unknown user '{username}'")))
        }
    }
}

fn required_field(ctx: RequestContext, name: &str) -> Result<(RequestContext, String), HandlerResult> {
    match form_value(&ctx, name) {
        Some(value) => Ok((ctx, value)),
        None => Err(text(ctx, StatusCode::BAD_REQUEST, format!("Missing field '{name}'"))),
    }
}

fn protocol_failure(ctx: RequestContext, error: ProtocolError) -> HandlerResult {
    match error {
        ProtocolError::Unavailable => {
            tracing::error!("Password protocol is not configured");
            text(ctx, StatusCode::INTERNAL_SERVER_ERROR, "Password protocol unavailable")
        }
        ProtocolError::Rejected(reason) => {
            tracing::debug!(%reason, "Protocol message rejected");
            text(ctx, StatusCode::BAD_REQUEST, "Authentication failed")
        }
    }
}

fn text(mut ctx: RequestContext, status: StatusCode, body: impl Into<String>) -> HandlerResult {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    ctx.send_string(status, headers, body)?;
    Ok(ctx)
}
