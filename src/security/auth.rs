//! Authorization gate.
//!
//! # Responsibilities
//! - Reject methods the route tree does not recognize (405)
//! - Parse cookies and resolve the session identity
//! - Derive the access level a request needs from its method
//! - Enforce the trusted-client header on state-changing requests (403)
//!
//! # Design Decisions
//! - The header check runs once over the whole matched chain, before any
//!   handler, so a rejected request has no side effects
//! - A node or the router as a whole may opt out of the header check
//! - Rejections are values; the dispatcher turns them into responses

use crate::http::streamer::Streamer;
use crate::routing::matcher::RouteMatch;
use crate::routing::router::RouterOptions;
use crate::routing::tree::MethodSet;
use crate::security::cookies::parse_cookie_header;
use crate::security::sessions::{Identity, SessionStore};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Access level a request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    Readers,
    Writers,
}

impl AuthLevel {
    /// Safe methods read; everything else writes.
    pub fn for_method(method: &Method) -> Self {
        match *method {
            Method::GET | Method::HEAD | Method::OPTIONS => AuthLevel::Readers,
            _ => AuthLevel::Writers,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthLevel::Readers => "readers",
            AuthLevel::Writers => "writers",
        }
    }
}

impl fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request authorization facts.
#[derive(Debug, Clone)]
pub struct AuthState {
    cookies: HashMap<String, String>,
    level: AuthLevel,
    identity: Option<Identity>,
}

impl AuthState {
    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn level(&self) -> AuthLevel {
        self.level
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn username(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.username.as_str())
    }
}

/// Why the gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub reason: &'static str,
    pub message: String,
}

impl Rejection {
    pub fn new(status: StatusCode, reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            message: message.into(),
        }
    }
}

pub struct AuthGate {
    csrf_disable: bool,
    server_name: String,
    trusted_header: HeaderName,
    trusted_value: String,
    sessions: Arc<dyn SessionStore>,
}

impl AuthGate {
    pub fn new(options: &RouterOptions, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            csrf_disable: options.csrf_disable,
            server_name: options.server_name.clone(),
            trusted_header: options.trusted_client_header.clone(),
            trusted_value: options.trusted_client_value.clone(),
            sessions,
        }
    }

    /// Checks that need no route: method recognition, cookies, identity.
    pub fn check_request(&self, streamer: &Streamer, recognized: &MethodSet) -> Result<AuthState, Rejection> {
        if !recognized.contains(streamer.method()) {
            return Err(Rejection::new(
                StatusCode::METHOD_NOT_ALLOWED,
                "method",
                "Method not recognized",
            ));
        }

        let header = streamer.header("cookie").unwrap_or_default();
        let cookies = parse_cookie_header(&header).map_err(|e| {
            tracing::debug!(error = %e, "Malformed cookie header");
            Rejection::new(StatusCode::BAD_REQUEST, "cookie", "Malformed cookie header")
        })?;

        let identity = cookies
            .get("session")
            .filter(|id| !id.is_empty())
            .and_then(|id| self.sessions.identity(id));

        Ok(AuthState {
            level: AuthLevel::for_method(streamer.method()),
            cookies,
            identity,
        })
    }

    /// The trusted-client header check, evaluated over every matched node.
    pub fn check_matched_routes(
        &self,
        auth: &AuthState,
        chain: &[RouteMatch],
        headers: &HeaderMap,
    ) -> Result<(), Rejection> {
        if self.csrf_disable || auth.level != AuthLevel::Writers || self.is_trusted_client(headers) {
            return Ok(());
        }
        if chain.iter().any(|m| !m.node.acl().csrf_disable) {
            return Err(Rejection::new(
                StatusCode::FORBIDDEN,
                "csrf",
                format!(
                    "'X-Requested-With' header required to login to '{}'",
                    self.server_name
                ),
            ));
        }
        Ok(())
    }

    fn is_trusted_client(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(&self.trusted_header)
            .iter()
            .any(|v| v.as_bytes() == self.trusted_value.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::matcher::match_route;
    use crate::routing::tree::{RouteDef, RouteTree};
    use crate::security::sessions::MemorySessionStore;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use tokio::sync::oneshot;

    fn streamer(method: Method, cookie: Option<&str>) -> Streamer {
        let mut builder = Request::builder().method(method).uri("/x").header("host", "wiki");
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }
        let (tx, _rx) = oneshot::channel();
        Streamer::new(builder.body(Body::empty()).unwrap(), tx).unwrap()
    }

    fn gate(sessions: MemorySessionStore) -> AuthGate {
        AuthGate::new(&RouterOptions::default(), Arc::new(sessions))
    }

    #[test]
    fn levels_follow_method() {
        assert_eq!(AuthLevel::for_method(&Method::GET), AuthLevel::Readers);
        assert_eq!(AuthLevel::for_method(&Method::OPTIONS), AuthLevel::Readers);
        assert_eq!(AuthLevel::for_method(&Method::DELETE), AuthLevel::Writers);
        assert_eq!(AuthLevel::for_method(&Method::PATCH), AuthLevel::Writers);
    }

    #[test]
    fn unrecognized_method_is_405() {
        let rejection = gate(MemorySessionStore::new())
            .check_request(&streamer(Method::PATCH, None), &MethodSet::standard())
            .unwrap_err();
        assert_eq!(rejection.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(rejection.message, "Method not recognized");
    }

    #[test]
    fn malformed_cookie_is_400() {
        let rejection = gate(MemorySessionStore::new())
            .check_request(&streamer(Method::GET, Some("a=%FF")), &MethodSet::standard())
            .unwrap_err();
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn session_cookie_resolves_identity() {
        let sessions = MemorySessionStore::new();
        let id = sessions.create(Identity {
            user_id: "u1".into(),
            username: "alice".into(),
        });
        let state = gate(sessions)
            .check_request(
                &streamer(Method::POST, Some(format!("theme=dark; session={id}").as_str())),
                &MethodSet::standard(),
            )
            .unwrap();
        assert_eq!(state.username(), Some("alice"));
        assert_eq!(state.level(), AuthLevel::Writers);
        assert_eq!(state.cookie("theme"), Some("dark"));
    }

    fn chain(csrf_disable_leaf: bool) -> Vec<RouteMatch> {
        let tree = RouteTree::build(
            RouteDef::new("^")
                .methods(MethodSet::standard())
                .csrf_disable(csrf_disable_leaf)
                .child(RouteDef::new("^/x").methods([Method::POST]).csrf_disable(csrf_disable_leaf)),
        )
        .unwrap();
        match_route(tree.root(), "/x", &Method::POST)
    }

    #[test]
    fn writers_need_the_trusted_header() {
        let gate = gate(MemorySessionStore::new());
        let state = gate
            .check_request(&streamer(Method::POST, None), &MethodSet::standard())
            .unwrap();

        let rejection = gate
            .check_matched_routes(&state, &chain(false), &HeaderMap::new())
            .unwrap_err();
        assert_eq!(rejection.status, StatusCode::FORBIDDEN);
        assert_eq!(
            rejection.message,
            "'X-Requested-With' header required to login to 'MWS'"
        );

        let mut headers = HeaderMap::new();
        headers.insert("x-requested-with", HeaderValue::from_static("TiddlyWiki"));
        assert!(gate.check_matched_routes(&state, &chain(false), &headers).is_ok());

        let mut headers = HeaderMap::new();
        headers.insert("x-requested-with", HeaderValue::from_static("tiddlywiki"));
        assert!(gate.check_matched_routes(&state, &chain(false), &headers).is_err());
    }

    #[test]
    fn opting_out_on_every_node_skips_the_check() {
        let gate = gate(MemorySessionStore::new());
        let state = gate
            .check_request(&streamer(Method::POST, None), &MethodSet::standard())
            .unwrap();
        assert!(gate.check_matched_routes(&state, &chain(true), &HeaderMap::new()).is_ok());
    }

    #[test]
    fn readers_are_never_checked() {
        let gate = gate(MemorySessionStore::new());
        let state = gate
            .check_request(&streamer(Method::GET, None), &MethodSet::standard())
            .unwrap();
        assert!(gate.check_matched_routes(&state, &chain(false), &HeaderMap::new()).is_ok());
    }
}
