//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a validated configuration into a ready `Router`
//! - Provision configured users
//! - Validate the route tree before any traffic arrives
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The password protocol is injected so tests and deployments pick their own

use crate::config::ServerConfig;
use crate::routes::{root_route, AuthRoutes, AuthStore, PasswordProtocol};
use crate::routing::router::{Router, RouterOptions};
use crate::routing::tree::{RouteError, RouteTree};
use crate::security::sessions::{MemorySessionStore, SessionStore};
use axum::http::header::InvalidHeaderName;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid trusted client header: {0}")]
    TrustedHeader(#[from] InvalidHeaderName),

    #[error("invalid route tree: {0}")]
    Routes(#[from] RouteError),
}

/// Everything a running server shares across requests.
pub struct Application {
    pub router: Arc<Router>,
    pub auth_store: Arc<AuthStore>,
    pub sessions: MemorySessionStore,
}

/// Build the router for `config`, serving auth through `protocol`.
pub fn build_application(
    config: &ServerConfig,
    protocol: Arc<dyn PasswordProtocol>,
) -> Result<Application, StartupError> {
    let options = RouterOptions::from_config(config)?;

    let auth_store = Arc::new(AuthStore::new());
    for username in &config.auth.users {
        let id = auth_store.provision_user(username);
        tracing::debug!(username = %username, user_id = %id, "User provisioned");
    }
    let sessions = MemorySessionStore::new();
    let session_store: Arc<dyn SessionStore> = Arc::new(sessions.clone());

    let tree = RouteTree::build(root_route(AuthRoutes {
        store: Arc::clone(&auth_store),
        protocol,
        sessions: Arc::clone(&session_store),
    }))?;

    tracing::info!(
        server_name = %options.server_name,
        path_prefix = %options.path_prefix,
        users = config.auth.users.len(),
        "Route tree ready"
    );

    let router = Router::new(tree, options, session_store);
    Ok(Application {
        router: Arc::new(router),
        auth_store,
        sessions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::UnavailableProtocol;

    #[test]
    fn default_config_builds() {
        let mut config = ServerConfig::default();
        config.auth.users = vec!["alice".into()];
        let app = build_application(&config, Arc::new(UnavailableProtocol)).unwrap();
        assert!(app.auth_store.user_identifier("alice").is_some());
        assert!(app.sessions.is_empty());
    }

    #[test]
    fn bad_header_name_fails() {
        let mut config = ServerConfig::default();
        config.router.trusted_client_header = "not a header".into();
        assert!(matches!(
            build_application(&config, Arc::new(UnavailableProtocol)),
            Err(StartupError::TrustedHeader(_))
        ));
    }
}
