//! Shared utilities for integration tests.

#![allow(dead_code)]

use mws_server::config::ServerConfig;
use mws_server::http::HttpServer;
use mws_server::lifecycle::{build_application, Application, Shutdown};
use mws_server::net::Listener;
use mws_server::routes::{LoginStart, PasswordProtocol, ProtocolError};
use mws_server::routing::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const TRUSTED_HEADER: &str = "x-requested-with";
pub const TRUSTED_VALUE: &str = "TiddlyWiki";

/// A server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Defaults plus the repository's `public/` pages and the given users.
pub fn test_config(users: &[&str]) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.static_files.root = concat!(env!("CARGO_MANIFEST_DIR"), "/public").to_string();
    config.auth.users = users.iter().map(|u| u.to_string()).collect();
    config
}

/// Build the application from `config` and serve it.
pub async fn start_app(config: ServerConfig, protocol: Arc<dyn PasswordProtocol>) -> (TestServer, Application) {
    let app = build_application(&config, protocol).unwrap();
    let server = start_router(Arc::clone(&app.router)).await;
    (server, app)
}

/// Serve an arbitrary router.
pub async fn start_router(router: Arc<Router>) -> TestServer {
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), 64).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(router).with_shutdown_grace(Duration::from_secs(1));
    let run_shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        server.run(listener, run_shutdown).await.unwrap();
    });
    TestServer { addr, shutdown, handle }
}

pub fn http1_client() -> reqwest::Client {
    reqwest::Client::builder().http1_only().build().unwrap()
}

pub fn http2_client() -> reqwest::Client {
    reqwest::Client::builder().http2_prior_knowledge().build().unwrap()
}

/// Deterministic stand-in for a real password protocol: messages are
/// tagged strings, and a login finishes only with the request `proof`.
pub struct ScriptedProtocol;

impl PasswordProtocol for ScriptedProtocol {
    fn registration_response(&self, user_identifier: &str, request: &str) -> Result<String, ProtocolError> {
        Ok(format!("registration-response:{user_identifier}:{request}"))
    }

    fn start_login(
        &self,
        user_identifier: &str,
        registration_record: &str,
        request: &str,
    ) -> Result<LoginStart, ProtocolError> {
        Ok(LoginStart {
            server_login_state: format!("state:{user_identifier}:{registration_record}"),
            login_response: format!("login-response:{request}"),
        })
    }

    fn finish_login(&self, server_login_state: &str, request: &str) -> Result<String, ProtocolError> {
        if request == "proof" {
            Ok(format!("session-key:{server_login_state}"))
        } else {
            Err(ProtocolError::Rejected("bad proof".into()))
        }
    }
}
