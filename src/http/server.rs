//! HTTP server: accept loop and per-request plumbing.
//!
//! # Responsibilities
//! - Serve HTTP/1.1 and HTTP/2 (prior knowledge) on one listener
//! - Wrap each request in a `Streamer` and run the router in its own task
//! - Answer 400 for requests that cannot be normalized and 500 when a request
//!   task ends without responding
//! - Stop accepting on shutdown and drain open connections
//!
//! # Design Decisions
//! - The protocol is sniffed per connection by hyper-util's auto builder
//! - The hyper service only waits on a oneshot; the router task owns the
//!   exchange, so streaming responses keep running after headers go out

use crate::http::streamer::Streamer;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionGuard, ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::routing::router::Router;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct HttpServer {
    router: Arc<Router>,
    tracker: ConnectionTracker,
    shutdown_grace: Duration,
}

impl HttpServer {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            tracker: ConnectionTracker::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// How long shutdown waits for open connections.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.wait() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
            };

            let guard = self.tracker.track();
            tokio::spawn(serve_connection(
                stream,
                peer,
                Arc::clone(&self.router),
                guard,
                permit,
                shutdown.clone(),
            ));
        }

        tracing::info!(active = self.tracker.active_count(), "Draining connections");
        if !self.tracker.wait_for_drain(self.shutdown_grace).await {
            tracing::warn!(
                active = self.tracker.active_count(),
                "Shutdown grace period elapsed with connections open"
            );
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<Router>,
    guard: ConnectionGuard,
    _permit: ConnectionPermit,
    shutdown: Shutdown,
) {
    let service = service_fn(move |request: Request<Incoming>| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(respond(router, request).await) }
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.wait() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };
    if let Err(e) = result {
        tracing::debug!(connection_id = %guard.id(), peer = %peer, error = %e, "Connection ended with error");
    }
}

async fn respond(router: Arc<Router>, request: Request<Incoming>) -> Response<Body> {
    let (tx, rx) = oneshot::channel();
    let streamer = match Streamer::new(request.map(Body::new), tx) {
        Ok(streamer) => streamer,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected request before routing");
            return plain(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    tokio::spawn(async move { router.handle(streamer).await });

    match rx.await {
        Ok(response) => response,
        Err(_) => plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
    }
}

fn plain(status: StatusCode, body: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
