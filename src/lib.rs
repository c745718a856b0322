//! Request-handling core of a small multi-wiki web server.
//!
//! HTTP/1.1 and HTTP/2 requests are normalized into one [`http::Streamer`],
//! checked by the auth gate, matched against a tree of regex routes and run
//! through the matched handler chain.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routes;
pub mod routing;
pub mod security;

pub use config::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::{RequestContext, RouteDef, RouteTree, Router};
