//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (HTTP/1.1 or HTTP/2 per connection, one task per request)
//!     → streamer.rs (protocol-agnostic exchange)
//!     → [routing layer dispatches to handlers]
//!     → response.rs / sse.rs / multipart.rs (helpers used by handlers)
//!     → Send to client
//! ```

pub mod multipart;
pub mod response;
pub mod server;
pub mod sse;
pub mod streamer;

pub use server::HttpServer;
pub use streamer::{BodyReader, Protocol, ResponseSlot, Streamer, StreamerError};
