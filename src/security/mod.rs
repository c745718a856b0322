//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cookies.rs (parse Cookie header)
//!     → sessions.rs (resolve session cookie to identity)
//!     → auth.rs (access level, trusted-client header check)
//!     → Pass to handlers
//! ```
//!
//! # Design Decisions
//! - Fail closed: malformed cookies are rejected, not ignored
//! - Session storage sits behind a trait so routes and tests inject their own

pub mod auth;
pub mod cookies;
pub mod sessions;

pub use auth::{AuthGate, AuthLevel, AuthState, Rejection};
pub use sessions::{Identity, MemorySessionStore, SessionStore};
