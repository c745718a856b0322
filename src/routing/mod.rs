//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     RouteDef (nested builder)
//!     → tree.rs (validate methods, anchors, body formats)
//!     → Freeze as RouteTree of Arc<RouteNode>
//!
//! Incoming Request (method, path):
//!     → router.rs (auth gate, prefix strip)
//!     → matcher.rs (depth-first walk, first matching child wins)
//!     → body.rs (materialize the body in the chain's format)
//!     → context.rs (RequestContext handed to each handler, root first)
//! ```
//!
//! # Design Decisions
//! - Routes validated at startup, immutable at runtime
//! - Anchored regex patterns applied to the unmatched path suffix
//! - Deterministic: same input always yields the same chain

pub mod body;
pub mod context;
pub mod matcher;
pub mod router;
pub mod tree;

pub use body::{BodyData, BodyFormat, FormData};
pub use context::RequestContext;
pub use matcher::{match_route, RouteMatch};
pub use router::{DispatchError, DispatchOutcome, Router, RouterOptions};
pub use tree::{handler, Handler, HandlerResult, MethodSet, RouteAcl, RouteDef, RouteError, RouteNode, RouteTree};
