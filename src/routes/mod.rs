//! Application route tree.
//!
//! ```text
//! ^                       GET HEAD OPTIONS POST PUT DELETE
//! └── ^/auth              GET HEAD POST PUT
//!     ├── ^/register      GET HEAD   register page
//!     ├── ^/register/1    POST       registration step one
//!     ├── ^/register/2    POST       registration step two
//!     ├── ^/login         GET HEAD   login page
//!     ├── ^/login/1       POST       login step one
//!     └── ^/login/2       POST       login step two, opens a session
//! ```

pub mod auth;

use crate::routing::tree::{MethodSet, RouteDef};

pub use auth::{AuthRoutes, AuthStore, LoginStart, PasswordProtocol, ProtocolError, UnavailableProtocol};

/// The root route. It accepts every recognized method; its children narrow
/// the set.
pub fn root_route(auth: AuthRoutes) -> RouteDef {
    RouteDef::new("^")
        .methods(MethodSet::standard())
        .child(auth.route())
}
