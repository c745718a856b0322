//! Session table shared by the auth gate and the auth routes.

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// The principal a request acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Session table behind the `session` cookie. The gate reads it; the
/// auth routes open sessions in it.
pub trait SessionStore: Send + Sync {
    fn identity(&self, session_id: &str) -> Option<Identity>;

    /// Open a session for `identity` and return its id.
    fn create(&self, identity: Identity) -> String;

    fn revoke(&self, session_id: &str) -> bool;
}

/// In-process session table, shared by the auth routes (which create
/// sessions) and the gate (which reads them).
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<String, Identity>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn identity(&self, session_id: &str) -> Option<Identity> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    fn create(&self, identity: Identity) -> String {
        let session_id = Uuid::new_v4().simple().to_string();
        tracing::debug!(username = %identity.username, "Session created");
        self.sessions.insert(session_id.clone(), identity);
        session_id
    }

    fn revoke(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }
}
