//! Connection registry.
//!
//! Bookkeeping for sessions that reached play and for the backend groups,
//! keyed by domain. One lock guards both; it is never held across I/O.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::selector::{normalize_domain, BackendGroup};
use crate::error::SelectError;
use crate::session::SessionId;

/// A session in the play state.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub id: SessionId,
    pub username: String,
    pub uuid: Uuid,
    pub domain: String,
    pub peer: SocketAddr,
    pub since: SystemTime,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, ActiveSession>,
    groups: HashMap<String, Arc<BackendGroup>>,
}

/// Shared, process-wide registry. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns false if the id was already present.
    pub async fn add_session(&self, session: ActiveSession) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(&session.id) {
            return false;
        }
        inner.sessions.insert(session.id, session);
        true
    }

    /// Unregister a session. Removing an absent id is a no-op.
    pub async fn remove_session(&self, id: SessionId) -> Option<ActiveSession> {
        self.inner.lock().await.sessions.remove(&id)
    }

    /// Number of sessions in play.
    pub async fn count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    /// Add a backend group under each of its domains.
    ///
    /// Domains already claimed by an earlier group stay with that group; they
    /// are returned so the caller can report them.
    pub async fn add_backend_group(&self, group: BackendGroup) -> Vec<String> {
        let group = Arc::new(group);
        let mut inner = self.inner.lock().await;
        let mut shadowed = Vec::new();
        for domain in group.domains() {
            if inner.groups.contains_key(domain) {
                shadowed.push(domain.clone());
                continue;
            }
            inner.groups.insert(domain.clone(), Arc::clone(&group));
        }
        debug!(
            domains = ?group.domains(),
            targets = group.targets().len(),
            algorithm = ?group.algorithm(),
            "Backend group added"
        );
        shadowed
    }

    /// Find the group serving `domain` (case-insensitive exact match).
    pub async fn resolve_group(&self, domain: &str) -> Result<Arc<BackendGroup>, SelectError> {
        let key = normalize_domain(domain);
        self.inner
            .lock()
            .await
            .groups
            .get(&key)
            .cloned()
            .ok_or(SelectError::NotFound(key))
    }
}
