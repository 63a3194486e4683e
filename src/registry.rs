use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::session::Session;

/// Live sessions keyed by id. Cloning yields another handle onto the same map.
///
/// The map is sharded, so serve loops registering and removing their own sessions do not
/// contend with each other.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session, replacing any entry with the same id.
    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id(), session);
    }

    /// Closes the session's transport and forgets it. Unknown ids are ignored.
    pub fn remove(&self, id: &Uuid) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.close();
        }
    }

    /// Closes every registered session and empties the map. Every entry swept here is closed
    /// before this returns; sessions inserted while the sweep runs may be missed.
    pub fn close_all(&self) {
        let mut closed = 0;
        self.sessions.retain(|_, session| {
            session.close();
            closed += 1;
            false
        });
        debug!("Closed {} sessions", closed);
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
