use crate::registry::TableRegistry;
use crate::suggest::{OperationKind, Suggestion};
use crate::table::Table;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "session";

const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// Everything one browser session works with
///
/// Handlers receive the session explicitly; nothing is shared between
/// sessions.
#[derive(Debug)]
pub struct Session {
    pub registry: TableRegistry,
    /// Latest suggestion per operation kind
    pub suggestions: HashMap<OperationKind, Suggestion>,
    /// Table produced by the last operation, offered for download
    pub last_result: Option<Table>,
}

impl Session {
    fn new() -> Self {
        Session {
            registry: TableRegistry::new(),
            suggestions: HashMap::new(),
            last_result: None,
        }
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

// Expiry lives beside the handle so checking it never waits on a busy session
struct SessionEntry {
    expires_at: SystemTime,
    handle: SessionHandle,
}

impl SessionEntry {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }
}

/// Lock a session. A panic in another handler must not lock the user out,
/// so a poisoned lock is taken over as is.
pub fn lock(handle: &SessionHandle) -> MutexGuard<'_, Session> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

/// Live sessions keyed by the id stored in the session cookie
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    lifetime: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_lifetime(Duration::from_secs(SESSION_DURATION))
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lifetime(lifetime: Duration) -> Self {
        SessionStore {
            sessions: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    /// Create a session
    ///
    /// # Returns
    /// * `(String, SessionHandle)` - A new unique session id and its session
    pub fn create(&self) -> (String, SessionHandle) {
        let session_id = Uuid::new_v4().to_string();
        let handle = Arc::new(Mutex::new(Session::new()));
        let entry = SessionEntry {
            expires_at: SystemTime::now() + self.lifetime,
            handle: handle.clone(),
        };

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session_id.clone(), entry);
        log::debug!("created session {}", session_id);

        (session_id, handle)
    }

    /// Look up a live session. Expired sessions are dropped on access.
    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        let expired = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            let entry = sessions.get(session_id)?;
            if !entry.is_expired(SystemTime::now()) {
                return Some(entry.handle.clone());
            }
            true
        };
        if expired {
            self.sessions
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(session_id);
        }
        None
    }

    /// The session for `session_id`, or a fresh one. The flag tells whether
    /// a new id has to be handed to the client.
    pub fn get_or_create(&self, session_id: Option<&str>) -> (String, SessionHandle, bool) {
        self.purge_expired();
        if let Some(id) = session_id {
            if let Some(handle) = self.get(id) {
                return (id.to_string(), handle, false);
            }
        }
        let (id, handle) = self.create();
        (id, handle, true)
    }

    /// Drop every expired session; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        let now = SystemTime::now();
        sessions.retain(|_, entry| !entry.is_expired(now));
        let removed = before - sessions.len();
        if removed > 0 {
            log::info!("purged {} expired session(s)", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new();
        let (a, handle_a) = store.create();
        let (b, _) = store.create();
        assert_ne!(a, b);

        lock(&handle_a)
            .registry
            .insert("a.xlsx", Table::new(vec!["ID".into()]));
        let handle_b = store.get(&b).unwrap();
        assert!(lock(&handle_b).registry.is_empty());
        assert_eq!(lock(&store.get(&a).unwrap()).registry.len(), 1);
    }

    #[test]
    fn unknown_or_expired_ids_get_a_new_session() {
        let store = SessionStore::with_lifetime(Duration::ZERO);
        let (id, _) = store.create();
        assert!(store.get(&id).is_none());
        assert!(store.is_empty());

        let store = SessionStore::new();
        let (id, _, created) = store.get_or_create(Some("not-a-session"));
        assert!(created);
        let (same, _, created) = store.get_or_create(Some(&id));
        assert!(!created);
        assert_eq!(same, id);
    }

    #[test]
    fn busy_session_does_not_block_others() {
        let store = Arc::new(SessionStore::new());
        let (a, handle_a) = store.create();
        let (b, _) = store.create();
        let _busy = lock(&handle_a);

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&store);
        thread::spawn(move || {
            worker.purge_expired();
            let (id, _, created) = worker.get_or_create(Some(&b));
            tx.send((id == b, created)).ok();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok((true, false)));
        assert!(store.get(&a).is_some());
    }

    #[test]
    fn purge_removes_only_expired_sessions() {
        let store = SessionStore::with_lifetime(Duration::ZERO);
        store.create();
        store.create();
        assert_eq!(store.purge_expired(), 2);
        assert_eq!(SessionStore::new().purge_expired(), 0);
    }
}
