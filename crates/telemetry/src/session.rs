//! Session identity with a sliding inactivity window.
//!
//! A session is a continuous window of user activity. The manager owns
//! a persisted session id plus the last-activity timestamp; a gap
//! longer than the inactivity window (30 minutes) starts a new session
//! and regenerates the id. Every touch refreshes the stored timestamp,
//! so the window slides rather than expiring on a fixed interval.

use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::clock::Clock;
use crate::event::SessionContext;

/// Inactivity gap after which a new session begins.
pub const SESSION_TIMEOUT_MS: u64 = 30 * 60 * 1000;

/// Persisted session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub last_activity_ms: u64,
}

/// Storage for session state, persisted across page loads by the host.
pub trait SessionStore: Send + Sync {
    /// Load the stored record, if any.
    fn load(&self) -> Option<SessionRecord>;

    /// Persist the record.
    fn store(&self, record: &SessionRecord);
}

/// In-memory session store; state lives for the process lifetime.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<Option<SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Option<SessionRecord> {
        self.record.lock().expect("session store poisoned").clone()
    }

    fn store(&self, record: &SessionRecord) {
        *self.record.lock().expect("session store poisoned") = Some(record.clone());
    }
}

/// Owns the durable session identifier and the is-new-session flag.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    timeout_ms: u64,
}

impl SessionManager {
    /// Create a manager over the given store and clock.
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            timeout_ms: SESSION_TIMEOUT_MS,
        }
    }

    /// Override the inactivity window (tests and special hosts).
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Resolve the current session, creating or rotating it as needed.
    ///
    /// Refreshes the stored last-activity timestamp as a side effect,
    /// which is what makes the window slide.
    pub fn touch(&self) -> SessionContext {
        let now = self.clock.now_ms();
        let (session_id, is_new) = match self.store.load() {
            Some(record) if now.saturating_sub(record.last_activity_ms) <= self.timeout_ms => {
                (record.session_id, false)
            }
            Some(_) | None => (generate_session_id(now), true),
        };

        self.store.store(&SessionRecord {
            session_id: session_id.clone(),
            last_activity_ms: now,
        });

        SessionContext {
            session_id,
            is_new_session: is_new,
        }
    }

    /// The current session id, creating one if needed.
    pub fn session_id(&self) -> String {
        self.touch().session_id
    }
}

/// Session id format: prefix, millisecond timestamp, short random
/// suffix. Practically unique without a central allocator.
fn generate_session_id(now_ms: u64) -> String {
    let suffix: String = Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("sess_{now_ms}_{suffix}")
}
