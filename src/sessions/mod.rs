// Sessions module
// Session records, idle expiry and per-session mutual exclusion


pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::memory::ConversationMemory;
use crate::{ChatError, Result};

pub use sqlite::SqliteSessionStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub memory: ConversationMemory,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    #[inline]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            memory: ConversationMemory::default(),
            created_at: now,
            last_active: now,
        }
    }

    #[inline]
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    #[inline]
    pub fn is_expired(&self, idle_timeout: Duration, now: DateTime<Utc>) -> bool {
        let timeout = TimeDelta::from_std(idle_timeout).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.last_active) > timeout
    }
}

impl Default for Session {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Persistence backend for sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Session>>;

    /// Insert or replace a session
    async fn save(&self, session: &Session) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Remove sessions idle since before `cutoff`, returning how many went
    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Process-local session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn purge_idle(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.last_active >= cutoff);
        Ok(before - sessions.len())
    }
}

/// Exclusive access to one session for the duration of a request
#[derive(Debug)]
pub struct SessionLease {
    pub session: Session,
    is_new: bool,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    /// Whether the session was created for this request
    #[inline]
    pub const fn is_new(&self) -> bool {
        self.is_new
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.session.id
    }
}

/// Hands out session leases, enforcing idle expiry and one in-flight
/// request per session
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    idle_timeout: Duration,
    retention: Duration,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    /// Sessions idle past `idle_timeout` are reported as expired. Their
    /// records are kept until `retention` (at least the idle timeout) so a
    /// returning client still sees the expiry instead of a silent new
    /// session.
    #[inline]
    pub fn new(store: Arc<dyn SessionStore>, idle_timeout: Duration, retention: Duration) -> Self {
        Self {
            store,
            idle_timeout,
            retention: retention.max(idle_timeout),
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub const fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Lease the session named by `session_id`, or a fresh one when there is
    /// no id or the store does not know it.
    ///
    /// Fails with `SessionBusy` if another request holds the session and
    /// with `SessionExpired` if it has been idle too long. An expired
    /// session is deleted, so the following request starts fresh.
    #[inline]
    pub async fn acquire(&self, session_id: Option<&str>) -> Result<SessionLease> {
        let Some(id) = session_id.filter(|id| !id.trim().is_empty()) else {
            return self.fresh();
        };

        let guard = self.try_lock(id)?;

        match self.store.load(id).await? {
            Some(session) if session.is_expired(self.idle_timeout, Utc::now()) => {
                info!("Session {} expired after inactivity", id);
                self.store.delete(id).await?;
                drop(guard);
                self.forget_lock(id);
                Err(ChatError::SessionExpired)
            }
            Some(session) => {
                debug!("Resuming session {}", id);
                Ok(SessionLease {
                    session,
                    is_new: false,
                    _guard: guard,
                })
            }
            None => {
                debug!("Unknown session {}, starting a new one", id);
                drop(guard);
                self.forget_lock(id);
                self.fresh()
            }
        }
    }

    #[inline]
    pub async fn save(&self, session: &Session) -> Result<()> {
        self.store.save(session).await
    }

    /// Clear history and summary of the caller's session, creating one if
    /// the caller has none or theirs expired
    #[inline]
    pub async fn reset(&self, session_id: Option<&str>) -> Result<SessionLease> {
        let mut lease = match self.acquire(session_id).await {
            Err(ChatError::SessionExpired) => self.fresh()?,
            other => other?,
        };

        lease.session.memory.clear();
        lease.session.touch();
        self.store.save(&lease.session).await?;

        info!("Reset chat history for session {}", lease.id());
        Ok(lease)
    }

    #[inline]
    pub const fn retention(&self) -> Duration {
        self.retention
    }

    /// Drop sessions that have been idle longer than the retention period
    #[inline]
    pub async fn purge_expired(&self) -> Result<usize> {
        let timeout = TimeDelta::from_std(self.retention).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let purged = self.store.purge_idle(cutoff).await?;
        if purged > 0 {
            info!("Purged {} expired sessions", purged);
        }

        self.locks_map()
            .retain(|_, lock| Arc::strong_count(lock) > 1);

        Ok(purged)
    }

    fn fresh(&self) -> Result<SessionLease> {
        let session = Session::new();
        let guard = self.try_lock(&session.id)?;
        debug!("Created session {}", session.id);

        Ok(SessionLease {
            session,
            is_new: true,
            _guard: guard,
        })
    }

    fn try_lock(&self, id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks_map();
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        lock.try_lock_owned().map_err(|_| ChatError::SessionBusy)
    }

    fn forget_lock(&self, id: &str) {
        let mut locks = self.locks_map();
        if locks
            .get(id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(id);
        }
    }

    fn locks_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
