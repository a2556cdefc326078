use crate::domain::phone::Msisdn;
use crate::domain::ports::SessionStoreHandle;
use crate::domain::session::Session;
use crate::error::Result;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Resume-or-create access to dialogs, with idle expiry and per-subscriber
/// serialization on top of a `SessionStore`.
pub struct SessionManager {
    store: SessionStoreHandle,
    ttl: Duration,
    locks: Mutex<HashMap<Msisdn, Arc<AsyncMutex<()>>>>,
}

impl SessionManager {
    pub fn new(store: SessionStoreHandle, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until no other callback for `phone` is being processed. The
    /// guard must be held for the whole step.
    pub async fn lock(&self, phone: &Msisdn) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(phone.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Returns the live session for `phone`, or creates one at `start`.
    ///
    /// An expired session is discarded and replaced. A record that cannot be
    /// decoded surfaces as `GatewayError::CorruptSession` so the caller can end
    /// the dialog.
    pub async fn start(&self, phone: &Msisdn, carrier_session_id: Option<String>) -> Result<Session> {
        let now = Utc::now();
        if let Some(mut session) = self.store.load(phone).await? {
            if !session.is_idle_since(now - self.ttl) {
                debug!(%phone, step = session.step.name(), "Session resumed");
                session.last_seen = now;
                if carrier_session_id.is_some() {
                    session.carrier_session_id = carrier_session_id;
                }
                return Ok(session);
            }
            info!(%phone, step = session.step.name(), "Session expired");
            self.store.delete(phone).await?;
        }

        let session = Session::new(phone.clone(), carrier_session_id, now);
        self.store.save(session.clone()).await?;
        info!(%phone, reference = %session.reference, "Session created");
        Ok(session)
    }

    pub async fn get(&self, phone: &Msisdn) -> Result<Option<Session>> {
        let cutoff = Utc::now() - self.ttl;
        Ok(self
            .store
            .load(phone)
            .await?
            .filter(|session| !session.is_idle_since(cutoff)))
    }

    /// Persists `session` only if a session for the same subscriber still
    /// exists. Never creates one.
    pub async fn update(&self, mut session: Session) -> Result<()> {
        if self.store.load(&session.phone).await?.is_none() {
            warn!(phone = %session.phone, "Update for a session that no longer exists");
            return Ok(());
        }
        session.last_seen = Utc::now();
        self.store.save(session).await
    }

    /// Idempotent.
    pub async fn end(&self, phone: &Msisdn) -> Result<()> {
        self.store.delete(phone).await?;
        debug!(%phone, "Session ended");
        Ok(())
    }

    /// Purges idle sessions and forgets locks nobody is holding or waiting on.
    pub async fn sweep(&self) -> Result<usize> {
        let purged = self.store.purge_idle(Utc::now() - self.ttl).await?;
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(purged)
    }
}

/// Runs `SessionManager::sweep` every `period` for the life of the process.
pub fn start_sweep_task(sessions: Arc<SessionManager>, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match sessions.sweep().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Expired sessions purged"),
                Err(e) => warn!(error = %e, "Session sweep failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::SessionStore;
    use crate::domain::session::Step;
    use crate::infrastructure::in_memory::InMemorySessionStore;

    fn phone(raw: &str) -> Msisdn {
        Msisdn::parse(raw).unwrap()
    }

    fn manager(store: InMemorySessionStore) -> SessionManager {
        SessionManager::new(Arc::new(store), Duration::seconds(180))
    }

    #[tokio::test]
    async fn test_start_resumes_existing_session() {
        let sessions = manager(InMemorySessionStore::new());
        let a = phone("08031234567");

        let first = sessions.start(&a, None).await.unwrap();
        assert_eq!(first.step, Step::Start);

        let mut advanced = first.clone();
        advanced.step = Step::MainMenu;
        sessions.update(advanced).await.unwrap();

        let resumed = sessions.start(&a, None).await.unwrap();
        assert_eq!(resumed.reference, first.reference);
        assert_eq!(resumed.step, Step::MainMenu);
    }

    #[tokio::test]
    async fn test_update_never_creates() {
        let store = InMemorySessionStore::new();
        let sessions = manager(store.clone());
        let ghost = Session::new(phone("08030000000"), None, Utc::now());

        sessions.update(ghost.clone()).await.unwrap();
        assert!(store.load(&ghost.phone).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_end_is_idempotent_and_restarts_fresh() {
        let sessions = manager(InMemorySessionStore::new());
        let a = phone("08031234567");
        let first = sessions.start(&a, None).await.unwrap();

        sessions.end(&a).await.unwrap();
        sessions.end(&a).await.unwrap();
        assert!(sessions.get(&a).await.unwrap().is_none());

        let second = sessions.start(&a, None).await.unwrap();
        assert_ne!(second.reference, first.reference);
        assert_eq!(second.step, Step::Start);
    }

    #[tokio::test]
    async fn test_idle_session_is_replaced() {
        let store = InMemorySessionStore::new();
        let sessions = manager(store.clone());
        let a = phone("08031234567");

        let mut stale = Session::new(a.clone(), None, Utc::now() - Duration::minutes(10));
        stale.step = Step::BankMenu;
        store.save(stale.clone()).await.unwrap();

        assert!(sessions.get(&a).await.unwrap().is_none());
        let fresh = sessions.start(&a, None).await.unwrap();
        assert_ne!(fresh.reference, stale.reference);
        assert_eq!(fresh.step, Step::Start);
    }

    #[tokio::test]
    async fn test_sweep_purges_only_idle_sessions() {
        let store = InMemorySessionStore::new();
        let sessions = manager(store.clone());
        let live = phone("08031111111");
        let idle = phone("08032222222");

        sessions.start(&live, None).await.unwrap();
        store
            .save(Session::new(idle.clone(), None, Utc::now() - Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(sessions.sweep().await.unwrap(), 1);
        assert!(store.load(&live).await.unwrap().is_some());
        assert!(store.load(&idle).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_serializes_same_subscriber() {
        let sessions = Arc::new(manager(InMemorySessionStore::new()));
        let a = phone("08031234567");

        let guard = sessions.lock(&a).await;
        let contender = {
            let sessions = sessions.clone();
            let a = a.clone();
            tokio::spawn(async move {
                let _guard = sessions.lock(&a).await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        // A different subscriber is not blocked.
        let _other = sessions.lock(&phone("08039999999")).await;

        drop(guard);
        contender.await.unwrap();
    }
}
