use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::persistence::SessionPersistence;
use super::record::SessionRecord;

/// Current session record plus its persistence backend.
///
/// Readers either take snapshots or subscribe to changes; every write goes
/// through `update`/`update_if`, which persists before notifying.
pub struct SessionStore {
    state: watch::Sender<SessionRecord>,
    persistence: Arc<dyn SessionPersistence>,
}

impl SessionStore {
    /// Hydrate from `persistence`, starting empty when nothing usable is stored.
    pub fn open(persistence: Arc<dyn SessionPersistence>) -> Self {
        let record = match persistence.load() {
            Ok(Some(record)) => {
                debug!(authenticated = record.is_authenticated, "Session record loaded");
                record
            }
            Ok(None) => {
                debug!("No persisted session record");
                SessionRecord::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session, starting empty");
                SessionRecord::default()
            }
        };

        let (state, _) = watch::channel(record);
        Self { state, persistence }
    }

    pub fn snapshot(&self) -> SessionRecord {
        self.state.borrow().clone()
    }

    /// Read without cloning the whole record.
    pub fn read<R>(&self, f: impl FnOnce(&SessionRecord) -> R) -> R {
        f(&self.state.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionRecord> {
        self.state.subscribe()
    }

    /// Apply a mutation, persist it, and notify subscribers.
    pub fn update(&self, f: impl FnOnce(&mut SessionRecord)) {
        self.update_if(|record| {
            f(record);
            true
        });
    }

    /// Apply a mutation that may decline to change anything.
    ///
    /// `f` returns whether it modified the record; only then is the record
    /// persisted and subscribers notified. Returns the same flag.
    pub fn update_if(&self, f: impl FnOnce(&mut SessionRecord) -> bool) -> bool {
        let persistence = &self.persistence;
        self.state.send_if_modified(|record| {
            if !f(record) {
                return false;
            }
            if let Err(e) = persistence.save(record) {
                warn!(error = %e, "Failed to persist session record");
            }
            true
        })
    }

    /// Drop everything, including the stored document.
    pub fn wipe(&self) {
        let persistence = &self.persistence;
        self.state.send_modify(|record| {
            record.reset();
            if let Err(e) = persistence.clear() {
                warn!(error = %e, "Failed to clear persisted session");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::persistence::MemorySessionPersistence;

    #[test]
    fn test_open_starts_empty_on_corrupt_document() {
        let persistence = Arc::new(MemorySessionPersistence::with_document("{{{"));
        let store = SessionStore::open(persistence);
        assert_eq!(store.snapshot(), SessionRecord::default());
    }

    #[test]
    fn test_update_persists_and_notifies() {
        let persistence = Arc::new(MemorySessionPersistence::new());
        let store = SessionStore::open(persistence.clone());
        let mut rx = store.subscribe();

        store.update(|r| r.pending_verification_email = Some("ada@example.com".into()));

        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().pending_verification_email.as_deref(),
            Some("ada@example.com")
        );
        assert!(persistence.document().unwrap().contains("ada@example.com"));

        // Reopening hydrates the same record
        let reopened = SessionStore::open(persistence);
        assert_eq!(reopened.snapshot(), store.snapshot());
    }

    #[test]
    fn test_update_if_declined_is_silent() {
        let persistence = Arc::new(MemorySessionPersistence::new());
        let store = SessionStore::open(persistence.clone());
        let rx = store.subscribe();

        assert!(!store.update_if(|_| false));
        assert!(!rx.has_changed().unwrap());
        assert!(persistence.document().is_none());
    }

    #[test]
    fn test_wipe_clears_document() {
        let persistence = Arc::new(MemorySessionPersistence::new());
        let store = SessionStore::open(persistence.clone());
        store.update(|r| r.has_passcode = true);
        assert!(persistence.document().is_some());

        store.wipe();
        assert!(!store.read(|r| r.has_passcode));
        assert!(persistence.document().is_none());
    }
}
