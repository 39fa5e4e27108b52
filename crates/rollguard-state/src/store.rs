//! ArchiveStore — redb-backed, append-only audit storage.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use rollguard_core::{RollbackEvent, SessionSnapshot};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe archive of terminal sessions and rollback events.
#[derive(Clone)]
pub struct ArchiveStore {
    db: Arc<Database>,
}

impl ArchiveStore {
    /// Open (or create) a persistent archive at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "archive opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory archive (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory archive opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        txn.open_table(ROLLBACKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Archive a finished session. Each id can be archived once.
    pub fn archive_session(&self, snapshot: &SessionSnapshot) -> StateResult<()> {
        let key = snapshot.id.as_str();
        let value = serde_json::to_vec(snapshot).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            if table.get(key).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyArchived(key.to_string()));
            }
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(session = %key, status = ?snapshot.status, "session archived");
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> StateResult<Option<SessionSnapshot>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        match table.get(session_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let snapshot: SessionSnapshot =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// All archived sessions, ordered by start time.
    pub fn list_sessions(&self) -> StateResult<Vec<SessionSnapshot>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let snapshot: SessionSnapshot =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(snapshot);
        }
        results.sort_by_key(|s| s.started_at);
        Ok(results)
    }

    // ── Rollbacks ──────────────────────────────────────────────────

    /// Append a rollback event to the journal. Returns its sequence number
    /// within the session.
    pub fn record_rollback(&self, event: &RollbackEvent) -> StateResult<u64> {
        let prefix = format!("{}:", event.session_id);
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut table = txn.open_table(ROLLBACKS).map_err(map_err!(Table))?;
            let mut existing = 0u64;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if key.value().starts_with(&prefix) {
                    existing += 1;
                }
            }
            seq = existing;
            let key = format!("{prefix}{seq:06}");
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(session = %event.session_id, seq, outcome = ?event.outcome, "rollback journaled");
        Ok(seq)
    }

    /// Rollback events of one session, oldest first.
    pub fn list_rollbacks(&self, session_id: &str) -> StateResult<Vec<RollbackEvent>> {
        let prefix = format!("{session_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLBACKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let event: RollbackEvent =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(event);
            }
        }
        Ok(results)
    }
}
