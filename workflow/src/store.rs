//! Session storage.
//!
//! A store maps a session id to its [`SessionRecord`]. Writes replace the
//! whole record, so each key is updated atomically; distinct keys never
//! interfere with each other.

use crate::layout::StoreLayout;
use crate::state::SessionRecord;
use anyhow::Context;
use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;
use std::sync::PoisonError;

pub trait StateStore: Send + Sync {
    fn get(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>>;

    fn put(&self, record: &SessionRecord) -> anyhow::Result<()>;

    /// Returns whether a record was removed.
    fn delete(&self, session_id: &str) -> anyhow::Result<bool>;
}

/// Volatile store; sessions last as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for InMemoryStore {
    fn get(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(session_id).cloned())
    }

    fn put(&self, record: &SessionRecord) -> anyhow::Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, session_id: &str) -> anyhow::Result<bool> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.remove(session_id).is_some())
    }
}

/// One JSON file per session under the layout root. Survives restarts.
#[derive(Debug, Clone)]
pub struct FileStore {
    layout: StoreLayout,
}

impl FileStore {
    pub fn open(layout: StoreLayout) -> anyhow::Result<Self> {
        layout.ensure_root()?;
        Ok(Self { layout })
    }
}

impl StateStore for FileStore {
    fn get(&self, session_id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let path = self.layout.session_file(session_id);
        if !path.exists() {
            return Ok(None);
        }
        SessionRecord::load(&path).map(Some)
    }

    fn put(&self, record: &SessionRecord) -> anyhow::Result<()> {
        record.save(&self.layout.session_file(&record.session_id))
    }

    fn delete(&self, session_id: &str) -> anyhow::Result<bool> {
        let path = self.layout.session_file(session_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Stage;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn exercise(store: &dyn StateStore) {
        assert_eq!(store.get("s1").expect("get"), None);

        let mut first = SessionRecord::new("s1", "first brief");
        let second = SessionRecord::new("s2", "second brief");
        store.put(&first).expect("put s1");
        store.put(&second).expect("put s2");

        first.cursor = Stage::HumanCheckpoint;
        first.state.revision_count = 2;
        store.put(&first).expect("overwrite s1");

        assert_eq!(store.get("s1").expect("get s1"), Some(first));
        assert_eq!(store.get("s2").expect("get s2"), Some(second));

        assert!(store.delete("s1").expect("delete"));
        assert!(!store.delete("s1").expect("delete again"));
        assert_eq!(store.get("s1").expect("get deleted"), None);
        assert!(store.get("s2").expect("get s2").is_some());
    }

    #[test]
    fn in_memory_store_keeps_sessions_apart() {
        let store = InMemoryStore::new();
        exercise(&store);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn file_store_keeps_sessions_apart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(StoreLayout::new(dir.path().join("sessions"))).expect("open");
        exercise(&store);
    }

    #[test]
    fn file_store_reopens_existing_sessions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root: PathBuf = dir.path().join("sessions");
        let record = SessionRecord::new("chat/7", "brief");
        FileStore::open(StoreLayout::new(root.clone()))
            .expect("open")
            .put(&record)
            .expect("put");

        let reopened = FileStore::open(StoreLayout::new(root)).expect("reopen");
        assert_eq!(reopened.get("chat/7").expect("get"), Some(record));
    }
}
