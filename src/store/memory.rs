use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

use super::{ChangeEvent, ChangeFeed, ChangeOp, SessionStore};
use crate::errors::StoreError;
use crate::shared_types::{SessionKey, SessionRecord};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const FEED_CAPACITY: usize = 256;

// -----------------------------------------------------------------------------
// ----- MemoryStore -----------------------------------------------------------

/// In-process session table. Every write is echoed on the change feed, the
/// same way the hosted table pushes row changes to subscribers.
#[derive(Debug)]
pub struct MemoryStore {
    rows: RwLock<HashMap<SessionKey, SessionRecord>>,
    feed: broadcast::Sender<ChangeEvent>,
}

// -----------------------------------------------------------------------------
// ----- MemoryStore: Static ---------------------------------------------------

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);

        Self {
            rows: RwLock::new(HashMap::new()),
            feed,
        }
    }

    /// Rows loaded from elsewhere; no feed events are emitted for them.
    pub fn with_records(records: impl IntoIterator<Item = SessionRecord>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.write();
            for record in records {
                rows.insert(record.key(), record);
            }
        }
        store
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// ----- MemoryStore: Public ---------------------------------------------------

impl MemoryStore {
    pub fn get(&self, organization_id: &str, session_name: &str) -> Option<SessionRecord> {
        let key = SessionKey::new(organization_id, session_name);
        self.rows.read().get(&key).cloned()
    }

    pub fn all(&self) -> Vec<SessionRecord> {
        let mut records: Vec<_> = self.rows.read().values().cloned().collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        records
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Re-broadcast an event as if the table had pushed it again.
    pub fn replay(&self, event: ChangeEvent) {
        let _ = self.feed.send(event);
    }
}

// -----------------------------------------------------------------------------
// ----- MemoryStore: Internal -------------------------------------------------

impl MemoryStore {
    pub(crate) fn put(&self, record: &SessionRecord) {
        let previous = self.rows.write().insert(record.key(), record.clone());
        let op = match previous {
            Some(_) => ChangeOp::Update,
            None => ChangeOp::Insert,
        };

        // No subscribers is fine; the row is still stored.
        let _ = self.feed.send(ChangeEvent {
            op,
            record: record.clone(),
        });
    }

    pub(crate) fn take(&self, organization_id: &str, session_name: &str) -> Option<SessionRecord> {
        let key = SessionKey::new(organization_id, session_name);
        let removed = self.rows.write().remove(&key)?;

        let _ = self.feed.send(ChangeEvent {
            op: ChangeOp::Delete,
            record: removed.clone(),
        });

        Some(removed)
    }

    pub(crate) fn listing(&self, organization_id: &str) -> Vec<SessionRecord> {
        let mut records: Vec<_> = self
            .rows
            .read()
            .values()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.session_name.cmp(&b.session_name));
        records
    }

    pub(crate) fn feed(&self, organization_id: &str) -> ChangeFeed {
        ChangeFeed::new(organization_id, self.feed.subscribe())
    }
}

// -----------------------------------------------------------------------------
// ----- MemoryStore: SessionStore ---------------------------------------------

#[async_trait]
impl SessionStore for MemoryStore {
    async fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.put(record);
        Ok(())
    }

    async fn delete(&self, organization_id: &str, session_name: &str) -> Result<(), StoreError> {
        self.take(organization_id, session_name);
        Ok(())
    }

    async fn list(&self, organization_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self.listing(organization_id))
    }

    fn subscribe(&self, organization_id: &str) -> ChangeFeed {
        self.feed(organization_id)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
