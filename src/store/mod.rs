pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::errors::StoreError;
use crate::shared_types::SessionRecord;

// -----------------------------------------------------------------------------
// ----- SessionStore ----------------------------------------------------------

/// Authoritative persisted table of sessions plus its change feed.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError>;

    async fn delete(&self, organization_id: &str, session_name: &str) -> Result<(), StoreError>;

    async fn list(&self, organization_id: &str) -> Result<Vec<SessionRecord>, StoreError>;

    /// Ordered, possibly duplicated stream of changes for one tenant.
    fn subscribe(&self, organization_id: &str) -> ChangeFeed;
}

// -----------------------------------------------------------------------------
// ----- ChangeEvent -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub record: SessionRecord,
}

// -----------------------------------------------------------------------------
// ----- ChangeFeed ------------------------------------------------------------

/// Receiving end of a store's change feed, filtered to one organization.
#[derive(Debug)]
pub struct ChangeFeed {
    organization_id: String,
    rx: broadcast::Receiver<ChangeEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedError {
    /// The receiver fell behind and `skipped` events were dropped.
    Lagged { skipped: u64 },
    Closed,
}

impl ChangeFeed {
    pub fn new(organization_id: impl Into<String>, rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self {
            organization_id: organization_id.into(),
            rx,
        }
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub async fn recv(&mut self) -> Result<ChangeEvent, FeedError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.record.organization_id == self.organization_id => {
                    return Ok(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(FeedError::Lagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => return Err(FeedError::Closed),
            }
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
