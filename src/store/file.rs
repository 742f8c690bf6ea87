use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::{fs, sync::Mutex};
use tracing::info;

use super::{ChangeFeed, MemoryStore, SessionStore};
use crate::errors::StoreError;
use crate::shared_types::SessionRecord;

// -----------------------------------------------------------------------------
// ----- JsonFileStore ---------------------------------------------------------

/// A [`MemoryStore`] whose rows survive restarts as a JSON snapshot file.
///
/// Each write is persisted before it is applied in memory, so a failed write
/// changes nothing and emits no feed event.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    rows: MemoryStore,
    write_lock: Mutex<()>,
}

// -----------------------------------------------------------------------------
// ----- JsonFileStore: Static -------------------------------------------------

impl JsonFileStore {
    /// Load the snapshot at `path`; a missing file is an empty table.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let records = match fs::read_to_string(&path).await {
            Ok(raw) => parse_snapshot(&raw, &path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(StoreError::read_failed(format!(
                    "read error for {path:?}: {e}"
                )));
            }
        };

        info!("loaded {} sessions from {:?}", records.len(), path);

        Ok(Self {
            path,
            rows: MemoryStore::with_records(records),
            write_lock: Mutex::new(()),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- JsonFileStore: SessionStore -------------------------------------------

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let key = record.key();
        let mut next: Vec<SessionRecord> =
            self.rows.all().into_iter().filter(|r| r.key() != key).collect();
        next.push(record.clone());

        self.persist(next).await?;
        self.rows.put(record);
        Ok(())
    }

    async fn delete(&self, organization_id: &str, session_name: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        if self.rows.get(organization_id, session_name).is_none() {
            return Ok(());
        }

        let next: Vec<SessionRecord> = self
            .rows
            .all()
            .into_iter()
            .filter(|r| !(r.organization_id == organization_id && r.session_name == session_name))
            .collect();

        self.persist(next).await?;
        self.rows.take(organization_id, session_name);
        Ok(())
    }

    async fn list(&self, organization_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self.rows.listing(organization_id))
    }

    fn subscribe(&self, organization_id: &str) -> ChangeFeed {
        self.rows.feed(organization_id)
    }
}

// -----------------------------------------------------------------------------
// ----- JsonFileStore: Private ------------------------------------------------

impl JsonFileStore {
    async fn persist(&self, mut sessions: Vec<SessionRecord>) -> Result<(), StoreError> {
        sessions.sort_by(|a, b| a.key().cmp(&b.key()));

        let raw = serde_json::to_string_pretty(&SnapshotFile { sessions })
            .map_err(|e| StoreError::write_failed(format!("encode snapshot: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw).await.map_err(|e| {
            StoreError::write_failed(format!("write error for {tmp:?}: {e}"))
        })?;
        fs::rename(&tmp, &self.path).await.map_err(|e| {
            StoreError::write_failed(format!("rename error for {:?}: {e}", self.path))
        })?;

        Ok(())
    }
}

fn parse_snapshot(raw: &str, path: &Path) -> Result<Vec<SessionRecord>, StoreError> {
    let doc: SnapshotFile = serde_json::from_str(raw)
        .map_err(|e| StoreError::read_failed(format!("invalid snapshot {path:?}: {e}")))?;
    Ok(doc.sessions)
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
