use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::lifecycle::events::{EventBus, LifecycleEvent};
use crate::shared_types::{SessionKey, SessionRecord, SessionStatus};

// -----------------------------------------------------------------------------
// ----- SessionRegistry -------------------------------------------------------

/// In-process source of truth between store round-trips.
///
/// One mutex guards the whole map, so every upsert/remove is serialized and
/// `list` never observes a half-applied change. Events are published while
/// the lock is held to keep them in mutation order.
#[derive(Debug)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionKey, RegistryEntry>>,
    events: EventBus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Older than or as old as the cached record.
    Discarded,
    /// Violates the pairing payload invariant.
    Rejected,
}

impl UpsertOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Updated)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: RegistryEntry -----------------------------------------------

#[derive(Debug, Clone)]
struct RegistryEntry {
    record: SessionRecord,
    last_sync_at: Option<Instant>,
    stale_notified: bool,
}

// -----------------------------------------------------------------------------
// ----- SessionRegistry: Static -----------------------------------------------

impl SessionRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- SessionRegistry: Public -----------------------------------------------

impl SessionRegistry {
    /// Newer `updated_at` wins; anything older or equal is discarded.
    pub fn upsert(&self, record: SessionRecord) -> UpsertOutcome {
        self.apply(record, false)
    }

    /// Like [`upsert`](Self::upsert), but never touches an existing record.
    pub fn insert_if_absent(&self, record: SessionRecord) -> UpsertOutcome {
        self.apply(record, true)
    }

    pub fn remove(&self, key: &SessionKey) -> Option<SessionRecord> {
        let mut entries = self.entries.lock();
        let removed = entries.remove(key)?;

        self.events.publish(LifecycleEvent::Removed(key.clone()));
        Some(removed.record)
    }

    /// Drop every record of `organization_id` whose name is not in `present`.
    pub fn remove_missing(
        &self,
        organization_id: &str,
        present: &[SessionRecord],
    ) -> Vec<SessionKey> {
        let keep: HashSet<&str> = present.iter().map(|r| r.session_name.as_str()).collect();

        let mut entries = self.entries.lock();
        let gone: Vec<SessionKey> = entries
            .keys()
            .filter(|k| k.organization_id == organization_id)
            .filter(|k| !keep.contains(k.session_name.as_str()))
            .cloned()
            .collect();

        for key in gone.iter() {
            entries.remove(key);
            self.events.publish(LifecycleEvent::Removed(key.clone()));
        }

        gone
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionRecord> {
        self.entries.lock().get(key).map(|e| e.record.clone())
    }

    /// Snapshot of one tenant, ordered by session name.
    pub fn list(&self, organization_id: &str) -> Vec<SessionRecord> {
        let entries = self.entries.lock();

        let mut records: Vec<SessionRecord> = entries
            .values()
            .filter(|e| e.record.organization_id == organization_id)
            .map(|e| e.record.clone())
            .collect();

        records.sort_by(|a, b| a.session_name.cmp(&b.session_name));
        records
    }

    pub fn count(&self, organization_id: &str) -> usize {
        self.entries
            .lock()
            .keys()
            .filter(|k| k.organization_id == organization_id)
            .count()
    }

    pub fn last_sync_at(&self, key: &SessionKey) -> Option<Instant> {
        self.entries.lock().get(key).and_then(|e| e.last_sync_at)
    }

    pub fn is_stale(&self, key: &SessionKey) -> bool {
        self.entries
            .lock()
            .get(key)
            .map(|e| e.stale_notified)
            .unwrap_or(false)
    }

    /// Record a successful gateway confirmation. Ends any stale episode.
    pub fn mark_synced(&self, key: &SessionKey, at: Instant) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };

        entry.last_sync_at = Some(at);
        entry.stale_notified = false;
        true
    }

    /// Flag connected sessions whose last confirmation is older than
    /// `threshold` and return the ones that were not flagged yet. Sessions
    /// that are fresh again (or no longer connected) get their flag cleared.
    pub fn sweep_stale(
        &self,
        organization_id: &str,
        now: Instant,
        threshold: Duration,
    ) -> Vec<SessionRecord> {
        let mut entries = self.entries.lock();
        let mut newly_stale = Vec::new();

        for entry in entries
            .values_mut()
            .filter(|e| e.record.organization_id == organization_id)
        {
            let is_stale = match (entry.record.status, entry.last_sync_at) {
                (SessionStatus::Connected, Some(synced)) => {
                    now.saturating_duration_since(synced) > threshold
                }
                _ => false,
            };

            if is_stale && !entry.stale_notified {
                entry.stale_notified = true;
                newly_stale.push(entry.record.clone());
            } else if !is_stale && entry.stale_notified {
                debug!("stale episode over for {}", entry.record.key());
                entry.stale_notified = false;
            }
        }

        newly_stale
    }

    /// Flag one session stale out of band. Returns the record only if it was
    /// not flagged already.
    pub fn flag_stale(&self, key: &SessionKey) -> Option<SessionRecord> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;

        if entry.stale_notified {
            return None;
        }

        entry.stale_notified = true;
        Some(entry.record.clone())
    }
}

// -----------------------------------------------------------------------------
// ----- SessionRegistry: Private ----------------------------------------------

impl SessionRegistry {
    fn apply(&self, record: SessionRecord, only_if_absent: bool) -> UpsertOutcome {
        if !record.is_consistent() {
            warn!(
                "rejecting {} record for {}: pairing payload does not match status",
                record.status,
                record.key()
            );
            return UpsertOutcome::Rejected;
        }

        let key = record.key();
        let mut entries = self.entries.lock();

        let (outcome, image_changed) = match entries.get_mut(&key) {
            Some(_) if only_if_absent => return UpsertOutcome::Discarded,

            Some(entry) if record.updated_at <= entry.record.updated_at => {
                return UpsertOutcome::Discarded;
            }

            Some(entry) => {
                let image_changed = record.pairing_image.is_some()
                    && record.pairing_image != entry.record.pairing_image;
                entry.record = record.clone();
                (UpsertOutcome::Updated, image_changed)
            }

            None => {
                let image_changed = record.pairing_image.is_some();
                entries.insert(
                    key,
                    RegistryEntry {
                        record: record.clone(),
                        last_sync_at: None,
                        stale_notified: false,
                    },
                );
                (UpsertOutcome::Inserted, image_changed)
            }
        };

        if image_changed {
            if let Some(image) = record.pairing_image.clone() {
                self.events.publish(LifecycleEvent::PairingImageUpdated {
                    session: record.clone(),
                    image,
                });
            }
        }
        self.events.publish(LifecycleEvent::StatusChanged(record));

        outcome
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
