use std::sync::Arc;
use tokio::select;
use tracing::{debug, info, warn};

use super::core::LifecycleCore;
use super::lease::{TimerKind, TimerLease};
use crate::store::{ChangeEvent, ChangeFeed, ChangeOp, FeedError};

// -----------------------------------------------------------------------------
// ----- RealtimeReconciler ----------------------------------------------------

/// Folds the store's change feed back into the registry.
///
/// Every event goes through the registry's own conflict rule, so replaying
/// an event leaves the registry exactly as the first delivery did.
pub struct RealtimeReconciler;

impl RealtimeReconciler {
    pub(crate) fn spawn(core: Arc<LifecycleCore>, mut feed: ChangeFeed) -> TimerLease {
        TimerLease::spawn(TimerKind::ChangeFeed, move |token| async move {
            loop {
                let next = select! {
                    _ = token.cancelled() => break,
                    next = feed.recv() => next,
                };

                match next {
                    Ok(event) => Self::apply(&core, event),
                    Err(FeedError::Lagged { skipped }) => {
                        warn!(
                            "change feed for {} lagged by {skipped} events; resyncing",
                            feed.organization_id()
                        );
                        Self::resync(&core).await;
                    }
                    Err(FeedError::Closed) => {
                        info!("change feed for {} closed", feed.organization_id());
                        break;
                    }
                }
            }
        })
    }

    pub(crate) fn apply(core: &LifecycleCore, event: ChangeEvent) {
        let key = event.record.key();

        match event.op {
            // A local optimistic insert may already be cached; keep it.
            ChangeOp::Insert => {
                let outcome = core.registry.insert_if_absent(event.record);
                debug!("feed insert for {key}: {outcome:?}");
            }

            ChangeOp::Update => {
                let outcome = core.registry.upsert(event.record);
                debug!("feed update for {key}: {outcome:?}");
            }

            // Only the row the event names; a re-created session keeps living.
            ChangeOp::Delete => {
                let cached_id = core.registry.get(&key).map(|r| r.id);
                if cached_id.is_none() || cached_id.as_deref() == Some(event.record.id.as_str()) {
                    core.forget(&key);
                }
            }
        }
    }

    /// Re-read the tenant's rows after losing events.
    async fn resync(core: &LifecycleCore) {
        let records = match core.store.list(&core.organization_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!("resync of {} failed: {e}", core.organization_id);
                return;
            }
        };

        for key in core
            .registry
            .remove_missing(&core.organization_id, &records)
        {
            core.forget(&key);
        }

        for record in records {
            core.registry.upsert(record);
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
