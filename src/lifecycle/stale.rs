use std::sync::Arc;
use tokio::{
    select,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::warn;

use super::core::LifecycleCore;
use super::events::LifecycleEvent;
use super::lease::{TimerKind, TimerLease};

// -----------------------------------------------------------------------------
// ----- StaleDataMonitor ------------------------------------------------------

/// Watchdog for connected sessions the gateway has not confirmed lately.
/// One `Stale` event per episode; a fresh sync ends the episode.
pub struct StaleDataMonitor;

impl StaleDataMonitor {
    pub(crate) fn spawn(core: Arc<LifecycleCore>) -> TimerLease {
        TimerLease::spawn(TimerKind::StaleCheck, move |token| async move {
            let period = core.timings.stale_check_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                Self::sweep(&core, Instant::now());
            }
        })
    }

    pub(crate) fn sweep(core: &LifecycleCore, now: Instant) -> usize {
        let threshold = core.timings.stale_threshold;
        let stale = core
            .registry
            .sweep_stale(&core.organization_id, now, threshold);

        for record in stale.iter() {
            warn!(
                "session {} not confirmed by the gateway for over {}",
                record.key(),
                humantime::format_duration(threshold)
            );
            core.events.publish(LifecycleEvent::Stale(record.clone()));
        }

        stale.len()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
