use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::lease::TimerLease;
use crate::shared_types::SessionKey;

// -----------------------------------------------------------------------------
// ----- PairingState ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingState {
    #[default]
    Idle,
    AwaitingScan {
        remaining: u32,
    },
    Connected,
    /// Countdown ran out. A new pairing has to be requested explicitly.
    Expired,
    /// Terminal. Only a brand new pairing can reuse the session name.
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    Remaining(u32),
    Expired,
    /// The flow this timer belongs to is gone or was replaced.
    Superseded,
}

// -----------------------------------------------------------------------------
// ----- PairingBook -----------------------------------------------------------

/// Pairing state and timer leases per session.
///
/// Timer tasks carry the epoch of the flow that spawned them and look the
/// slot up on every tick; a mismatched epoch means the flow was replaced and
/// the tick is dropped. A slot holds at most one poll lease and one countdown
/// lease, and installing new ones releases the old ones first.
#[derive(Debug, Default)]
pub struct PairingBook {
    slots: Mutex<HashMap<SessionKey, FlowSlot>>,
    next_epoch: AtomicU64,
}

#[derive(Debug, Default)]
struct FlowSlot {
    epoch: u64,
    state: PairingState,
    poll: Option<TimerLease>,
    countdown: Option<TimerLease>,
}

impl FlowSlot {
    fn release_timers(&mut self) {
        if let Some(lease) = self.poll.take() {
            lease.release();
        }
        if let Some(lease) = self.countdown.take() {
            lease.release();
        }
    }

    fn active_timers(&self) -> usize {
        [self.poll.as_ref(), self.countdown.as_ref()]
            .into_iter()
            .flatten()
            .filter(|lease| lease.is_active())
            .count()
    }

    fn awaiting(&self, epoch: u64) -> bool {
        self.epoch == epoch && matches!(self.state, PairingState::AwaitingScan { .. })
    }
}

// -----------------------------------------------------------------------------
// ----- PairingBook: Public ---------------------------------------------------

impl PairingBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &SessionKey) -> PairingState {
        self.slots
            .lock()
            .get(key)
            .map(|slot| slot.state)
            .unwrap_or_default()
    }

    pub fn countdown(&self, key: &SessionKey) -> Option<u32> {
        match self.state(key) {
            PairingState::AwaitingScan { remaining } => Some(remaining),
            _ => None,
        }
    }

    pub fn active_timers(&self, key: &SessionKey) -> usize {
        self.slots
            .lock()
            .get(key)
            .map(FlowSlot::active_timers)
            .unwrap_or(0)
    }

    pub fn total_active_timers(&self) -> usize {
        self.slots.lock().values().map(FlowSlot::active_timers).sum()
    }

    /// Epoch of the flow currently awaiting a scan, if any.
    pub fn awaiting_epoch(&self, key: &SessionKey) -> Option<u64> {
        let slots = self.slots.lock();
        let slot = slots.get(key)?;

        match slot.state {
            PairingState::AwaitingScan { .. } => Some(slot.epoch),
            _ => None,
        }
    }

    pub fn is_current(&self, key: &SessionKey, epoch: u64) -> bool {
        self.slots
            .lock()
            .get(key)
            .map(|slot| slot.awaiting(epoch))
            .unwrap_or(false)
    }

    /// Enter `AwaitingScan`: release whatever timers the session had, start a
    /// new epoch and install the poll and countdown leases `spawn` returns.
    pub fn arm<F>(&self, key: &SessionKey, countdown: u32, spawn: F) -> u64
    where
        F: FnOnce(u64) -> (TimerLease, TimerLease),
    {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;

        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();
        slot.release_timers();

        let (poll, countdown_lease) = spawn(epoch);
        slot.epoch = epoch;
        slot.state = PairingState::AwaitingScan {
            remaining: countdown,
        };
        slot.poll = Some(poll);
        slot.countdown = Some(countdown_lease);

        epoch
    }

    pub fn tick_countdown(&self, key: &SessionKey, epoch: u64) -> CountdownTick {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return CountdownTick::Superseded;
        };

        if !slot.awaiting(epoch) {
            return CountdownTick::Superseded;
        }

        let PairingState::AwaitingScan { remaining } = slot.state else {
            return CountdownTick::Superseded;
        };

        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            slot.state = PairingState::AwaitingScan { remaining };
            return CountdownTick::Remaining(remaining);
        }

        slot.state = PairingState::Expired;
        slot.release_timers();
        CountdownTick::Expired
    }

    /// Restart the countdown of the given flow. Poll cadence is untouched.
    pub fn reset_countdown(&self, key: &SessionKey, epoch: u64, countdown: u32) -> bool {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return false;
        };

        if !slot.awaiting(epoch) {
            return false;
        }

        slot.state = PairingState::AwaitingScan {
            remaining: countdown,
        };
        true
    }

    /// Move to `Connected`, releasing timers. Returns true if this ended a
    /// flow that was awaiting a scan.
    pub fn mark_connected(&self, key: &SessionKey) -> bool {
        let previous = self.settle(key, PairingState::Connected);
        matches!(previous, PairingState::AwaitingScan { .. })
    }

    /// Release timers and force `state`. Returns the previous state.
    ///
    /// Sessions without a slot only get one for `Removed`, which has to
    /// outlive the registry row. Settling to `Idle` drops the slot.
    pub fn settle(&self, key: &SessionKey, state: PairingState) -> PairingState {
        let mut slots = self.slots.lock();

        if !slots.contains_key(key) && state != PairingState::Removed {
            return PairingState::Idle;
        }

        let slot = slots.entry(key.clone()).or_default();

        slot.release_timers();
        let previous = std::mem::replace(&mut slot.state, state);

        if state == PairingState::Idle {
            slots.remove(key);
        }

        previous
    }

    /// Take every lease out of the book, e.g. to join them on shutdown.
    /// Flows that were awaiting a scan are dropped and reported.
    pub fn drain(&self) -> DrainedFlows {
        let mut slots = self.slots.lock();
        let mut drained = DrainedFlows::default();

        for (key, slot) in slots.iter_mut() {
            drained.leases.extend(slot.poll.take());
            drained.leases.extend(slot.countdown.take());
            if matches!(slot.state, PairingState::AwaitingScan { .. }) {
                drained.interrupted.push(key.clone());
            }
        }

        slots.retain(|_, slot| !matches!(slot.state, PairingState::AwaitingScan { .. }));
        drained
    }

    /// Sessions the book holds a slot for.
    pub fn tracked(&self) -> usize {
        self.slots.lock().len()
    }
}

#[derive(Debug, Default)]
pub struct DrainedFlows {
    pub leases: Vec<TimerLease>,
    /// Sessions whose pairing was cut short.
    pub interrupted: Vec<SessionKey>,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::lease::TimerKind;

    fn idle_lease(kind: TimerKind) -> TimerLease {
        TimerLease::spawn(kind, |token| async move { token.cancelled().await })
    }

    fn pair() -> (TimerLease, TimerLease) {
        (
            idle_lease(TimerKind::PairingPoll),
            idle_lease(TimerKind::PairingCountdown),
        )
    }

    #[tokio::test]
    async fn rearming_replaces_timers() {
        let book = PairingBook::new();
        let key = SessionKey::new("org-1", "s1");

        let first = book.arm(&key, 120, |_| pair());
        let second = book.arm(&key, 120, |_| pair());

        assert_ne!(first, second);
        assert_eq!(book.active_timers(&key), 2);
        assert!(!book.is_current(&key, first));
        assert!(book.is_current(&key, second));
        assert_eq!(book.tick_countdown(&key, first), CountdownTick::Superseded);
    }

    #[tokio::test]
    async fn countdown_expires_at_zero() {
        let book = PairingBook::new();
        let key = SessionKey::new("org-1", "s1");
        let epoch = book.arm(&key, 2, |_| pair());

        assert_eq!(book.tick_countdown(&key, epoch), CountdownTick::Remaining(1));
        assert_eq!(book.tick_countdown(&key, epoch), CountdownTick::Expired);
        assert_eq!(book.state(&key), PairingState::Expired);
        assert_eq!(book.active_timers(&key), 0);
        assert_eq!(book.tick_countdown(&key, epoch), CountdownTick::Superseded);
    }

    #[tokio::test]
    async fn reset_only_applies_to_current_flow() {
        let book = PairingBook::new();
        let key = SessionKey::new("org-1", "s1");
        let epoch = book.arm(&key, 120, |_| pair());

        book.tick_countdown(&key, epoch);
        assert!(book.reset_countdown(&key, epoch, 120));
        assert_eq!(book.countdown(&key), Some(120));
        assert!(!book.reset_countdown(&key, epoch + 1, 120));
    }

    #[tokio::test]
    async fn mark_connected_reports_completed_flow_once() {
        let book = PairingBook::new();
        let key = SessionKey::new("org-1", "s1");
        book.arm(&key, 120, |_| pair());

        assert!(book.mark_connected(&key));
        assert!(!book.mark_connected(&key));
        assert_eq!(book.active_timers(&key), 0);
        assert_eq!(book.total_active_timers(), 0);
    }

    #[tokio::test]
    async fn slots_exist_only_for_flows_and_removals() {
        let book = PairingBook::new();
        let seen = SessionKey::new("org-1", "refreshed");
        let paired = SessionKey::new("org-1", "paired");
        let gone = SessionKey::new("org-1", "gone");

        assert!(!book.mark_connected(&seen));
        assert_eq!(book.settle(&seen, PairingState::Idle), PairingState::Idle);
        assert_eq!(book.tracked(), 0);

        book.arm(&paired, 120, |_| pair());
        assert_eq!(book.tracked(), 1);
        book.settle(&paired, PairingState::Idle);
        assert_eq!(book.tracked(), 0);

        book.settle(&gone, PairingState::Removed);
        assert_eq!(book.state(&gone), PairingState::Removed);
        assert_eq!(book.tracked(), 1);
    }

    #[tokio::test]
    async fn drain_reports_interrupted_flows() {
        let book = PairingBook::new();
        let waiting = SessionKey::new("org-1", "waiting");
        let done = SessionKey::new("org-1", "done");

        book.arm(&waiting, 120, |_| pair());
        book.arm(&done, 120, |_| pair());
        book.mark_connected(&done);

        let drained = book.drain();
        assert_eq!(drained.interrupted, vec![waiting.clone()]);
        assert_eq!(drained.leases.len(), 2);
        assert_eq!(book.state(&waiting), PairingState::Idle);
        assert_eq!(book.state(&done), PairingState::Connected);
        assert_eq!(book.total_active_timers(), 0);
    }

    #[test]
    fn unknown_sessions_are_idle() {
        let book = PairingBook::new();
        let key = SessionKey::new("org-1", "nope");
        assert_eq!(book.state(&key), PairingState::Idle);
        assert_eq!(book.countdown(&key), None);
        assert_eq!(book.awaiting_epoch(&key), None);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
