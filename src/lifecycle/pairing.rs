use std::{sync::Arc, time::Duration};
use tokio::{
    select,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use super::core::LifecycleCore;
use super::events::LifecycleEvent;
use super::flows::{CountdownTick, PairingState};
use super::lease::{TimerKind, TimerLease};
use crate::errors::LifecycleError;
use crate::gateway;
use crate::shared_types::{SessionKey, SessionRecord, SessionStatus};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

// -----------------------------------------------------------------------------
// ----- PairingTicket ---------------------------------------------------------

/// What a surface needs to render right after a pairing action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingTicket {
    pub session: SessionKey,
    pub status: SessionStatus,
    pub pairing_image: Option<String>,
    pub countdown: Option<u32>,
}

impl PairingTicket {
    /// The payload to show, or `PairingCodeUnavailable` so the user knows to
    /// ask for a refresh.
    pub fn require_image(&self) -> Result<&str, LifecycleError> {
        self.pairing_image
            .as_deref()
            .ok_or_else(|| LifecycleError::PairingCodeUnavailable {
                session: self.session.clone(),
            })
    }
}

// -----------------------------------------------------------------------------
// ----- PairingFlow -----------------------------------------------------------

impl LifecycleCore {
    pub(crate) async fn begin_pairing(
        self: &Arc<Self>,
        hint: &str,
    ) -> Result<PairingTicket, LifecycleError> {
        let reply = gateway::within(self.timings.gateway_timeout, self.gateway.start(hint)).await?;
        let key = self.key(&reply.session_name);

        let base = self
            .registry
            .get(&key)
            .unwrap_or_else(|| SessionRecord::new(&key));

        if reply.status == SessionStatus::Connected {
            self.flows.mark_connected(&key);
            let record = if base.status == SessionStatus::Connected {
                base
            } else {
                base.to_connected()
            };

            self.persist(record.clone()).await?;
            self.registry.mark_synced(&key, Instant::now());
            info!("session {key} is already connected");
            self.events.publish(LifecycleEvent::Connected(record));

            return Ok(PairingTicket {
                session: key,
                status: SessionStatus::Connected,
                pairing_image: None,
                countdown: None,
            });
        }

        self.arm(&key);

        let record = match reply.pairing_image.clone() {
            Some(image) => base.to_pairing(image),
            None => base.to_disconnected(),
        };

        // The code is already live on the gateway; a store hiccup here is
        // flagged stale by persist and corrected by the next write.
        if let Err(e) = self.persist(record.clone()).await {
            warn!("pairing for {key} continues without a stored row: {e}");
        }
        self.registry.mark_synced(&key, Instant::now());

        if reply.pairing_image.is_none() {
            warn!("gateway issued no pairing code for {key}");
            self.events
                .publish(LifecycleEvent::PairingCodeUnavailable(key.clone()));
        } else {
            info!("pairing started for {key}");
        }

        Ok(PairingTicket {
            countdown: self.flows.countdown(&key),
            session: key,
            status: record.status,
            pairing_image: reply.pairing_image,
        })
    }

    /// Fetch a fresh code and restart the countdown. Poll cadence stays.
    pub(crate) async fn refresh_pairing_code(
        &self,
        key: &SessionKey,
    ) -> Result<PairingTicket, LifecycleError> {
        let epoch = self.require_awaiting(key)?;
        let observed = self
            .registry
            .get(key)
            .ok_or_else(|| LifecycleError::UnknownSession {
                session: key.clone(),
            })?;

        let reply = self.status(&key.session_name, true).await?;

        match (reply.status, reply.pairing_image.clone()) {
            (SessionStatus::Connected, _) => {
                self.apply_status(&observed, reply, Some(epoch)).await?;
                Ok(PairingTicket {
                    session: key.clone(),
                    status: SessionStatus::Connected,
                    pairing_image: None,
                    countdown: None,
                })
            }

            (SessionStatus::Pairing, Some(image)) => {
                if !self
                    .flows
                    .reset_countdown(key, epoch, self.timings.countdown_seconds)
                {
                    return Err(self.not_awaiting(key));
                }

                self.registry.mark_synced(key, Instant::now());
                let current = self.registry.get(key).unwrap_or(observed);
                self.persist(current.to_pairing(image.clone())).await?;
                info!("pairing code for {key} refreshed");

                Ok(PairingTicket {
                    session: key.clone(),
                    status: SessionStatus::Pairing,
                    pairing_image: Some(image),
                    countdown: self.flows.countdown(key),
                })
            }

            (_, _) => {
                self.events
                    .publish(LifecycleEvent::PairingCodeUnavailable(key.clone()));
                Err(LifecycleError::PairingCodeUnavailable {
                    session: key.clone(),
                })
            }
        }
    }

    /// Stop a pairing the user walked away from.
    pub(crate) async fn cancel_pairing(&self, key: &SessionKey) -> Result<(), LifecycleError> {
        self.require_awaiting(key)?;
        self.flows.settle(key, PairingState::Idle);
        info!("pairing for {key} cancelled");

        let Some(current) = self.registry.get(key) else {
            return Ok(());
        };

        if current.status != SessionStatus::Disconnected {
            self.persist(current.to_disconnected()).await?;
        }

        Ok(())
    }

    /// Explicit user disconnect. Gateway failures are returned unretried and
    /// leave the cached state alone.
    pub(crate) async fn disconnect(&self, key: &SessionKey) -> Result<(), LifecycleError> {
        if self.registry.get(key).is_none() {
            return Err(self.missing(key));
        }

        gateway::within(
            self.timings.gateway_timeout,
            self.gateway.disconnect(&key.session_name),
        )
        .await?;

        self.flows.settle(key, PairingState::Idle);

        let Some(current) = self.registry.get(key) else {
            return Ok(());
        };

        info!("session {key} disconnected");
        if current.status != SessionStatus::Disconnected {
            self.persist(current.to_disconnected()).await?;
        }

        Ok(())
    }

    /// Terminal removal: best-effort gateway disconnect, then the row.
    pub(crate) async fn delete(&self, key: &SessionKey) -> Result<(), LifecycleError> {
        if self.registry.get(key).is_none() {
            return Err(self.missing(key));
        }

        if let Err(e) = gateway::within(
            self.timings.gateway_timeout,
            self.gateway.disconnect(&key.session_name),
        )
        .await
        {
            warn!("disconnect before deleting {key} failed, deleting anyway: {e}");
        }

        // Until the row is gone the session, and any flow on it, stays live.
        self.store
            .delete(&key.organization_id, &key.session_name)
            .await?;
        self.flows.settle(key, PairingState::Removed);
        self.registry.remove(key);
        info!("session {key} deleted");

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- PairingFlow: Timers ---------------------------------------------------

impl LifecycleCore {
    fn arm(self: &Arc<Self>, key: &SessionKey) -> u64 {
        self.flows
            .arm(key, self.timings.countdown_seconds, |epoch| {
                (
                    self.spawn_poll(key.clone(), epoch),
                    self.spawn_countdown(key.clone(), epoch),
                )
            })
    }

    fn spawn_poll(self: &Arc<Self>, key: SessionKey, epoch: u64) -> TimerLease {
        let core = Arc::clone(self);

        TimerLease::spawn(TimerKind::PairingPoll, move |token| async move {
            let period = core.timings.poll_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !core.flows.is_current(&key, epoch) {
                    break;
                }

                let Some(observed) = core.registry.get(&key) else {
                    break;
                };

                match core.status(&key.session_name, false).await {
                    Ok(reply) => {
                        if let Err(e) = core.apply_status(&observed, reply, Some(epoch)).await {
                            warn!("pairing poll for {key} could not be stored: {e}");
                        }
                    }
                    Err(e) => warn!("pairing poll for {key} failed: {e}"),
                }
            }

            debug!("pairing poll for {key} stopped");
        })
    }

    fn spawn_countdown(self: &Arc<Self>, key: SessionKey, epoch: u64) -> TimerLease {
        let core = Arc::clone(self);

        TimerLease::spawn(TimerKind::PairingCountdown, move |token| async move {
            let mut ticker = interval_at(Instant::now() + COUNTDOWN_TICK, COUNTDOWN_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match core.flows.tick_countdown(&key, epoch) {
                    CountdownTick::Remaining(left) => {
                        if left % 30 == 0 {
                            debug!("pairing code for {key} valid for {left}s");
                        }
                    }
                    CountdownTick::Expired => {
                        core.expire(&key).await;
                        break;
                    }
                    CountdownTick::Superseded => break,
                }
            }
        })
    }
}

// -----------------------------------------------------------------------------
// ----- PairingFlow: Private --------------------------------------------------

impl LifecycleCore {
    fn require_awaiting(&self, key: &SessionKey) -> Result<u64, LifecycleError> {
        match self.flows.state(key) {
            PairingState::AwaitingScan { .. } => self
                .flows
                .awaiting_epoch(key)
                .ok_or_else(|| self.not_awaiting(key)),
            PairingState::Expired => Err(LifecycleError::PairingExpired {
                session: key.clone(),
            }),
            PairingState::Removed => Err(LifecycleError::SessionRemoved {
                session: key.clone(),
            }),
            PairingState::Idle | PairingState::Connected => Err(self.not_awaiting(key)),
        }
    }

    fn not_awaiting(&self, key: &SessionKey) -> LifecycleError {
        LifecycleError::NotAwaitingScan {
            session: key.clone(),
        }
    }

    fn missing(&self, key: &SessionKey) -> LifecycleError {
        match self.flows.state(key) {
            PairingState::Removed => LifecycleError::SessionRemoved {
                session: key.clone(),
            },
            _ => LifecycleError::UnknownSession {
                session: key.clone(),
            },
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
