//! Pairing Registry.
//!
//! Maps pairing keys to [`Pair`]s. A `DashMap` entry guard is the exclusive
//! region for one key: pair creation, leg replacement and session creation
//! all happen inside it, so concurrent attaches for a key agree on a single
//! pair and a single session per direction. Sessions are started and closed
//! only after the guard is released; nothing awaits while it is held.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::alerts::{ALERT_CHANNEL_CAPACITY, AlertKind, BridgeAlert};
use super::leg::Leg;
use super::pair::Pair;
use super::profile::{BridgeSettings, SessionFactory};
use super::role::{Direction, Role};
use super::session::AiSession;
use crate::errors::{BridgeError, BridgeResult};

/// Longest pairing key accepted from a caller.
pub const MAX_PAIRING_KEY_LEN: usize = 128;

/// Reject empty, oversized or control-character keys.
pub fn validate_pairing_key(key: &str) -> BridgeResult<()> {
    if key.trim().is_empty() || key.len() > MAX_PAIRING_KEY_LEN || key.chars().any(char::is_control)
    {
        return Err(BridgeError::InvalidPairingKey(key.to_string()));
    }
    Ok(())
}

pub struct PairingRegistry {
    pairs: DashMap<String, Arc<Pair>>,
    factory: Arc<dyn SessionFactory>,
    settings: Arc<BridgeSettings>,
    alerts: broadcast::Sender<BridgeAlert>,
}

impl PairingRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>, settings: BridgeSettings) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            pairs: DashMap::new(),
            factory,
            settings: Arc::new(settings),
            alerts,
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Receive upstream failure alerts from now on.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<BridgeAlert> {
        self.alerts.subscribe()
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<Pair>> {
        self.pairs.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    // ===== Reservation =====

    /// Pre-create the pair for `key` before any leg connects.
    pub fn reserve(&self, key: &str) -> BridgeResult<Arc<Pair>> {
        validate_pairing_key(key)?;
        let entry = self
            .pairs
            .entry(key.to_string())
            .or_insert_with(|| Pair::new(key, Arc::clone(&self.settings)));
        let pair = Arc::clone(entry.value());
        drop(entry);
        debug!(pairing_key = %key, "Pair reserved");
        Ok(pair)
    }

    /// Reserve a pair under a fresh server-generated key.
    pub fn reserve_generated(&self) -> Arc<Pair> {
        let key = Uuid::new_v4().to_string();
        let pair = Pair::new(key.clone(), Arc::clone(&self.settings));
        self.pairs.insert(key.clone(), Arc::clone(&pair));
        debug!(pairing_key = %key, "Pair reserved with generated key");
        pair
    }

    // ===== Attach / detach =====

    /// Attach `leg` to `key` in its role, replacing any leg already there.
    ///
    /// The pair and any missing translation session are created while the
    /// key's entry is held. A session that fails to create is reported as an
    /// alert and left absent so the next attach retries it.
    pub fn attach(&self, key: &str, leg: Arc<Leg>) -> BridgeResult<Arc<Pair>> {
        validate_pairing_key(key)?;
        let role = leg.role();
        if role == Role::Solo {
            return Err(BridgeError::InvalidRole(role.to_string()));
        }

        let (pair, displaced, created) = {
            let entry = self
                .pairs
                .entry(key.to_string())
                .or_insert_with(|| Pair::new(key, Arc::clone(&self.settings)));
            let pair = Arc::clone(entry.value());
            let displaced = pair.set_leg(Arc::clone(&leg));

            let mut created = Vec::new();
            for direction in [Direction::AtoB, Direction::BtoA] {
                if pair.session(direction).is_some() {
                    continue;
                }
                if let Some(session) = self.create_session(key, direction) {
                    pair.install_session(Arc::clone(&session));
                    created.push(session);
                }
            }
            (pair, displaced, created)
        };

        if let Some(old) = displaced
            && old.id() != leg.id()
        {
            info!(
                pairing_key = %key,
                role = %role,
                leg_id = %old.id(),
                "Leg superseded by a newer connection"
            );
            old.request_close();
        }

        for session in created {
            session.start(Arc::downgrade(&pair), self.settings.connect_timeout);
        }

        info!(pairing_key = %key, role = %role, leg_id = %leg.id(), "Leg attached");
        Ok(pair)
    }

    /// Remove the leg `leg_id` from `role`. When the pair is left without
    /// legs it leaves the registry and its sessions are closed, each exactly
    /// once. Errors while closing are logged, never returned.
    pub async fn detach(&self, key: &str, role: Role, leg_id: Uuid) {
        let mut still_attached = None;
        let removed = self.pairs.remove_if(key, |_, pair| {
            pair.clear_leg(role, leg_id);
            if pair.is_empty() {
                true
            } else {
                still_attached = Some(Arc::clone(pair));
                false
            }
        });

        match removed {
            Some((_, pair)) => {
                info!(pairing_key = %key, role = %role, leg_id = %leg_id, "Last leg detached; tearing down pair");
                Self::close_sessions(&pair).await;
            }
            None if still_attached.is_some() => {
                info!(pairing_key = %key, role = %role, leg_id = %leg_id, "Leg detached; pair kept");
            }
            None => {
                debug!(pairing_key = %key, role = %role, "Detach for unknown pair");
            }
        }
    }

    // ===== Single-leg topology =====

    /// Build the private pair of a solo leg. It is not registered under a
    /// key; only the owning connection holds it.
    pub fn open_solo(&self, leg: Arc<Leg>) -> BridgeResult<Arc<Pair>> {
        if leg.role() != Role::Solo {
            return Err(BridgeError::InvalidRole(leg.role().to_string()));
        }
        let key = format!("solo:{}", leg.id());
        let pair = Pair::new(key.clone(), Arc::clone(&self.settings));
        pair.set_leg(leg);
        if let Some(session) = self.create_session(&key, Direction::Solo) {
            pair.install_session(Arc::clone(&session));
            session.start(Arc::downgrade(&pair), self.settings.connect_timeout);
        }
        info!(pairing_key = %key, "Solo leg opened");
        Ok(pair)
    }

    pub async fn close_solo(&self, pair: &Pair) {
        if let Some(leg) = pair.leg(Role::Solo) {
            pair.clear_leg(Role::Solo, leg.id());
        }
        Self::close_sessions(pair).await;
        info!(pairing_key = %pair.key(), "Solo leg closed");
    }

    // ===== Reaping =====

    /// Remove reserved pairs no leg attached to within the attach timeout.
    /// Returns how many were removed.
    pub fn reap_expired(&self) -> usize {
        let timeout = self.settings.pair_attach_timeout;
        let before = self.pairs.len();
        self.pairs.retain(|key, pair| {
            let keep = pair.had_legs() || pair.has_legs() || pair.created_at().elapsed() < timeout;
            if !keep {
                info!(pairing_key = %key, "Reaping pair that no leg attached to");
            }
            keep
        });
        before.saturating_sub(self.pairs.len())
    }

    /// Run [`reap_expired`](Self::reap_expired) every `interval` until `shutdown`.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let reaped = registry.reap_expired();
                        if reaped > 0 {
                            debug!(reaped, "Reaper pass complete");
                        }
                    }
                }
            }
        })
    }

    // ===== Helpers =====

    fn create_session(&self, key: &str, direction: Direction) -> Option<Arc<AiSession>> {
        let profile = self.settings.profile(direction);
        let result = self.factory.create(&profile).and_then(|client| {
            AiSession::new(direction, key, client, self.alerts.clone())
        });
        match result {
            Ok(session) => {
                debug!(pairing_key = %key, direction = %direction, "AI session created");
                Some(session)
            }
            Err(e) => {
                error!(pairing_key = %key, direction = %direction, "Failed to create AI session: {}", e);
                let _ = self.alerts.send(BridgeAlert {
                    pairing_key: key.to_string(),
                    direction,
                    kind: AlertKind::SessionCreateFailed,
                    message: e.to_string(),
                });
                None
            }
        }
    }

    async fn close_sessions(pair: &Pair) {
        let sessions = pair.take_sessions();
        if sessions.is_empty() {
            return;
        }
        debug!(pairing_key = %pair.key(), sessions = sessions.len(), "Closing AI sessions");
        join_all(sessions.iter().map(|session| session.close())).await;
    }
}

impl std::fmt::Debug for PairingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingRegistry")
            .field("pairs", &self.pairs.len())
            .finish()
    }
}
