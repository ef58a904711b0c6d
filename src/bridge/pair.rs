//! Conference state for one pairing key.
//!
//! A [`Pair`] is shared between the registry, both leg connections and the
//! event pumps of its sessions. Slot mutation happens only while the registry
//! holds the key's map entry, so readers here never observe a half-made pair.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use uuid::Uuid;

use super::leg::Leg;
use super::profile::BridgeSettings;
use super::role::{Direction, Role};
use super::session::AiSession;

#[derive(Debug, Default)]
struct PairSlots {
    a: Option<Arc<Leg>>,
    b: Option<Arc<Leg>>,
    solo: Option<Arc<Leg>>,
    session_ab: Option<Arc<AiSession>>,
    session_ba: Option<Arc<AiSession>>,
    session_solo: Option<Arc<AiSession>>,
    had_legs: bool,
}

impl PairSlots {
    fn leg_slot(&mut self, role: Role) -> &mut Option<Arc<Leg>> {
        match role {
            Role::A => &mut self.a,
            Role::B => &mut self.b,
            Role::Solo => &mut self.solo,
        }
    }

    fn session_slot(&mut self, direction: Direction) -> &mut Option<Arc<AiSession>> {
        match direction {
            Direction::AtoB => &mut self.session_ab,
            Direction::BtoA => &mut self.session_ba,
            Direction::Solo => &mut self.session_solo,
        }
    }
}

/// Legs and AI sessions of one call.
#[derive(Debug)]
pub struct Pair {
    key: String,
    created_at: Instant,
    settings: Arc<BridgeSettings>,
    slots: RwLock<PairSlots>,
}

impl Pair {
    pub fn new(key: impl Into<String>, settings: Arc<BridgeSettings>) -> Arc<Self> {
        Arc::new(Self {
            key: key.into(),
            created_at: Instant::now(),
            settings,
            slots: RwLock::new(PairSlots::default()),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn leg(&self, role: Role) -> Option<Arc<Leg>> {
        let slots = self.slots.read();
        match role {
            Role::A => slots.a.clone(),
            Role::B => slots.b.clone(),
            Role::Solo => slots.solo.clone(),
        }
    }

    pub fn session(&self, direction: Direction) -> Option<Arc<AiSession>> {
        let slots = self.slots.read();
        match direction {
            Direction::AtoB => slots.session_ab.clone(),
            Direction::BtoA => slots.session_ba.clone(),
            Direction::Solo => slots.session_solo.clone(),
        }
    }

    /// True while any role is occupied.
    pub fn has_legs(&self) -> bool {
        let slots = self.slots.read();
        slots.a.is_some() || slots.b.is_some() || slots.solo.is_some()
    }

    /// True once any leg has ever attached.
    pub fn had_legs(&self) -> bool {
        self.slots.read().had_legs
    }

    pub fn is_empty(&self) -> bool {
        !self.has_legs()
    }

    /// Directions with a session installed.
    pub fn session_directions(&self) -> Vec<Direction> {
        let slots = self.slots.read();
        let mut directions = Vec::new();
        if slots.session_ab.is_some() {
            directions.push(Direction::AtoB);
        }
        if slots.session_ba.is_some() {
            directions.push(Direction::BtoA);
        }
        if slots.session_solo.is_some() {
            directions.push(Direction::Solo);
        }
        directions
    }

    // ===== Mutation (registry entry held) =====

    /// Put `leg` in its role and return whichever leg it displaced.
    pub(crate) fn set_leg(&self, leg: Arc<Leg>) -> Option<Arc<Leg>> {
        let mut slots = self.slots.write();
        slots.had_legs = true;
        slots.leg_slot(leg.role()).replace(leg)
    }

    /// Clear `role` only if it still holds the leg with `leg_id`.
    pub(crate) fn clear_leg(&self, role: Role, leg_id: Uuid) -> bool {
        let mut slots = self.slots.write();
        let slot = slots.leg_slot(role);
        if slot.as_ref().is_some_and(|leg| leg.id() == leg_id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Install a session unless the direction already has one. Returns
    /// whether the session was installed.
    pub(crate) fn install_session(&self, session: Arc<AiSession>) -> bool {
        let mut slots = self.slots.write();
        let slot = slots.session_slot(session.direction());
        if slot.is_some() {
            return false;
        }
        *slot = Some(session);
        true
    }

    /// Remove every session so each is closed by exactly one caller.
    pub(crate) fn take_sessions(&self) -> Vec<Arc<AiSession>> {
        let mut slots = self.slots.write();
        [
            slots.session_ab.take(),
            slots.session_ba.take(),
            slots.session_solo.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}
