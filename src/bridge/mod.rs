//! Streaming audio bridge between telephony legs and AI sessions.

pub mod alerts;
pub mod controller;
pub mod dispatch;
pub mod interruption;
pub mod leg;
pub mod pair;
pub mod profile;
pub mod registry;
pub mod role;
pub mod session;
mod signaling;

pub use alerts::{AlertKind, BridgeAlert, log_alerts};
pub use controller::{BridgeController, Topology, resolve_topology};
pub use leg::{AckOutcome, ChunkDecision, Leg, PlaybackSnapshot};
pub use pair::Pair;
pub use profile::{BridgeSettings, RealtimeSessionFactory, SessionFactory, SessionProfile};
pub use registry::{PairingRegistry, validate_pairing_key};
pub use role::{Direction, Role};
pub use session::{AiSession, SessionState};
