pub mod bridge;
pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use bridge::{BridgeController, PairingRegistry};
pub use config::ServerConfig;
pub use errors::{BridgeError, BridgeResult};
pub use state::{AppState, ConnectionSlot};
