//! Shared application state.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use crate::bridge::PairingRegistry;
use crate::config::ServerConfig;

/// Why a media-stream upgrade was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("bridge is at its media stream capacity")]
    GlobalLimitReached,
    #[error("too many media streams from one address")]
    PerIpLimitReached,
}

/// An admitted media-stream connection.
///
/// Clones share one slot, which is handed back when the last clone drops.
/// The slot therefore ends with the call, or with the request if the upgrade
/// never completes.
#[derive(Clone)]
pub struct ConnectionSlot(Arc<SlotLease>);

struct SlotLease {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}

impl ConnectionSlot {
    pub fn ip(&self) -> IpAddr {
        self.0.ip
    }
}

impl std::fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConnectionSlot").field(&self.0.ip).finish()
    }
}

/// State shared by every request handler.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<PairingRegistry>,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    pub fn new(config: ServerConfig, registry: Arc<PairingRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Reserve a connection slot for `ip`, honouring the global and per-IP caps.
    pub fn try_acquire_connection(self: &Arc<Self>, ip: IpAddr) -> Result<ConnectionSlot, ConnectionLimitError> {
        // The per-IP entry is held across the global check so the two counters
        // move together.
        let entry = self.ip_connections.entry(ip);
        let current = match &entry {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(_) => 0,
        };
        if current >= self.config.max_connections_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        let max = self.config.max_websocket_connections;
        let acquired = self
            .ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match max {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            });
        if acquired.is_err() {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        match entry {
            Entry::Occupied(mut e) => *e.get_mut() += 1,
            Entry::Vacant(e) => {
                e.insert(1);
            }
        }
        Ok(ConnectionSlot(Arc::new(SlotLease {
            state: Arc::clone(self),
            ip,
        })))
    }

    fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if let Entry::Occupied(mut e) = self.ip_connections.entry(ip) {
            if *e.get() <= 1 {
                e.remove();
            } else {
                *e.get_mut() -= 1;
            }
        }
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|c| *c).unwrap_or(0)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("address", &self.config.address())
            .field("ws_connections", &self.ws_connection_count())
            .field("pairs", &self.registry.len())
            .finish()
    }
}
