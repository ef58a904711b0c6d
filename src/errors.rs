//! Bridge error types
//!
//! Pairing and protocol failures raised while binding a telephony leg to its
//! AI session(s). Upstream AI and codec failures are wrapped so callers can
//! handle one error type at the connection boundary.

use thiserror::Error;

use crate::core::realtime::RealtimeError;
use crate::core::telephony::{CodecError, TelephonyValidationError};

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error type for the bridge layer
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    // ─────────────────────────────────────────────────────────────────────────────
    // Pairing Errors
    // ─────────────────────────────────────────────────────────────────────────────

    /// Pairing key empty or malformed
    #[error("Invalid pairing key: {0:?}")]
    InvalidPairingKey(String),

    /// Role not one of `a`, `b`, `solo`
    #[error("Invalid role: {0:?}")]
    InvalidRole(String),

    /// Start event carried a pairing key without a role, or a role without a key
    #[error("Missing pairing metadata: {0}")]
    MissingPairingMetadata(String),

    // ─────────────────────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────────────────────

    /// Audio payload could not be decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Inbound message failed size validation
    #[error(transparent)]
    Validation(#[from] TelephonyValidationError),

    // ─────────────────────────────────────────────────────────────────────────────
    // Upstream / Transport Errors
    // ─────────────────────────────────────────────────────────────────────────────

    /// AI session failure
    #[error("Realtime session error: {0}")]
    Realtime(#[from] RealtimeError),

    /// The connection's sender task has gone away
    #[error("Outbound channel closed for stream {0}")]
    ChannelClosed(String),
}

impl BridgeError {
    /// Pairing errors end the connection; everything else is isolated.
    pub fn is_pairing_error(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidPairingKey(_)
                | BridgeError::InvalidRole(_)
                | BridgeError::MissingPairingMetadata(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairing_error_classification() {
        assert!(BridgeError::InvalidPairingKey(String::new()).is_pairing_error());
        assert!(BridgeError::InvalidRole("c".into()).is_pairing_error());
        assert!(BridgeError::MissingPairingMetadata("role".into()).is_pairing_error());
        assert!(!BridgeError::ChannelClosed("MZ1".into()).is_pairing_error());
        assert!(!BridgeError::Realtime(RealtimeError::NotConnected).is_pairing_error());
    }

    #[test]
    fn test_from_conversions() {
        let err: BridgeError = CodecError::InvalidPayload("bad".into()).into();
        assert!(matches!(err, BridgeError::Codec(_)));
        assert!(err.to_string().contains("Invalid base64 payload"));

        let err: BridgeError = RealtimeError::Timeout("connect".into()).into();
        assert!(err.to_string().contains("Realtime session error"));
    }
}
