//! Upstream failure notifications for an external alerting collaborator.

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::role::Direction;

/// Capacity of the alert broadcast channel.
pub const ALERT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The session client could not be created
    SessionCreateFailed,
    /// Connecting to the AI service failed or timed out
    ConnectFailed,
    /// The AI service reported an error mid-call
    ProviderError,
    /// The upstream connection closed while the pair was live
    SessionClosed,
}

/// One upstream failure, scoped to a pair and direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeAlert {
    pub pairing_key: String,
    pub direction: Direction,
    pub kind: AlertKind,
    pub message: String,
}

/// Log every alert until the channel closes. A subscriber that falls behind
/// skips the overwritten alerts and keeps going. Returns how many were logged.
pub async fn log_alerts(mut alerts: broadcast::Receiver<BridgeAlert>) -> usize {
    let mut logged = 0;
    loop {
        match alerts.recv().await {
            Ok(alert) => {
                warn!(
                    pairing_key = %alert.pairing_key,
                    direction = %alert.direction,
                    kind = ?alert.kind,
                    "Bridge alert: {}",
                    alert.message
                );
                logged += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Alert logger fell behind; alerts dropped");
            }
            Err(RecvError::Closed) => return logged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(n: usize) -> BridgeAlert {
        BridgeAlert {
            pairing_key: format!("call-{n}"),
            direction: Direction::AtoB,
            kind: AlertKind::ProviderError,
            message: "rate limit exceeded".to_string(),
        }
    }

    #[tokio::test]
    async fn test_logger_survives_lag() {
        let (tx, rx) = broadcast::channel(2);
        for n in 0..5 {
            tx.send(alert(n)).unwrap();
        }
        drop(tx);

        // Three alerts were overwritten; the two still buffered are logged
        assert_eq!(log_alerts(rx).await, 2);
    }

    #[tokio::test]
    async fn test_logger_ends_when_channel_closes() {
        let (tx, rx) = broadcast::channel(4);
        let logger = tokio::spawn(log_alerts(rx));
        tx.send(alert(1)).unwrap();
        drop(tx);
        assert_eq!(logger.await.unwrap(), 1);
    }
}
