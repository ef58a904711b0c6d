//! Admission control for media-stream upgrades.
//!
//! Every telephony leg holds one WebSocket for the length of its call, so the
//! number of live legs is capped globally and per source address. An admitted
//! upgrade carries its [`ConnectionSlot`] in the request extensions; the
//! handler moves it into the socket task and the slot is released when that
//! task ends. If the upgrade is refused further in, the request drops and
//! takes the slot with it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::state::{AppState, ConnectionLimitError};

/// Admit or refuse a media-stream upgrade. Plain HTTP requests pass through
/// untouched; they never hold a slot.
pub async fn media_stream_admission(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    match state.try_acquire_connection(peer.ip()) {
        Ok(slot) => {
            request.extensions_mut().insert(slot);
            next.run(request).await
        }
        Err(refusal) => {
            warn!(
                ip = %peer.ip(),
                live_streams = state.ws_connection_count(),
                "Refusing media stream: {}",
                refusal
            );
            refusal.into_response()
        }
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

impl IntoResponse for ConnectionLimitError {
    fn into_response(self) -> Response {
        let status = match self {
            ConnectionLimitError::GlobalLimitReached => StatusCode::SERVICE_UNAVAILABLE,
            ConnectionLimitError::PerIpLimitReached => StatusCode::TOO_MANY_REQUESTS,
        };
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use axum::http::HeaderValue;

    use crate::bridge::{PairingRegistry, RealtimeSessionFactory};
    use crate::config::ServerConfig;
    use crate::core::realtime::RealtimeConfig;
    use crate::core::telephony::TelephonyEncoding;

    fn bridge_state(max_streams: Option<usize>, per_ip: u32) -> Arc<AppState> {
        let config = ServerConfig {
            host: "localhost".to_string(),
            port: 3001,
            openai_api_key: None,
            realtime_model: "gpt-4o-realtime-preview".to_string(),
            realtime_voice: "alloy".to_string(),
            realtime_connect_timeout_seconds: 10,
            realtime_manual_turns: false,
            telephony_encoding: TelephonyEncoding::Mulaw8000,
            playback_allowance_ms: 50,
            assistant_instructions: None,
            language_a: "English".to_string(),
            language_b: "Spanish".to_string(),
            translator_instructions: None,
            pair_attach_timeout_seconds: 30,
            idle_timeout_seconds: 300,
            max_websocket_connections: max_streams,
            max_connections_per_ip: per_ip,
        };
        let factory = Arc::new(RealtimeSessionFactory::new(
            "openai",
            RealtimeConfig::default(),
            TelephonyEncoding::Mulaw8000,
        ));
        let registry = Arc::new(PairingRegistry::new(factory, config.bridge_settings()));
        AppState::new(config, registry)
    }

    fn carrier(last_octet: u8) -> IpAddr {
        Ipv4Addr::new(203, 0, 113, last_octet).into()
    }

    #[test]
    fn test_upgrade_header_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!is_websocket_upgrade(&headers));
    }

    #[test]
    fn test_refusal_status_codes() {
        assert_eq!(
            ConnectionLimitError::GlobalLimitReached.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ConnectionLimitError::PerIpLimitReached.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_slot_released_on_drop() {
        let state = bridge_state(Some(10), 2);
        let ip = carrier(7);

        let first = state.try_acquire_connection(ip).unwrap();
        let second = state.try_acquire_connection(ip).unwrap();
        assert_eq!(first.ip(), ip);
        assert_eq!(state.ip_connection_count(&ip), 2);
        assert_eq!(
            state.try_acquire_connection(ip).unwrap_err(),
            ConnectionLimitError::PerIpLimitReached
        );

        drop(first);
        assert_eq!(state.ws_connection_count(), 1);
        assert_eq!(state.ip_connection_count(&ip), 1);
        drop(second);
        assert_eq!(state.ws_connection_count(), 0);
        assert_eq!(state.ip_connection_count(&ip), 0);
    }

    #[test]
    fn test_cloned_slot_releases_once() {
        let state = bridge_state(Some(10), 5);
        let ip = carrier(8);
        let _other = state.try_acquire_connection(ip).unwrap();

        let slot = state.try_acquire_connection(ip).unwrap();
        let in_handler = slot.clone();
        drop(slot);
        assert_eq!(state.ws_connection_count(), 2);
        drop(in_handler);
        assert_eq!(state.ws_connection_count(), 1);
        assert_eq!(state.ip_connection_count(&ip), 1);
    }

    #[test]
    fn test_global_cap_spans_addresses() {
        let state = bridge_state(Some(3), 10);
        let mut slots: Vec<_> = (1..=3)
            .map(|n| state.try_acquire_connection(carrier(n)).unwrap())
            .collect();

        assert_eq!(
            state.try_acquire_connection(carrier(4)).unwrap_err(),
            ConnectionLimitError::GlobalLimitReached
        );
        // A refused address is not counted
        assert_eq!(state.ip_connection_count(&carrier(4)), 0);

        slots.pop();
        assert!(state.try_acquire_connection(carrier(4)).is_ok());
    }
}
