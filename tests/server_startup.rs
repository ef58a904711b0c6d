//! Server Startup Tests
//!
//! Router wiring, connection limits and a full media-stream call over a real
//! socket, with scripted AI sessions behind the bridge.

mod mock_providers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::MockConnectInfo;
use axum::{body::Body, http::Request, http::StatusCode};
use base64::prelude::*;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tower::util::ServiceExt;

use mock_providers::{MockFactory, WAIT, eventually, media_json, registry, start_json, stop_json};
use waav_bridge::bridge::{BridgeSettings, Direction};
use waav_bridge::core::telephony::{TelephonyEncoding, TelephonyOutgoingMessage};
use waav_bridge::{AppState, ServerConfig, routes};

/// Helper function to create a minimal test configuration
fn create_minimal_config(max_websocket_connections: Option<usize>, max_connections_per_ip: u32) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
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
        max_websocket_connections,
        max_connections_per_ip,
    }
}

fn create_state(factory: &Arc<MockFactory>, config: ServerConfig) -> Arc<AppState> {
    let registry = registry(factory, config.bridge_settings());
    AppState::new(config, registry)
}

fn upgrade_request() -> Request<Body> {
    Request::builder()
        .uri("/media-stream")
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap()
}

fn peer() -> MockConnectInfo<SocketAddr> {
    MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000)))
}

// =============================================================================
// Router
// =============================================================================

#[tokio::test]
async fn test_plain_get_is_not_upgraded() {
    let factory = MockFactory::new();
    let state = create_state(&factory, create_minimal_config(None, 100));
    let app = routes::create_app(Arc::clone(&state)).layer(peer());

    let request = Request::builder()
        .uri("/media-stream")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(response.status().is_client_error());
    // Non-upgrade requests never take a connection slot
    assert_eq!(state.ws_connection_count(), 0);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let factory = MockFactory::new();
    let state = create_state(&factory, create_minimal_config(None, 100));
    let app = routes::create_app(state).layer(peer());

    let request = Request::builder().uri("/speak").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_global_limit_rejects_upgrade() {
    let factory = MockFactory::new();
    let state = create_state(&factory, create_minimal_config(Some(0), 100));
    let app = routes::create_app(Arc::clone(&state)).layer(peer());

    let response = app.oneshot(upgrade_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(state.ws_connection_count(), 0);
}

#[tokio::test]
async fn test_per_ip_limit_rejects_upgrade() {
    let factory = MockFactory::new();
    let state = create_state(&factory, create_minimal_config(None, 0));
    let app = routes::create_app(state).layer(peer());

    let response = app.oneshot(upgrade_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_failed_upgrade_returns_its_slot() {
    let factory = MockFactory::new();
    let state = create_state(&factory, create_minimal_config(Some(1), 100));
    let app = routes::create_app(Arc::clone(&state)).layer(peer());

    // Admitted, but the in-process request has no connection to upgrade
    let response = app.clone().oneshot(upgrade_request()).await.unwrap();
    assert_ne!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_ne!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(state.ws_connection_count(), 0);

    // The single slot is free for the next caller
    let response = app.oneshot(upgrade_request()).await.unwrap();
    assert_ne!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(state.ws_connection_count(), 0);
}

// =============================================================================
// Full call over a socket
// =============================================================================

/// Serve the app on an ephemeral port.
async fn serve(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::create_app(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

#[tokio::test]
async fn test_solo_call_end_to_end() {
    let factory = MockFactory::new();
    let state = create_state(&factory, create_minimal_config(Some(10), 10));
    let addr = serve(Arc::clone(&state)).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/media-stream"))
        .await
        .expect("websocket connect");
    assert!(eventually(|| state.ws_connection_count() == 1).await);

    ws.send(Message::Text(start_json(None, None, "MZ-E2E").into()))
        .await
        .unwrap();
    assert!(eventually(|| factory.created(Direction::Solo) == 1).await);
    let assistant = factory.probe(Direction::Solo);
    assert!(eventually(|| assistant.connects() == 1).await);

    // Caller audio reaches the assistant once the session is up
    let mut delivered = false;
    for _ in 0..50 {
        ws.send(Message::Text(media_json(&[0x55; 160]).into()))
            .await
            .unwrap();
        if eventually(|| assistant.audio_frames() > 0).await {
            delivered = true;
            break;
        }
    }
    assert!(delivered);

    // Assistant audio comes back as media followed by a mark
    assistant.emit_audio("item_1", vec![0xAA; 160]).await;
    let mut received = Vec::new();
    while received.len() < 2 {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = frame {
            received.push(serde_json::from_str::<TelephonyOutgoingMessage>(text.as_str()).unwrap());
        }
    }
    match &received[0] {
        TelephonyOutgoingMessage::Media { stream_sid, media } => {
            assert_eq!(stream_sid, "MZ-E2E");
            assert_eq!(BASE64_STANDARD.decode(&media.payload).unwrap(), vec![0xAA; 160]);
        }
        other => panic!("expected media, got {other:?}"),
    }
    match &received[1] {
        TelephonyOutgoingMessage::Mark { mark, .. } => assert_eq!(mark.name, "item_1:1"),
        other => panic!("expected mark, got {other:?}"),
    }

    // Stop tears the session down and frees the connection slot
    ws.send(Message::Text(stop_json().into())).await.unwrap();
    assert!(eventually(|| assistant.disconnects() == 1).await);
    assert!(eventually(|| state.ws_connection_count() == 0).await);
}

#[tokio::test]
async fn test_superseded_connection_is_closed() {
    let factory = MockFactory::new();
    let state = create_state(&factory, create_minimal_config(None, 10));
    let addr = serve(Arc::clone(&state)).await;
    let url = format!("ws://{addr}/media-stream");

    let (mut first, _) = connect_async(url.as_str()).await.expect("first connect");
    first
        .send(Message::Text(start_json(Some("call-9"), Some("a"), "MZ-1").into()))
        .await
        .unwrap();
    assert!(eventually(|| state.registry.lookup("call-9").is_some()).await);

    let (mut second, _) = connect_async(url.as_str()).await.expect("second connect");
    second
        .send(Message::Text(start_json(Some("call-9"), Some("a"), "MZ-2").into()))
        .await
        .unwrap();

    // The first socket is closed by the server
    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    // The pair survives with the new leg
    tokio::time::sleep(Duration::from_millis(50)).await;
    let pair = state.registry.lookup("call-9").expect("pair kept");
    assert_eq!(
        pair.leg(waav_bridge::bridge::Role::A).map(|l| l.stream_sid().to_string()),
        Some("MZ-2".to_string())
    );
    assert_eq!(factory.probe(Direction::AtoB).disconnects(), 0);
}

#[tokio::test]
async fn test_bridge_settings_follow_config() {
    let mut config = create_minimal_config(None, 10);
    config.realtime_manual_turns = true;
    config.language_b = "French".to_string();
    let settings: BridgeSettings = config.bridge_settings();

    assert!(settings.manual_turns);
    assert_eq!(settings.encoding, TelephonyEncoding::Mulaw8000);
    assert!(settings.profile(Direction::AtoB).instructions.contains("French"));
}
