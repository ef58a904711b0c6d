//! Scripted speech-to-speech provider for bridge tests
//!
//! [`MockFactory`] hands out [`MockRealtime`] clients and keeps a
//! [`MockSessionProbe`] per client, so a test can:
//! - inspect what the bridge sent upstream (audio, truncates, responses)
//! - count connects and disconnects
//! - push provider events into the bridge as if they came off the wire

// Not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use waav_bridge::bridge::{BridgeSettings, Direction, PairingRegistry, SessionFactory, SessionProfile};
use waav_bridge::core::realtime::{
    BaseRealtime, BoxedRealtime, ConnectionState, RealtimeAudioData, RealtimeConfig, RealtimeError,
    RealtimeEvent, RealtimeEventCallback, RealtimeResult, SpeechEvent,
};
use waav_bridge::core::telephony::{MediaStreamRoute, TelephonyOutgoingMessage};

/// How long helpers wait for something asynchronous to show up
pub const WAIT: Duration = Duration::from_secs(2);

/// How a mock client reacts to `connect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    Fail,
    Hang,
}

// =============================================================================
// Probe
// =============================================================================

/// Everything observable about one mock session.
pub struct MockSessionProbe {
    pub profile: SessionProfile,
    audio: Mutex<Vec<Bytes>>,
    truncates: Mutex<Vec<(String, u32)>>,
    responses: AtomicUsize,
    cancels: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    callback: Mutex<Option<RealtimeEventCallback>>,
}

impl MockSessionProbe {
    fn new(profile: SessionProfile) -> Self {
        Self {
            profile,
            audio: Mutex::new(Vec::new()),
            truncates: Mutex::new(Vec::new()),
            responses: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            callback: Mutex::new(None),
        }
    }

    pub fn direction(&self) -> Direction {
        self.profile.direction
    }

    /// All audio received, concatenated.
    pub fn audio(&self) -> Vec<u8> {
        self.audio.lock().iter().flat_map(|b| b.iter().copied()).collect()
    }

    pub fn audio_frames(&self) -> usize {
        self.audio.lock().len()
    }

    pub fn truncates(&self) -> Vec<(String, u32)> {
        self.truncates.lock().clone()
    }

    pub fn responses(&self) -> usize {
        self.responses.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Deliver `event` through the registered callback.
    pub async fn emit(&self, event: RealtimeEvent) {
        let callback = self.callback.lock().clone();
        match callback {
            Some(callback) => callback(event).await,
            None => panic!("no event callback registered for {}", self.direction()),
        }
    }

    pub async fn emit_audio(&self, item_id: &str, data: Vec<u8>) {
        self.emit(RealtimeEvent::AudioDelta(RealtimeAudioData {
            data: Bytes::from(data),
            item_id: item_id.to_string(),
            response_id: Some("resp_1".to_string()),
        }))
        .await;
    }

    pub async fn emit_speech_started(&self) {
        self.emit(RealtimeEvent::Speech(SpeechEvent::Started {
            audio_start_ms: 0,
            item_id: None,
        }))
        .await;
    }

    pub async fn emit_speech_stopped(&self) {
        self.emit(RealtimeEvent::Speech(SpeechEvent::Stopped {
            audio_end_ms: 500,
            item_id: None,
        }))
        .await;
    }
}

// =============================================================================
// Client
// =============================================================================

pub struct MockRealtime {
    probe: Arc<MockSessionProbe>,
    behavior: ConnectBehavior,
    state: ConnectionState,
}

#[async_trait]
impl BaseRealtime for MockRealtime {
    fn new(_config: RealtimeConfig) -> RealtimeResult<Self> {
        let profile = BridgeSettings::default().profile(Direction::Solo);
        Ok(Self {
            probe: Arc::new(MockSessionProbe::new(profile)),
            behavior: ConnectBehavior::Succeed,
            state: ConnectionState::Disconnected,
        })
    }

    async fn connect(&mut self) -> RealtimeResult<()> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ConnectBehavior::Succeed => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            ConnectBehavior::Fail => {
                self.state = ConnectionState::Failed;
                Err(RealtimeError::AuthenticationFailed("invalid api key".to_string()))
            }
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }

    async fn disconnect(&mut self) -> RealtimeResult<()> {
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn get_connection_state(&self) -> ConnectionState {
        self.state
    }

    async fn send_audio(&mut self, audio_data: Bytes) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }
        self.probe.audio.lock().push(audio_data);
        Ok(())
    }

    async fn create_response(&mut self) -> RealtimeResult<()> {
        self.probe.responses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel_response(&mut self) -> RealtimeResult<()> {
        self.probe.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn truncate_item(&mut self, item_id: &str, audio_end_ms: u32) -> RealtimeResult<()> {
        self.probe
            .truncates
            .lock()
            .push((item_id.to_string(), audio_end_ms));
        Ok(())
    }

    fn on_event(&mut self, callback: RealtimeEventCallback) -> RealtimeResult<()> {
        *self.probe.callback.lock() = Some(callback);
        Ok(())
    }

    fn get_provider_info(&self) -> serde_json::Value {
        json!({
            "provider": "mock",
            "direction": self.probe.direction().as_str(),
        })
    }
}

// =============================================================================
// Factory
// =============================================================================

pub struct MockFactory {
    behavior: Mutex<ConnectBehavior>,
    fail_next_create: Mutex<Option<Direction>>,
    probes: Mutex<Vec<Arc<MockSessionProbe>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Self::with_connect(ConnectBehavior::Succeed)
    }

    pub fn with_connect(behavior: ConnectBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            fail_next_create: Mutex::new(None),
            probes: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connect(&self, behavior: ConnectBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Make the next session created for `direction` fail.
    pub fn fail_next_create(&self, direction: Direction) {
        *self.fail_next_create.lock() = Some(direction);
    }

    pub fn created(&self, direction: Direction) -> usize {
        self.probes
            .lock()
            .iter()
            .filter(|p| p.direction() == direction)
            .count()
    }

    /// Most recent probe for `direction`.
    pub fn probe(&self, direction: Direction) -> Arc<MockSessionProbe> {
        self.probes
            .lock()
            .iter()
            .rev()
            .find(|p| p.direction() == direction)
            .cloned()
            .unwrap_or_else(|| panic!("no session created for {direction}"))
    }
}

impl SessionFactory for MockFactory {
    fn create(&self, profile: &SessionProfile) -> RealtimeResult<BoxedRealtime> {
        {
            let mut fail = self.fail_next_create.lock();
            if *fail == Some(profile.direction) {
                *fail = None;
                return Err(RealtimeError::InvalidConfiguration(
                    "scripted create failure".to_string(),
                ));
            }
        }

        let probe = Arc::new(MockSessionProbe::new(profile.clone()));
        self.probes.lock().push(Arc::clone(&probe));
        Ok(Box::new(MockRealtime {
            probe,
            behavior: *self.behavior.lock(),
            state: ConnectionState::Disconnected,
        }))
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub fn registry(factory: &Arc<MockFactory>, settings: BridgeSettings) -> Arc<PairingRegistry> {
    Arc::new(PairingRegistry::new(factory.clone(), settings))
}

pub fn start_json(key: Option<&str>, role: Option<&str>, stream_sid: &str) -> String {
    json!({
        "event": "start",
        "sequenceNumber": "1",
        "start": {
            "streamSid": stream_sid,
            "callSid": format!("CA-{stream_sid}"),
            "customParameters": {
                "pairingKey": key,
                "role": role,
            },
            "mediaFormat": {
                "encoding": "audio/x-mulaw",
                "sampleRate": 8000,
                "channels": 1,
            },
        },
        "streamSid": stream_sid,
    })
    .to_string()
}

pub fn media_json(audio: &[u8]) -> String {
    use base64::prelude::*;
    json!({
        "event": "media",
        "sequenceNumber": "2",
        "media": {
            "payload": BASE64_STANDARD.encode(audio),
            "chunk": "1",
            "timestamp": "20",
        },
    })
    .to_string()
}

pub fn mark_json(name: &str) -> String {
    json!({ "event": "mark", "mark": { "name": name } }).to_string()
}

pub fn stop_json() -> String {
    json!({ "event": "stop", "stop": { "reason": "hangup" } }).to_string()
}

/// Next message queued for the transport, or a panic after [`WAIT`].
pub async fn next_outgoing(rx: &mut mpsc::Receiver<MediaStreamRoute>) -> TelephonyOutgoingMessage {
    match tokio::time::timeout(WAIT, rx.recv()).await {
        Ok(Some(MediaStreamRoute::Outgoing(message))) => message,
        other => panic!("expected an outgoing message, got {other:?}"),
    }
}

/// Assert nothing is queued for the transport within a short grace period.
pub async fn assert_no_outgoing(rx: &mut mpsc::Receiver<MediaStreamRoute>) {
    if let Ok(message) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("expected no outgoing message, got {message:?}");
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
