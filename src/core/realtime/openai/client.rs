//! OpenAI Realtime API client implementation.
//!
//! This module provides the OpenAI Realtime client that implements the `BaseRealtime` trait
//! using OpenAI's WebSocket-based Realtime API.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: `pcm16` (24kHz) or G.711 (8kHz), base64 encoded
//!
//! The connection is not re-established after it drops. A lost upstream
//! connection is reported as [`RealtimeEvent::Error`] followed by
//! [`RealtimeEvent::Closed`] and the owner decides what happens next.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use super::config::{
    DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_VOICE, OPENAI_REALTIME_URL, SessionAudioFormat,
};
use super::messages::{ClientEvent, InputAudioTranscription, ServerEvent, SessionConfig, TurnDetection};
use crate::core::realtime::base::{
    BaseRealtime, ConnectionState, RealtimeAudioData, RealtimeConfig, RealtimeError,
    RealtimeEvent, RealtimeEventCallback, RealtimeResult, SpeechEvent, TranscriptRole,
    TurnDetectionConfig,
};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// OpenAI Realtime Client
// =============================================================================

/// OpenAI Realtime API client implementation.
///
/// # Thread Safety
///
/// Mutable state lives behind `Arc` so the spawned WebSocket task and the
/// owning struct see the same values. The `connected` flag is an
/// `Arc<AtomicBool>` for lock-free status checks on the audio path.
pub struct OpenAIRealtime {
    /// Configuration
    config: RealtimeConfig,
    /// Model id sent in the connect URL
    model: String,
    /// Voice sent in `session.update`
    voice: String,
    /// Format of audio sent to the provider
    input_format: SessionAudioFormat,
    /// Format of audio received from the provider
    output_format: SessionAudioFormat,
    /// WebSocket endpoint without query string
    endpoint: String,
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,
    /// Connected flag for fast checks (shared with connection task)
    connected: Arc<AtomicBool>,
    /// Session ID
    session_id: Arc<RwLock<Option<String>>>,
    /// WebSocket sender channel
    ws_sender: Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,
    /// Event callback
    event_callback: Arc<Mutex<Option<RealtimeEventCallback>>>,
    /// Connection task handle
    connection_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Set by `disconnect` so the connection task ends quietly
    intentional_disconnect: Arc<AtomicBool>,
}

impl OpenAIRealtime {
    /// Point the client at a different WebSocket endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Get the configured input audio format.
    pub fn input_format(&self) -> SessionAudioFormat {
        self.input_format
    }

    /// Get the configured output audio format.
    pub fn output_format(&self) -> SessionAudioFormat {
        self.output_format
    }

    /// Get the session ID if connected.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Build the WebSocket URL with model parameter.
    fn build_ws_url(&self) -> String {
        format!("{}?model={}", self.endpoint, self.model)
    }

    /// Build the initial session configuration.
    fn build_session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            voice: Some(self.voice.clone()),
            instructions: self.config.instructions.clone(),
            input_audio_format: Some(self.input_format.as_str().to_string()),
            output_audio_format: Some(self.output_format.as_str().to_string()),
            input_audio_transcription: self
                .config
                .transcription_model
                .as_ref()
                .map(|model| InputAudioTranscription {
                    model: model.clone(),
                }),
            turn_detection: self.config.turn_detection.as_ref().map(|td| match td {
                TurnDetectionConfig::ServerVad {
                    threshold,
                    prefix_padding_ms,
                    silence_duration_ms,
                    create_response,
                    interrupt_response,
                } => Some(TurnDetection {
                    threshold: *threshold,
                    prefix_padding_ms: *prefix_padding_ms,
                    silence_duration_ms: *silence_duration_ms,
                    create_response: *create_response,
                    interrupt_response: *interrupt_response,
                }),
                TurnDetectionConfig::None => None,
            }),
            temperature: self.config.temperature,
        }
    }

    /// Translate a server event into zero or one [`RealtimeEvent`] and deliver it.
    async fn handle_server_event(
        event: ServerEvent,
        event_cb: &Arc<Mutex<Option<RealtimeEventCallback>>>,
        session_id: &Arc<RwLock<Option<String>>>,
    ) {
        let translated = match event {
            ServerEvent::SessionCreated { session } => {
                tracing::info!("OpenAI Realtime session created: {}", session.id);
                *session_id.write().await = Some(session.id);
                None
            }

            ServerEvent::SessionUpdated { session } => {
                tracing::debug!(
                    session_id = %session.id,
                    input = ?session.input_audio_format,
                    output = ?session.output_audio_format,
                    "OpenAI Realtime session updated"
                );
                None
            }

            ServerEvent::Error { error } => {
                tracing::error!(
                    "OpenAI Realtime error: {} - {}",
                    error.error_type,
                    error.message
                );
                Some(RealtimeEvent::Error(RealtimeError::ProviderError(format!(
                    "{}: {}",
                    error.error_type, error.message
                ))))
            }

            ServerEvent::SpeechStarted {
                audio_start_ms,
                item_id,
            } => {
                tracing::debug!("Speech started at {}ms", audio_start_ms);
                Some(RealtimeEvent::Speech(SpeechEvent::Started {
                    audio_start_ms,
                    item_id: Some(item_id),
                }))
            }

            ServerEvent::SpeechStopped {
                audio_end_ms,
                item_id,
            } => {
                tracing::debug!("Speech stopped at {}ms", audio_end_ms);
                Some(RealtimeEvent::Speech(SpeechEvent::Stopped {
                    audio_end_ms,
                    item_id: Some(item_id),
                }))
            }

            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                tracing::debug!("User transcript: {}", transcript);
                Some(RealtimeEvent::Transcript {
                    text: transcript,
                    role: TranscriptRole::User,
                })
            }

            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                tracing::debug!("Assistant transcript: {}", transcript);
                Some(RealtimeEvent::Transcript {
                    text: transcript,
                    role: TranscriptRole::Assistant,
                })
            }

            ServerEvent::AudioDelta {
                delta,
                item_id,
                response_id,
            } => match ServerEvent::decode_audio_delta(&delta) {
                Ok(audio_bytes) => Some(RealtimeEvent::AudioDelta(RealtimeAudioData {
                    data: Bytes::from(audio_bytes),
                    item_id,
                    response_id,
                })),
                Err(e) => {
                    tracing::error!("Failed to decode audio delta: {}", e);
                    None
                }
            },

            ServerEvent::AudioDone { item_id, .. } => Some(RealtimeEvent::AudioDone { item_id }),

            ServerEvent::ConversationItemTruncated {
                item_id,
                audio_end_ms,
            } => {
                tracing::debug!("Item {} truncated at {}ms", item_id, audio_end_ms);
                None
            }

            ServerEvent::ResponseDone { response } => {
                tracing::debug!(
                    "Response done: {} ({})",
                    response.id,
                    response.status.as_deref().unwrap_or("unknown")
                );
                Some(RealtimeEvent::ResponseDone {
                    response_id: response.id,
                })
            }

            ServerEvent::Other => {
                tracing::trace!("Unhandled server event");
                None
            }
        };

        if let Some(event) = translated {
            Self::emit(event_cb, event).await;
        }
    }

    async fn emit(event_cb: &Arc<Mutex<Option<RealtimeEventCallback>>>, event: RealtimeEvent) {
        let cb = event_cb.lock().await.clone();
        if let Some(cb) = cb {
            cb(event).await;
        }
    }

    /// Send an event to the WebSocket.
    async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        if let Some(sender) = self.ws_sender.lock().await.as_ref() {
            sender
                .send(event)
                .await
                .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;
            Ok(())
        } else {
            Err(RealtimeError::NotConnected)
        }
    }
}

fn parse_format(name: &str) -> RealtimeResult<SessionAudioFormat> {
    SessionAudioFormat::parse(name).ok_or_else(|| {
        RealtimeError::InvalidConfiguration(format!("unsupported audio format {name:?}"))
    })
}

#[async_trait]
impl BaseRealtime for OpenAIRealtime {
    fn new(config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let model = match config.model.trim() {
            "" => DEFAULT_REALTIME_MODEL.to_string(),
            model => model.to_string(),
        };

        let voice = config
            .voice
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_REALTIME_VOICE)
            .to_string();

        let input_format = match config.input_audio_format.as_deref() {
            Some(name) => parse_format(name)?,
            None => SessionAudioFormat::default(),
        };

        // Output follows input unless set explicitly
        let output_format = match config.output_audio_format.as_deref() {
            Some(name) => parse_format(name)?,
            None => input_format,
        };

        Ok(Self {
            config,
            model,
            voice,
            input_format,
            output_format,
            endpoint: OPENAI_REALTIME_URL.to_string(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connected: Arc::new(AtomicBool::new(false)),
            session_id: Arc::new(RwLock::new(None)),
            ws_sender: Arc::new(Mutex::new(None)),
            event_callback: Arc::new(Mutex::new(None)),
            connection_handle: Arc::new(Mutex::new(None)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn connect(&mut self) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);
        *self.state.write().await = ConnectionState::Connecting;

        let url = self.build_ws_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let ws_stream = match tokio_tungstenite::connect_async(request).await {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Failed;
                return Err(RealtimeError::ConnectionFailed(e.to_string()));
            }
        };

        tracing::info!(model = %self.model, "Connected to OpenAI Realtime API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock().await = Some(tx);

        let event_cb = self.event_callback.clone();
        let session_id = self.session_id.clone();
        let state = self.state.clone();
        let ws_sender = self.ws_sender.clone();
        let connected = self.connected.clone();
        let intentional_disconnect = self.intentional_disconnect.clone();

        self.connected.store(true, Ordering::SeqCst);
        *self.state.write().await = ConnectionState::Connected;

        let handle = tokio::spawn(async move {
            let mut failure: Option<String> = None;

            loop {
                tokio::select! {
                    outgoing = rx.recv() => {
                        let Some(event) = outgoing else {
                            break;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            failure = Some(e.to_string());
                            break;
                        }
                    }

                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        Self::handle_server_event(event, &event_cb, &session_id).await;
                                    }
                                    Err(e) => {
                                        tracing::warn!("Failed to parse server event: {} - {}", e, text);
                                    }
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                tracing::info!("WebSocket closed by server: {:?}", frame);
                                failure = Some("closed by server".to_string());
                                break;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                failure = Some(e.to_string());
                                break;
                            }
                            None => {
                                failure = Some("stream ended".to_string());
                                break;
                            }
                        }
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            *ws_sender.lock().await = None;

            if intentional_disconnect.load(Ordering::SeqCst) {
                *state.write().await = ConnectionState::Disconnected;
            } else {
                *state.write().await = ConnectionState::Failed;
                let reason = failure.unwrap_or_else(|| "connection lost".to_string());
                Self::emit(
                    &event_cb,
                    RealtimeEvent::Error(RealtimeError::ConnectionFailed(reason)),
                )
                .await;
                Self::emit(&event_cb, RealtimeEvent::Closed).await;
            }

            tracing::info!("OpenAI Realtime connection task ended");
        });

        *self.connection_handle.lock().await = Some(handle);

        let session = self.build_session_config();
        self.send_event(ClientEvent::SessionUpdate { session }).await
    }

    async fn disconnect(&mut self) -> RealtimeResult<()> {
        self.intentional_disconnect.store(true, Ordering::SeqCst);

        *self.ws_sender.lock().await = None;

        if let Some(handle) = self.connection_handle.lock().await.take() {
            handle.abort();
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.state.write().await = ConnectionState::Disconnected;
        *self.session_id.write().await = None;

        tracing::info!("Disconnected from OpenAI Realtime API");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn get_connection_state(&self) -> ConnectionState {
        // The task may be mid-update; the atomic is authoritative for "connected".
        if self.connected.load(Ordering::SeqCst) {
            return ConnectionState::Connected;
        }
        match self.state.try_read() {
            Ok(state) if *state != ConnectionState::Connected => *state,
            _ => ConnectionState::Disconnected,
        }
    }

    async fn send_audio(&mut self, audio_data: Bytes) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }

        // Audio never waits for queue space; a stalled socket drops frames
        let guard = self.ws_sender.lock().await;
        let Some(sender) = guard.as_ref() else {
            return Err(RealtimeError::NotConnected);
        };
        sender
            .try_send(ClientEvent::audio_append(&audio_data))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RealtimeError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => RealtimeError::NotConnected,
            })
    }

    async fn create_response(&mut self) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }

        self.send_event(ClientEvent::ResponseCreate).await
    }

    async fn cancel_response(&mut self) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }

        self.send_event(ClientEvent::ResponseCancel).await
    }

    async fn truncate_item(&mut self, item_id: &str, audio_end_ms: u32) -> RealtimeResult<()> {
        if !self.is_ready() {
            return Err(RealtimeError::NotConnected);
        }

        self.send_event(ClientEvent::truncate(item_id, audio_end_ms))
            .await
    }

    fn on_event(&mut self, callback: RealtimeEventCallback) -> RealtimeResult<()> {
        // Register synchronously when possible so no early event is missed
        if let Ok(mut guard) = self.event_callback.try_lock() {
            *guard = Some(callback);
        } else {
            let cb = self.event_callback.clone();
            tokio::spawn(async move {
                *cb.lock().await = Some(callback);
            });
        }
        Ok(())
    }

    fn get_provider_info(&self) -> serde_json::Value {
        serde_json::json!({
            "provider": "openai",
            "api_type": "WebSocket Realtime",
            "endpoint": self.endpoint,
            "model": self.model,
            "voice": self.voice,
            "input_audio_format": self.input_format.as_str(),
            "output_audio_format": self.output_format.as_str(),
            "supported_audio_formats": ["pcm16", "g711_ulaw"],
            "features": {
                "bidirectional_audio": true,
                "vad": true,
                "truncation": true,
                "transcription": self.config.transcription_model.is_some()
            }
        })
    }
}

impl Drop for OpenAIRealtime {
    fn drop(&mut self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.connection_handle.try_lock()
            && let Some(handle) = guard.take()
        {
            handle.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
