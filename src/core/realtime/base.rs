//! Base traits and types for speech-to-speech realtime providers.
//!
//! This module defines the contract the bridge relies on when it talks to an
//! AI session: a connect/close lifecycle, an audio input operation, a handful
//! of response-control operations (create, cancel, truncate) and a single
//! ordered event stream delivered through one callback.
//!
//! # Audio Format
//!
//! The audio format is negotiated once at connect time from
//! [`RealtimeConfig::input_audio_format`] / [`RealtimeConfig::output_audio_format`]
//! and stays fixed for the lifetime of the session.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Provider-specific error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Outbound queue full; the request was dropped
    #[error("Outbound queue full")]
    Backpressure,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Base configuration for realtime providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    #[serde(default)]
    pub model: String,

    /// Voice ID for audio output
    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions for the session
    #[serde(default)]
    pub instructions: Option<String>,

    /// Temperature for response generation
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Input audio format
    #[serde(default)]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(default)]
    pub output_audio_format: Option<String>,

    /// Turn detection configuration
    #[serde(default)]
    pub turn_detection: Option<TurnDetectionConfig>,

    /// Model used to transcribe caller audio (e.g., "whisper-1"). Caller
    /// transcripts are only produced when this is set.
    #[serde(default)]
    pub transcription_model: Option<String>,
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default)]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default)]
        silence_duration_ms: Option<u32>,
        /// Whether the provider creates a response on its own at end of turn
        #[serde(default)]
        create_response: Option<bool>,
        /// Interrupt model output on speech detection
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(true),
            interrupt_response: Some(true),
        }
    }
}

impl TurnDetectionConfig {
    /// Server VAD that reports turn boundaries but leaves response creation
    /// to the caller.
    pub fn manual_responses() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(false),
            interrupt_response: Some(true),
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state for realtime providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection failed
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Role of the speaker in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    /// Caller speech transcript
    User,
    /// Generated speech transcript
    Assistant,
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Audio chunk of a generated utterance.
#[derive(Debug, Clone)]
pub struct RealtimeAudioData {
    /// Raw audio bytes in the session's output format
    pub data: Bytes,
    /// Utterance (conversation item) this chunk belongs to
    pub item_id: String,
    /// Response ID from the provider
    pub response_id: Option<String>,
}

/// Speech events (VAD turn boundaries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// Caller started speaking
    Started {
        /// Audio timestamp in milliseconds
        audio_start_ms: u64,
        /// Item ID
        item_id: Option<String>,
    },
    /// Caller stopped speaking
    Stopped {
        /// Audio timestamp in milliseconds
        audio_end_ms: u64,
        /// Item ID
        item_id: Option<String>,
    },
}

/// Everything a realtime session reports back, in arrival order.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// Output audio chunk for an utterance
    AudioDelta(RealtimeAudioData),
    /// The provider finished generating audio for an utterance
    AudioDone {
        /// Utterance ID
        item_id: String,
    },
    /// Turn boundary signal
    Speech(SpeechEvent),
    /// Transcript of caller or generated speech
    Transcript {
        /// Transcribed text
        text: String,
        /// Who spoke
        role: TranscriptRole,
    },
    /// A response finished (completed, cancelled or truncated)
    ResponseDone {
        /// Response ID
        response_id: String,
    },
    /// Provider-reported or transport error
    Error(RealtimeError),
    /// The upstream connection closed
    Closed,
}

impl RealtimeEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeEvent::AudioDelta(_) => "audio_delta",
            RealtimeEvent::AudioDone { .. } => "audio_done",
            RealtimeEvent::Speech(SpeechEvent::Started { .. }) => "speech_started",
            RealtimeEvent::Speech(SpeechEvent::Stopped { .. }) => "speech_stopped",
            RealtimeEvent::Transcript { .. } => "transcript",
            RealtimeEvent::ResponseDone { .. } => "response_done",
            RealtimeEvent::Error(_) => "error",
            RealtimeEvent::Closed => "closed",
        }
    }
}

/// Callback type for realtime events.
pub type RealtimeEventCallback =
    Arc<dyn Fn(RealtimeEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Base Trait
// =============================================================================

/// Base trait for speech-to-speech realtime providers.
///
/// # Example
///
/// ```rust,ignore
/// use waav_bridge::core::realtime::{BaseRealtime, OpenAIRealtime, RealtimeConfig};
///
/// let mut realtime = OpenAIRealtime::new(RealtimeConfig {
///     api_key: "sk-...".to_string(),
///     input_audio_format: Some("g711_ulaw".to_string()),
///     output_audio_format: Some("g711_ulaw".to_string()),
///     ..Default::default()
/// })?;
///
/// realtime.on_event(Arc::new(|event| Box::pin(async move {
///     println!("{event:?}");
/// })))?;
///
/// realtime.connect().await?;
/// realtime.send_audio(audio_bytes).await?;
/// ```
#[async_trait]
pub trait BaseRealtime: Send + Sync {
    /// Create a new realtime provider instance.
    fn new(config: RealtimeConfig) -> RealtimeResult<Self>
    where
        Self: Sized;

    /// Connect to the realtime provider.
    async fn connect(&mut self) -> RealtimeResult<()>;

    /// Disconnect from the realtime provider.
    async fn disconnect(&mut self) -> RealtimeResult<()>;

    /// Check if the provider is connected and ready.
    fn is_ready(&self) -> bool;

    /// Get the current connection state.
    fn get_connection_state(&self) -> ConnectionState;

    /// Send caller audio in the session's input format.
    async fn send_audio(&mut self, audio_data: Bytes) -> RealtimeResult<()>;

    /// Request the model to generate a response.
    async fn create_response(&mut self) -> RealtimeResult<()>;

    /// Cancel the current response generation.
    async fn cancel_response(&mut self) -> RealtimeResult<()>;

    /// Truncate a generated utterance at the point the listener actually heard.
    async fn truncate_item(&mut self, item_id: &str, audio_end_ms: u32) -> RealtimeResult<()>;

    /// Register the event callback. Must be called before `connect`.
    fn on_event(&mut self, callback: RealtimeEventCallback) -> RealtimeResult<()>;

    /// Get provider information.
    fn get_provider_info(&self) -> serde_json::Value;
}

/// Boxed trait object for realtime providers.
pub type BoxedRealtime = Box<dyn BaseRealtime>;
