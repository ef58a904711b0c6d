//! OpenAI Realtime API WebSocket message types.
//!
//! Only the subset of the protocol the bridge drives is modelled here.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Update session configuration
//! - input_audio_buffer.append - Append audio to buffer
//! - conversation.item.truncate - Cut a generated item at the heard position
//! - response.create - Generate a response
//! - response.cancel - Cancel current response
//!
//! Server events (received from server):
//! - session.created / session.updated
//! - input_audio_buffer.speech_started / speech_stopped
//! - conversation.item.input_audio_transcription.completed
//! - response.audio.delta / response.audio.done
//! - response.audio_transcript.done
//! - conversation.item.truncated
//! - response.done
//! - error
//!
//! Anything else deserializes to [`ServerEvent::Other`] and is ignored.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration for OpenAI Realtime API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration. `Some(None)` disables turn detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<Option<TurnDetection>>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Server VAD turn detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "server_vad")]
pub struct TurnDetection {
    /// Activation threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    /// Audio prefix padding in ms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,
    /// Silence duration in ms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
    /// Whether to create response on turn end
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_response: Option<bool>,
    /// Whether to interrupt on speech
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt_response: Option<bool>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the OpenAI Realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Truncate a conversation item
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: u32,
        /// Audio end in ms
        audio_end_ms: u32,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate,

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Truncate the first content part of `item_id` at `audio_end_ms`.
    pub fn truncate(item_id: &str, audio_end_ms: u32) -> Self {
        ClientEvent::ConversationItemTruncate {
            item_id: item_id.to_string(),
            content_index: 0,
            audio_end_ms,
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the OpenAI Realtime API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        session: Session,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        session: Session,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        audio_start_ms: u64,
        /// Item ID
        item_id: String,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        audio_end_ms: u64,
        /// Item ID
        item_id: String,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        item_id: String,
        /// Transcript text
        transcript: String,
    },

    /// Conversation item truncated
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated {
        /// Item ID
        item_id: String,
        /// Audio end in ms
        audio_end_ms: u32,
    },

    /// Audio transcript done
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        /// Item ID
        item_id: String,
        /// Full transcript
        transcript: String,
    },

    /// Audio delta (audio data chunk)
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Response ID
        #[serde(default)]
        response_id: Option<String>,
        /// Item ID
        item_id: String,
        /// Base64-encoded audio delta
        delta: String,
    },

    /// Audio done
    #[serde(rename = "response.audio.done")]
    AudioDone {
        /// Response ID
        #[serde(default)]
        response_id: Option<String>,
        /// Item ID
        item_id: String,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        response: Response,
    },

    /// Any event type the bridge does not act on
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Decode base64 audio from an AudioDelta event.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    pub message: String,
    /// Event ID that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Session information.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    /// Session ID
    pub id: String,
    /// Model used
    #[serde(default)]
    pub model: Option<String>,
    /// Input audio format
    #[serde(default)]
    pub input_audio_format: Option<String>,
    /// Output audio format
    #[serde(default)]
    pub output_audio_format: Option<String>,
}

/// Response information.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Response ID
    pub id: String,
    /// Response status (completed, cancelled, incomplete, failed)
    #[serde(default)]
    pub status: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
