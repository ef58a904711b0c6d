//! Telephony media-stream message types
//!
//! One canonical JSON contract for the telephony side of the bridge. Every
//! message is an object tagged by `"event"`; field names are camelCase.

use serde::{Deserialize, Serialize};

/// Maximum allowed size for a base64 media payload (64 KB)
pub const MAX_MEDIA_PAYLOAD_SIZE: usize = 64 * 1024;

/// Maximum allowed size for a mark name (256 bytes)
pub const MAX_MARK_NAME_SIZE: usize = 256;

// =============================================================================
// Incoming Messages (Telephony -> Bridge)
// =============================================================================

/// Incoming WebSocket messages from the telephony transport
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyIncomingMessage {
    /// Transport-level hello, sent before `start`
    Connected {
        /// Protocol name announced by the transport
        #[serde(default)]
        protocol: Option<String>,
    },

    /// Start of stream
    Start {
        /// Stream metadata
        start: StreamStart,
        /// Stream identifier (some transports repeat it at top level)
        #[serde(default, rename = "streamSid")]
        stream_sid: Option<String>,
    },

    /// Inbound audio frame
    Media {
        /// Audio payload
        media: MediaPayload,
        /// Transport sequence number; gaps are tolerated
        #[serde(default, rename = "sequenceNumber")]
        sequence_number: Option<SequenceNumber>,
    },

    /// Playback acknowledgement for a previously sent mark
    Mark {
        /// Mark body
        mark: MarkPayload,
    },

    /// Explicit end of stream
    Stop {
        /// Stop details, if any
        #[serde(default)]
        stop: Option<serde_json::Value>,
    },

    /// Keypad digit
    Dtmf {
        /// Digit body
        dtmf: DtmfPayload,
    },
}

impl TelephonyIncomingMessage {
    /// Short name of the event for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Start { .. } => "start",
            Self::Media { .. } => "media",
            Self::Mark { .. } => "mark",
            Self::Stop { .. } => "stop",
            Self::Dtmf { .. } => "dtmf",
        }
    }

    /// Validates field sizes before the message is acted on.
    pub fn validate_size(&self) -> Result<(), TelephonyValidationError> {
        match self {
            Self::Media { media, .. } => {
                let size = media.payload.len();
                if size > MAX_MEDIA_PAYLOAD_SIZE {
                    return Err(TelephonyValidationError::PayloadTooLarge {
                        size,
                        max: MAX_MEDIA_PAYLOAD_SIZE,
                    });
                }
            }
            Self::Mark { mark } => {
                let size = mark.name.len();
                if size > MAX_MARK_NAME_SIZE {
                    return Err(TelephonyValidationError::MarkNameTooLarge {
                        size,
                        max: MAX_MARK_NAME_SIZE,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Start-of-stream metadata
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    /// Stream identifier echoed on every outbound message
    #[serde(default)]
    pub stream_sid: Option<String>,
    /// Call identifier
    #[serde(default)]
    pub call_sid: Option<String>,
    /// Caller-supplied parameters
    #[serde(default)]
    pub custom_parameters: CustomParameters,
    /// Declared audio format
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

/// Caller-supplied stream parameters
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomParameters {
    /// Pairing key shared by both legs of a bridged call
    #[serde(default)]
    pub pairing_key: Option<String>,
    /// Leg role (`a`, `b` or `solo`)
    #[serde(default)]
    pub role: Option<String>,
}

/// Declared audio format of the stream
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    /// Encoding name, e.g. `audio/x-mulaw`
    pub encoding: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_channels() -> u16 {
    1
}

/// Audio frame body
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaPayload {
    /// Base64 audio
    pub payload: String,
    /// Chunk counter assigned by the transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<SequenceNumber>,
    /// Transport timestamp in ms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<SequenceNumber>,
}

/// Mark body
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarkPayload {
    /// Mark name
    pub name: String,
}

/// DTMF body
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DtmfPayload {
    /// Pressed digit
    pub digit: String,
}

/// Numeric field that transports send either as a number or as a string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SequenceNumber {
    /// JSON number
    Number(u64),
    /// Decimal string
    Text(String),
}

impl SequenceNumber {
    /// Numeric value, if the field holds one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.parse().ok(),
        }
    }
}

// =============================================================================
// Outgoing Messages (Bridge -> Telephony)
// =============================================================================

/// Outgoing WebSocket messages to the telephony transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutgoingMessage {
    /// Outbound audio frame
    Media {
        /// Stream identifier
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Audio body
        media: OutboundMedia,
    },

    /// Tracking mark, echoed back once everything before it has played
    Mark {
        /// Stream identifier
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Mark body
        mark: OutboundMark,
    },

    /// Discard buffered and playing audio
    Clear {
        /// Stream identifier
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// Outbound audio body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMedia {
    /// Base64 audio
    pub payload: String,
}

/// Outbound mark body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMark {
    /// Mark name
    pub name: String,
}

// =============================================================================
// Message Routing
// =============================================================================

/// Instructions for a connection's sender task
#[derive(Debug)]
pub enum MediaStreamRoute {
    /// JSON text message
    Outgoing(TelephonyOutgoingMessage),
    /// Close connection
    Close,
}

// =============================================================================
// Validation
// =============================================================================

/// Error type for message validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelephonyValidationError {
    /// Media payload exceeds maximum allowed size
    #[error("Media payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },
    /// Mark name exceeds maximum allowed size
    #[error("Mark name too large: {size} bytes (max: {max} bytes)")]
    MarkNameTooLarge { size: usize, max: usize },
}
