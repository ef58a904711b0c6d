//! Session parameters for the OpenAI Realtime API.
//!
//! Model and voice are passed to the API as configured. Only the audio format
//! is interpreted, since it decides whether telephony audio is resampled.

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Sample rate of the `pcm16` audio format.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// Model requested when none is configured.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// Voice requested when none is configured.
pub const DEFAULT_REALTIME_VOICE: &str = "alloy";

/// Audio encodings a bridged session exchanges with the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionAudioFormat {
    /// 16-bit little-endian PCM at 24 kHz
    #[default]
    Pcm16,
    /// G.711 mu-law at 8 kHz, identical to the telephony wire format
    G711Ulaw,
}

impl SessionAudioFormat {
    /// Name used in `session.update`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Pcm16 => OPENAI_REALTIME_SAMPLE_RATE,
            Self::G711Ulaw => 8000,
        }
    }

    /// Accepts the API names and the `mulaw`/`ulaw` shorthands.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm16" => Some(Self::Pcm16),
            "g711_ulaw" | "ulaw" | "mulaw" => Some(Self::G711Ulaw),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionAudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
