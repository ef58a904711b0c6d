//! OpenAI Realtime API module.
//!
//! Speech-to-speech sessions over OpenAI's WebSocket Realtime API.
//!
//! # Audio Format
//!
//! `pcm16` is 16-bit signed little-endian at 24kHz. G.711 u-law runs at
//! 8kHz and lets telephony audio pass through without transcoding.

mod client;
mod config;
mod messages;

pub use client::OpenAIRealtime;
pub use config::{
    DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_VOICE, OPENAI_REALTIME_SAMPLE_RATE,
    OPENAI_REALTIME_URL, SessionAudioFormat,
};
pub use messages::{ClientEvent, ServerEvent, SessionConfig, TurnDetection};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_url() {
        assert_eq!(OPENAI_REALTIME_URL, "wss://api.openai.com/v1/realtime");
    }

    #[test]
    fn test_sample_rate() {
        assert_eq!(OPENAI_REALTIME_SAMPLE_RATE, 24000);
    }
}
