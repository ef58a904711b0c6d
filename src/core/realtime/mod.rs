//! Speech-to-speech realtime provider module.
//!
//! # Architecture
//!
//! - `BaseRealtime` trait for provider abstraction
//! - A factory function for creating a provider by name
//! - A single ordered event callback per session
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_bridge::core::realtime::{create_realtime_provider, RealtimeConfig};
//!
//! let config = RealtimeConfig {
//!     api_key: "sk-...".to_string(),
//!     model: "gpt-4o-realtime-preview".to_string(),
//!     ..Default::default()
//! };
//!
//! let mut provider = create_realtime_provider("openai", config)?;
//! provider.on_event(callback)?;
//! provider.connect().await?;
//! ```

mod base;
pub mod openai;

pub use base::{
    BaseRealtime, BoxedRealtime, ConnectionState, RealtimeAudioData, RealtimeConfig,
    RealtimeError, RealtimeEvent, RealtimeEventCallback, RealtimeResult, SpeechEvent,
    TranscriptRole, TurnDetectionConfig,
};
pub use openai::{
    DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_VOICE, OPENAI_REALTIME_SAMPLE_RATE,
    OPENAI_REALTIME_URL, OpenAIRealtime, SessionAudioFormat,
};

/// Supported realtime providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeProvider {
    /// OpenAI Realtime API
    OpenAI,
}

impl RealtimeProvider {
    /// Parse provider from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(RealtimeProvider::OpenAI),
            _ => None,
        }
    }
}

impl std::fmt::Display for RealtimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RealtimeProvider::OpenAI => write!(f, "openai"),
        }
    }
}

/// Factory function to create a realtime provider.
///
/// # Supported Providers
///
/// - `"openai"` - OpenAI Realtime API
pub fn create_realtime_provider(
    provider_type: &str,
    config: RealtimeConfig,
) -> RealtimeResult<BoxedRealtime> {
    match RealtimeProvider::parse(provider_type) {
        Some(RealtimeProvider::OpenAI) => Ok(Box::new(OpenAIRealtime::new(config)?)),
        None => Err(RealtimeError::InvalidConfiguration(format!(
            "Unsupported realtime provider: {provider_type}. Supported providers: {}",
            get_supported_realtime_providers().join(", ")
        ))),
    }
}

/// Get list of supported realtime providers.
pub fn get_supported_realtime_providers() -> Vec<&'static str> {
    vec!["openai"]
}
