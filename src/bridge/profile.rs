//! Session profiles and the factory that turns them into AI sessions.

use std::time::Duration;

use super::role::Direction;
use crate::core::realtime::{
    BoxedRealtime, RealtimeConfig, RealtimeResult, TurnDetectionConfig, create_realtime_provider,
};
use crate::core::telephony::TelephonyEncoding;

/// Instructions used for single-leg calls unless configured otherwise.
pub const DEFAULT_ASSISTANT_INSTRUCTIONS: &str = "You are a helpful voice assistant on a phone call. \
Keep answers short and conversational, and stop talking as soon as the caller interrupts.";

/// Translator instructions; `{source}` and `{target}` are replaced with languages.
pub const DEFAULT_TRANSLATOR_INSTRUCTIONS: &str = "You are a live interpreter on a phone call. \
Translate everything you hear from {source} into {target}. Speak only the translation, \
in the first person, without commentary or answers of your own.";

/// Default allowance added to acknowledged playback when truncating.
pub const DEFAULT_PLAYBACK_ALLOWANCE_MS: u64 = 50;

/// Runtime settings shared by every pair.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// System-wide telephony encoding
    pub encoding: TelephonyEncoding,
    /// Added to acknowledged playback time when truncating
    pub playback_allowance_ms: u64,
    /// Issue `create_response` on end of caller turn
    pub manual_turns: bool,
    /// Upper bound on an AI session connect
    pub connect_timeout: Duration,
    /// How long a reserved pair may wait for its first leg
    pub pair_attach_timeout: Duration,
    /// Single-leg instructions
    pub assistant_instructions: String,
    /// Language spoken on leg A
    pub language_a: String,
    /// Language spoken on leg B
    pub language_b: String,
    /// Translator template with `{source}` / `{target}` placeholders
    pub translator_instructions: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            encoding: TelephonyEncoding::default(),
            playback_allowance_ms: DEFAULT_PLAYBACK_ALLOWANCE_MS,
            manual_turns: false,
            connect_timeout: Duration::from_secs(10),
            pair_attach_timeout: Duration::from_secs(30),
            assistant_instructions: DEFAULT_ASSISTANT_INSTRUCTIONS.to_string(),
            language_a: "English".to_string(),
            language_b: "Spanish".to_string(),
            translator_instructions: DEFAULT_TRANSLATOR_INSTRUCTIONS.to_string(),
        }
    }
}

impl BridgeSettings {
    /// Profile for the session serving `direction`.
    pub fn profile(&self, direction: Direction) -> SessionProfile {
        let instructions = match direction {
            Direction::Solo => self.assistant_instructions.clone(),
            Direction::AtoB => self.translator_prompt(&self.language_a, &self.language_b),
            Direction::BtoA => self.translator_prompt(&self.language_b, &self.language_a),
        };
        SessionProfile {
            direction,
            instructions,
            manual_turns: self.manual_turns,
        }
    }

    fn translator_prompt(&self, source: &str, target: &str) -> String {
        self.translator_instructions
            .replace("{source}", source)
            .replace("{target}", target)
    }
}

/// Everything that differs between the sessions of one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    pub direction: Direction,
    pub instructions: String,
    pub manual_turns: bool,
}

/// Creates unconnected AI session clients.
pub trait SessionFactory: Send + Sync {
    fn create(&self, profile: &SessionProfile) -> RealtimeResult<BoxedRealtime>;
}

/// Factory backed by a realtime provider name and a base configuration.
pub struct RealtimeSessionFactory {
    provider: String,
    base: RealtimeConfig,
}

impl RealtimeSessionFactory {
    /// `base` carries credentials, model and voice; audio formats are derived
    /// from `encoding`.
    pub fn new(provider: impl Into<String>, mut base: RealtimeConfig, encoding: TelephonyEncoding) -> Self {
        let format = encoding.ai_format().as_str().to_string();
        base.input_audio_format = Some(format.clone());
        base.output_audio_format = Some(format);
        Self {
            provider: provider.into(),
            base,
        }
    }

    /// Config a session for `profile` is created with.
    pub fn config_for(&self, profile: &SessionProfile) -> RealtimeConfig {
        let mut config = self.base.clone();
        config.instructions = Some(profile.instructions.clone());
        config.turn_detection = Some(if profile.manual_turns {
            TurnDetectionConfig::manual_responses()
        } else {
            TurnDetectionConfig::default()
        });
        config
    }
}

impl SessionFactory for RealtimeSessionFactory {
    fn create(&self, profile: &SessionProfile) -> RealtimeResult<BoxedRealtime> {
        create_realtime_provider(&self.provider, self.config_for(profile))
    }
}
