//! Environment variable loading.

use std::str::FromStr;

use super::ServerConfig;
use crate::bridge::profile::DEFAULT_PLAYBACK_ALLOWANCE_MS;
use crate::core::telephony::TelephonyEncoding;

pub(crate) const DEFAULT_HOST: &str = "0.0.0.0";
pub(crate) const DEFAULT_PORT: u16 = 3001;
pub(crate) const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";
pub(crate) const DEFAULT_REALTIME_VOICE: &str = "alloy";
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_LANGUAGE_A: &str = "English";
pub(crate) const DEFAULT_LANGUAGE_B: &str = "Spanish";
pub(crate) const DEFAULT_PAIR_ATTACH_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
pub(crate) const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// Non-empty value of `name`, if set.
fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse `name` when set; an unparseable value is an error, not a default.
fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: {raw:?} ({e})").into()),
        None => Ok(None),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match env_string(name) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(format!("Invalid boolean for {name}: {raw:?}").into()),
        },
        None => Ok(None),
    }
}

/// Build a configuration from environment variables and defaults.
pub(crate) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let telephony_encoding = match env_string("TELEPHONY_ENCODING") {
        Some(raw) => TelephonyEncoding::parse(&raw)
            .map_err(|e| format!("Invalid value for TELEPHONY_ENCODING: {e}"))?,
        None => TelephonyEncoding::default(),
    };

    Ok(ServerConfig {
        host: env_string("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: env_parse("PORT")?.unwrap_or(DEFAULT_PORT),
        openai_api_key: env_string("OPENAI_API_KEY"),
        realtime_model: env_string("REALTIME_MODEL")
            .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string()),
        realtime_voice: env_string("REALTIME_VOICE")
            .unwrap_or_else(|| DEFAULT_REALTIME_VOICE.to_string()),
        realtime_connect_timeout_seconds: env_parse("REALTIME_CONNECT_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        realtime_manual_turns: env_bool("REALTIME_MANUAL_TURNS")?.unwrap_or(false),
        telephony_encoding,
        playback_allowance_ms: env_parse("PLAYBACK_ALLOWANCE_MS")?
            .unwrap_or(DEFAULT_PLAYBACK_ALLOWANCE_MS),
        assistant_instructions: env_string("ASSISTANT_INSTRUCTIONS"),
        language_a: env_string("BRIDGE_LANGUAGE_A")
            .unwrap_or_else(|| DEFAULT_LANGUAGE_A.to_string()),
        language_b: env_string("BRIDGE_LANGUAGE_B")
            .unwrap_or_else(|| DEFAULT_LANGUAGE_B.to_string()),
        translator_instructions: env_string("TRANSLATOR_INSTRUCTIONS"),
        pair_attach_timeout_seconds: env_parse("PAIR_ATTACH_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_PAIR_ATTACH_TIMEOUT_SECS),
        idle_timeout_seconds: env_parse("MEDIA_IDLE_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
        max_websocket_connections: env_parse("MAX_WEBSOCKET_CONNECTIONS")?,
        max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_IP),
    })
}
