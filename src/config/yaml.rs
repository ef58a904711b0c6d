use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional so a file may override only part of the
/// configuration; anything absent falls back to environment variables and
/// then to defaults.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// providers:
///   openai_api_key: "sk-..."
///
/// realtime:
///   model: "gpt-4o-realtime-preview"
///   voice: "alloy"
///   connect_timeout_seconds: 10
///   manual_turns: false
///
/// telephony:
///   encoding: "mulaw_8000"
///   playback_allowance_ms: 50
///
/// bridge:
///   assistant_instructions: "You are a helpful voice assistant."
///   language_a: "English"
///   language_b: "Spanish"
///   translator_instructions: "Translate from {source} into {target}."
///   pair_attach_timeout_seconds: 30
///   idle_timeout_seconds: 300
///
/// security:
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub providers: Option<ProvidersYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub telephony: Option<TelephonyYaml>,
    pub bridge: Option<BridgeYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Provider credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    pub openai_api_key: Option<String>,
}

/// Speech-to-speech session settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub connect_timeout_seconds: Option<u64>,
    /// Request responses explicitly at the end of each caller turn
    pub manual_turns: Option<bool>,
}

/// Telephony transport settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelephonyYaml {
    /// `mulaw_8000`, `l16_8000` or `l16_16000`
    pub encoding: Option<String>,
    pub playback_allowance_ms: Option<u64>,
}

/// Bridge behaviour from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BridgeYaml {
    pub assistant_instructions: Option<String>,
    pub language_a: Option<String>,
    pub language_b: Option<String>,
    pub translator_instructions: Option<String>,
    pub pair_attach_timeout_seconds: Option<u64>,
    pub idle_timeout_seconds: Option<u64>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// Maximum concurrent WebSocket connections
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
