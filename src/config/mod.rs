//! Configuration module for the bridge server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_bridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::bridge::profile::{
    BridgeSettings, DEFAULT_ASSISTANT_INSTRUCTIONS, DEFAULT_TRANSLATOR_INSTRUCTIONS,
};
use crate::core::realtime::RealtimeConfig;
use crate::core::telephony::TelephonyEncoding;

/// Server configuration
///
/// Everything needed to run the bridge:
/// - Server settings (host, port)
/// - Speech-to-speech provider credentials and session defaults
/// - Telephony encoding and playback timing
/// - Bridge instructions, languages and timeouts
/// - Connection limits
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Provider credentials
    pub openai_api_key: Option<String>,

    // Realtime session defaults
    pub realtime_model: String,
    pub realtime_voice: String,
    pub realtime_connect_timeout_seconds: u64,
    pub realtime_manual_turns: bool,

    // Telephony
    /// System-wide wire encoding for every leg
    pub telephony_encoding: TelephonyEncoding,
    pub playback_allowance_ms: u64,

    // Bridge behaviour
    /// Overrides the built-in assistant instructions
    pub assistant_instructions: Option<String>,
    pub language_a: String,
    pub language_b: String,
    /// Overrides the built-in translator template
    pub translator_instructions: Option<String>,
    pub pair_attach_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,

    // Security settings
    /// Maximum concurrent WebSocket connections (None = unlimited)
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: u32,
}

/// Zeroize secrets when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (and defaults)
    ///
    /// The `.env` file is loaded by the binary before this is called, so its
    /// values are visible here as ordinary environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate_all(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate_all(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Bridge settings shared by every pair.
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            encoding: self.telephony_encoding,
            playback_allowance_ms: self.playback_allowance_ms,
            manual_turns: self.realtime_manual_turns,
            connect_timeout: Duration::from_secs(self.realtime_connect_timeout_seconds),
            pair_attach_timeout: Duration::from_secs(self.pair_attach_timeout_seconds),
            assistant_instructions: self
                .assistant_instructions
                .clone()
                .unwrap_or_else(|| DEFAULT_ASSISTANT_INSTRUCTIONS.to_string()),
            language_a: self.language_a.clone(),
            language_b: self.language_b.clone(),
            translator_instructions: self
                .translator_instructions
                .clone()
                .unwrap_or_else(|| DEFAULT_TRANSLATOR_INSTRUCTIONS.to_string()),
        }
    }

    /// Base realtime configuration: credentials, model and voice. Audio
    /// formats, instructions and turn handling are filled in per session.
    pub fn realtime_config(&self) -> Result<RealtimeConfig, String> {
        let api_key = self
            .openai_api_key
            .clone()
            .ok_or_else(|| "OpenAI API key not configured (set OPENAI_API_KEY)".to_string())?;
        Ok(RealtimeConfig {
            api_key,
            model: self.realtime_model.clone(),
            voice: Some(self.realtime_voice.clone()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "HOST",
        "PORT",
        "OPENAI_API_KEY",
        "REALTIME_MODEL",
        "REALTIME_VOICE",
        "REALTIME_CONNECT_TIMEOUT_SECS",
        "REALTIME_MANUAL_TURNS",
        "TELEPHONY_ENCODING",
        "PLAYBACK_ALLOWANCE_MS",
        "ASSISTANT_INSTRUCTIONS",
        "BRIDGE_LANGUAGE_A",
        "BRIDGE_LANGUAGE_B",
        "TRANSLATOR_INSTRUCTIONS",
        "PAIR_ATTACH_TIMEOUT_SECS",
        "MEDIA_IDLE_TIMEOUT_SECS",
        "MAX_WEBSOCKET_CONNECTIONS",
        "MAX_CONNECTIONS_PER_IP",
    ];

    fn cleanup_env_vars() {
        for var in ENV_VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3001);
        assert_eq!(config.address(), "0.0.0.0:3001");
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.realtime_model, "gpt-4o-realtime-preview");
        assert_eq!(config.realtime_voice, "alloy");
        assert_eq!(config.telephony_encoding, TelephonyEncoding::Mulaw8000);
        assert_eq!(config.playback_allowance_ms, 50);
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
        assert!(config.max_websocket_connections.is_none());
        assert_eq!(config.max_connections_per_ip, 100);
        assert!(config.realtime_config().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("PORT", "4000");
            std::env::set_var("OPENAI_API_KEY", "sk-env");
            std::env::set_var("TELEPHONY_ENCODING", "l16_16000");
            std::env::set_var("REALTIME_MANUAL_TURNS", "true");
            std::env::set_var("BRIDGE_LANGUAGE_B", "Japanese");
            std::env::set_var("MAX_WEBSOCKET_CONNECTIONS", "20");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.telephony_encoding, TelephonyEncoding::L16_16000);
        assert!(config.realtime_manual_turns);
        assert_eq!(config.max_websocket_connections, Some(20));

        let settings = config.bridge_settings();
        assert_eq!(settings.language_b, "Japanese");
        assert!(settings.manual_turns);

        let realtime = config.realtime_config().unwrap();
        assert_eq!(realtime.api_key, "sk-env");
        assert_eq!(realtime.voice.as_deref(), Some("alloy"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_port() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("PORT", "not-a-port");
        }

        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("PORT"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_encoding() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("TELEPHONY_ENCODING", "opus");
        }

        assert!(ServerConfig::from_env().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_env() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("HOST", "10.0.0.1");
            std::env::set_var("OPENAI_API_KEY", "sk-env");
            std::env::set_var("PLAYBACK_ALLOWANCE_MS", "20");
        }

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
server:
  port: 9000
providers:
  openai_api_key: "sk-yaml"
telephony:
  playback_allowance_ms: 75
bridge:
  translator_instructions: "Interpret {source} to {target}."
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        // Untouched by YAML
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-yaml"));
        assert_eq!(config.playback_allowance_ms, 75);

        let settings = config.bridge_settings();
        assert_eq!(settings.translator_instructions, "Interpret {source} to {target}.");
        assert_eq!(settings.assistant_instructions, DEFAULT_ASSISTANT_INSTRUCTIONS);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_validation_rejects_identical_languages() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "bridge:\n  language_a: \"Spanish\"\n").unwrap();

        let err = ServerConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    #[serial]
    fn test_validation_rejects_large_allowance() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "telephony:\n  playback_allowance_ms: 5000\n").unwrap();

        assert!(ServerConfig::from_file(&path).is_err());
    }

    #[test]
    #[serial]
    fn test_validation_rejects_zero_connect_timeout() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("REALTIME_CONNECT_TIMEOUT_SECS", "0");
        }

        assert!(ServerConfig::from_env().is_err());

        cleanup_env_vars();
    }
}
