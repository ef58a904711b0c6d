//! Merging YAML overrides onto the environment-derived configuration.

use super::ServerConfig;
use super::env::load_from_env;
use super::yaml::YamlConfig;
use crate::core::telephony::TelephonyEncoding;

/// Environment values (with defaults) form the base; every value present in
/// `yaml` replaces its counterpart.
pub(crate) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
    }

    if let Some(providers) = yaml.providers
        && let Some(key) = providers.openai_api_key
    {
        config.openai_api_key = Some(key);
    }

    if let Some(realtime) = yaml.realtime {
        if let Some(model) = realtime.model {
            config.realtime_model = model;
        }
        if let Some(voice) = realtime.voice {
            config.realtime_voice = voice;
        }
        if let Some(secs) = realtime.connect_timeout_seconds {
            config.realtime_connect_timeout_seconds = secs;
        }
        if let Some(manual) = realtime.manual_turns {
            config.realtime_manual_turns = manual;
        }
    }

    if let Some(telephony) = yaml.telephony {
        if let Some(encoding) = telephony.encoding {
            config.telephony_encoding = TelephonyEncoding::parse(&encoding)
                .map_err(|e| format!("Invalid telephony.encoding: {e}"))?;
        }
        if let Some(ms) = telephony.playback_allowance_ms {
            config.playback_allowance_ms = ms;
        }
    }

    if let Some(bridge) = yaml.bridge {
        if bridge.assistant_instructions.is_some() {
            config.assistant_instructions = bridge.assistant_instructions;
        }
        if let Some(language) = bridge.language_a {
            config.language_a = language;
        }
        if let Some(language) = bridge.language_b {
            config.language_b = language;
        }
        if bridge.translator_instructions.is_some() {
            config.translator_instructions = bridge.translator_instructions;
        }
        if let Some(secs) = bridge.pair_attach_timeout_seconds {
            config.pair_attach_timeout_seconds = secs;
        }
        if let Some(secs) = bridge.idle_timeout_seconds {
            config.idle_timeout_seconds = secs;
        }
    }

    if let Some(security) = yaml.security {
        if security.max_websocket_connections.is_some() {
            config.max_websocket_connections = security.max_websocket_connections;
        }
        if let Some(per_ip) = security.max_connections_per_ip {
            config.max_connections_per_ip = per_ip;
        }
    }

    Ok(config)
}
