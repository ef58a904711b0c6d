//! Configuration validation logic.

use super::ServerConfig;

/// Largest playback allowance accepted, in milliseconds.
pub(crate) const MAX_PLAYBACK_ALLOWANCE_MS: u64 = 1000;

pub(crate) fn validate_server(host: &str) -> Result<(), Box<dyn std::error::Error>> {
    if host.trim().is_empty() {
        return Err("Server host must not be empty".into());
    }
    Ok(())
}

pub(crate) fn validate_timeouts(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.realtime_connect_timeout_seconds == 0 {
        return Err("Realtime connect timeout must be greater than zero".into());
    }
    if config.pair_attach_timeout_seconds == 0 {
        return Err("Pair attach timeout must be greater than zero".into());
    }
    if config.idle_timeout_seconds == 0 {
        return Err("Media idle timeout must be greater than zero".into());
    }
    Ok(())
}

pub(crate) fn validate_playback_allowance(ms: u64) -> Result<(), Box<dyn std::error::Error>> {
    if ms > MAX_PLAYBACK_ALLOWANCE_MS {
        return Err(format!(
            "Playback allowance of {ms} ms exceeds the maximum of {MAX_PLAYBACK_ALLOWANCE_MS} ms"
        )
        .into());
    }
    Ok(())
}

pub(crate) fn validate_languages(a: &str, b: &str) -> Result<(), Box<dyn std::error::Error>> {
    if a.trim().is_empty() || b.trim().is_empty() {
        return Err("Bridge languages must not be empty".into());
    }
    if a.trim().eq_ignore_ascii_case(b.trim()) {
        return Err(format!("Bridge languages must differ (both are {a:?})").into());
    }
    Ok(())
}

pub(crate) fn validate_connection_limits(
    max_websocket_connections: Option<usize>,
    max_connections_per_ip: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if max_websocket_connections == Some(0) {
        return Err("max_websocket_connections must be greater than zero when set".into());
    }
    if max_connections_per_ip == 0 {
        return Err("max_connections_per_ip must be greater than zero".into());
    }
    Ok(())
}

/// Run every check against a fully merged configuration.
pub(crate) fn validate_all(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_server(&config.host)?;
    validate_timeouts(config)?;
    validate_playback_allowance(config.playback_allowance_ms)?;
    validate_languages(&config.language_a, &config.language_b)?;
    validate_connection_limits(
        config.max_websocket_connections,
        config.max_connections_per_ip,
    )?;
    Ok(())
}
