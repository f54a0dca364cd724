//! Environment variable loading.
//!
//! Unset or empty variables fall back to defaults. Malformed numeric values
//! are reported as errors rather than silently ignored.

use std::env;

use super::ClientConfig;
use crate::core::realtime::{HandshakeMode, ReconnectionConfig};

pub const ENV_ENDPOINT: &str = "REALTIME_ENDPOINT";
pub const ENV_MODEL: &str = "REALTIME_MODEL";
pub const ENV_HANDSHAKE_MODE: &str = "REALTIME_HANDSHAKE_MODE";
pub const ENV_API_KEY: &str = "REALTIME_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "REALTIME_MAX_RECONNECT_ATTEMPTS";
pub const ENV_RECONNECT_DELAYS_MS: &str = "REALTIME_RECONNECT_DELAYS_MS";
pub const ENV_JITTER_BUFFER_MS: &str = "REALTIME_JITTER_BUFFER_MS";
pub const ENV_OUTPUT_DEVICE_ID: &str = "REALTIME_OUTPUT_DEVICE_ID";
pub const ENV_ICE_SERVERS: &str = "REALTIME_ICE_SERVERS";

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, String> {
    raw.parse::<T>()
        .map_err(|_| format!("Invalid value for {name}: {raw}"))
}

/// Parse a comma-separated millisecond list such as `1000,2000,4000`.
pub(crate) fn parse_delay_list(name: &str, raw: &str) -> Result<Vec<u64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_number::<u64>(name, s))
        .collect()
}

/// Build a configuration from environment variables over defaults.
pub(crate) fn load_from_env() -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = ClientConfig::default();

    if let Some(endpoint) = var(ENV_ENDPOINT) {
        config.endpoint = endpoint;
    }
    if let Some(model) = var(ENV_MODEL) {
        config.model = model;
    }
    if let Some(mode) = var(ENV_HANDSHAKE_MODE) {
        config.handshake_mode = mode
            .parse::<HandshakeMode>()
            .map_err(|e| format!("Invalid value for {ENV_HANDSHAKE_MODE}: {e}"))?;
    }

    // REALTIME_API_KEY wins over the generic OpenAI variable
    config.api_key = var(ENV_API_KEY).or_else(|| var(ENV_OPENAI_API_KEY));

    let defaults = ReconnectionConfig::default();
    config.reconnection = ReconnectionConfig {
        max_attempts: match var(ENV_MAX_RECONNECT_ATTEMPTS) {
            Some(raw) => parse_number(ENV_MAX_RECONNECT_ATTEMPTS, &raw)?,
            None => defaults.max_attempts,
        },
        delays_ms: match var(ENV_RECONNECT_DELAYS_MS) {
            Some(raw) => parse_delay_list(ENV_RECONNECT_DELAYS_MS, &raw)?,
            None => defaults.delays_ms,
        },
    };

    config.jitter_buffer_ms = var(ENV_JITTER_BUFFER_MS)
        .map(|raw| parse_number(ENV_JITTER_BUFFER_MS, &raw))
        .transpose()?;
    config.output_device_id = var(ENV_OUTPUT_DEVICE_ID);

    if let Some(raw) = var(ENV_ICE_SERVERS) {
        config.ice_servers = serde_json::from_str(&raw)
            .map_err(|e| format!("Invalid JSON for {ENV_ICE_SERVERS}: {e}"))?;
    }

    Ok(config)
}
