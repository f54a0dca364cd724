use serde::Deserialize;
use std::path::Path;

use crate::core::realtime::SessionConfig;
use crate::core::rtc::IceServer;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override the environment.
///
/// # Example YAML structure
/// ```yaml
/// endpoint:
///   url: "https://api.openai.com/v1/realtime/calls"
///   model: "gpt-realtime"
///   handshake_mode: "json_with_sdp_fallback"
///   api_key: "sk-..."
///
/// reconnect:
///   max_attempts: 5
///   delays_ms: [1000, 2000, 4000, 8000]
///
/// media:
///   jitter_buffer_ms: 80
///   output_device_id: "default"
///
/// ice_servers:
///   - urls: ["stun:stun.l.google.com:19302"]
///
/// session:
///   instructions: "You are a helpful assistant."
///   voice: "alloy"
///   turn_detection: "server_vad"
///   vad:
///     threshold: 0.5
///     silence_duration_ms: 500
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub endpoint: Option<EndpointYaml>,
    pub reconnect: Option<ReconnectYaml>,
    pub media: Option<MediaYaml>,
    pub ice_servers: Option<Vec<IceServer>>,
    pub session: Option<SessionConfig>,
}

/// Negotiation endpoint configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointYaml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub handshake_mode: Option<String>,
    pub api_key: Option<String>,
}

/// Reconnection policy from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconnectYaml {
    pub max_attempts: Option<u32>,
    pub delays_ms: Option<Vec<u64>>,
}

/// Playback preferences from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MediaYaml {
    pub jitter_buffer_ms: Option<u64>,
    pub output_device_id: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
