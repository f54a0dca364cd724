//! Configuration module for the realtime voice client
//!
//! Configuration comes from several sources: .env files, environment variables
//! and an optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `env`: Environment variable loading
//! - `yaml`: YAML configuration file loading
//!
//! # Example
//! ```rust,no_run
//! use rtc_voice_client::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ClientConfig::from_file(&PathBuf::from("realtime.yaml"))?;
//! println!("Negotiating against {}", config.endpoint);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;

mod env;
mod yaml;

pub use env::{
    ENV_API_KEY, ENV_ENDPOINT, ENV_HANDSHAKE_MODE, ENV_ICE_SERVERS, ENV_JITTER_BUFFER_MS,
    ENV_MAX_RECONNECT_ATTEMPTS, ENV_MODEL, ENV_OPENAI_API_KEY, ENV_OUTPUT_DEVICE_ID,
    ENV_RECONNECT_DELAYS_MS,
};
pub use yaml::{EndpointYaml, MediaYaml, ReconnectYaml, YamlConfig};

use crate::core::realtime::{HandshakeMode, ReconnectionConfig, SessionConfig};
use crate::core::rtc::IceServer;
use crate::utils::validate_endpoint_url;

/// Default negotiation endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/realtime/calls";

/// Default realtime model.
pub const DEFAULT_MODEL: &str = "gpt-realtime";

/// Realtime client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// Negotiation endpoint the SDP offer is posted to
    pub endpoint: String,
    /// Model identifier sent in the descriptor and in SDP-mode query strings
    pub model: String,
    /// Wire mode of the offer/answer exchange
    pub handshake_mode: HandshakeMode,
    /// Default API key when `connect()` is not given one
    pub api_key: Option<String>,
    pub reconnection: ReconnectionConfig,
    /// Playout-delay hint applied to inbound audio receivers
    pub jitter_buffer_ms: Option<u64>,
    /// Preferred output device for remote audio
    pub output_device_id: Option<String>,
    /// ICE servers used until `connect()` supplies others
    pub ice_servers: Vec<IceServer>,
    /// Initial desired session configuration
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            handshake_mode: HandshakeMode::default(),
            api_key: None,
            reconnection: ReconnectionConfig::default(),
            jitter_buffer_ms: None,
            output_device_id: None,
            ice_servers: Vec::new(),
            session: SessionConfig::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("handshake_mode", &self.handshake_mode)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("reconnection", &self.reconnection)
            .field("jitter_buffer_ms", &self.jitter_buffer_ms)
            .field("output_device_id", &self.output_device_id)
            .field("ice_servers", &self.ice_servers.len())
            .field("session", &self.session)
            .finish()
    }
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for ClientConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(key) = &mut self.api_key {
            key.zeroize();
        }
        for server in &mut self.ice_servers {
            if let Some(credential) = &mut server.credential {
                credential.zeroize();
            }
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables over defaults
    ///
    /// The .env file, if any, is loaded into the environment by the binary at
    /// start-up, so actual environment variables override .env values.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::load_from_env()?;
        config.validate()?;
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
    /// Returns an error if the YAML file cannot be read or is malformed,
    /// environment variables have invalid formats or validation fails.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = env::load_from_env()?;
        config.apply_yaml(yaml_config)?;
        config.validate()?;

        Ok(config)
    }

    /// Overlay YAML values onto this configuration.
    ///
    /// # Errors
    /// Returns a description of the first value that cannot be interpreted.
    pub fn apply_yaml(&mut self, yaml: YamlConfig) -> Result<(), String> {
        if let Some(endpoint) = yaml.endpoint {
            if let Some(url) = endpoint.url {
                self.endpoint = url;
            }
            if let Some(model) = endpoint.model {
                self.model = model;
            }
            if let Some(mode) = endpoint.handshake_mode {
                self.handshake_mode = mode
                    .parse()
                    .map_err(|e| format!("Invalid endpoint.handshake_mode: {e}"))?;
            }
            if endpoint.api_key.is_some() {
                self.api_key = endpoint.api_key;
            }
        }

        if let Some(reconnect) = yaml.reconnect {
            if let Some(max_attempts) = reconnect.max_attempts {
                self.reconnection.max_attempts = max_attempts;
            }
            if let Some(delays_ms) = reconnect.delays_ms {
                self.reconnection.delays_ms = delays_ms;
            }
        }

        if let Some(media) = yaml.media {
            if media.jitter_buffer_ms.is_some() {
                self.jitter_buffer_ms = media.jitter_buffer_ms;
            }
            if media.output_device_id.is_some() {
                self.output_device_id = media.output_device_id;
            }
        }

        if let Some(ice_servers) = yaml.ice_servers {
            self.ice_servers = ice_servers;
        }

        if let Some(session) = yaml.session {
            self.session = self.session.merged(&session);
        }

        Ok(())
    }

    /// Validate the final configuration.
    ///
    /// # Errors
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        validate_endpoint_url(&self.endpoint)
            .map_err(|e| format!("Invalid endpoint '{}': {e}", self.endpoint))?;

        if self.model.trim().is_empty() {
            return Err("Model must not be empty".to_string());
        }

        if self.reconnection.delays_ms.is_empty() {
            return Err("Reconnect delay table must not be empty".to_string());
        }

        if let Some(server) = self.ice_servers.iter().find(|s| s.urls.is_empty()) {
            return Err(format!(
                "ICE server entry has no urls (username: {:?})",
                server.username
            ));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().is_some_and(|k| !k.is_empty())
    }
}
