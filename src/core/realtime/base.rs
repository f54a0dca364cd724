//! Base types for the realtime voice client.
//!
//! This module defines the error taxonomy, the externally observable
//! connection state, the reconnection policy and the callback set that the
//! client exposes to its embedder.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::session::ConfirmedSession;
use crate::core::rtc::MediaStream;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while negotiating or driving a realtime session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The client was destroyed and can no longer be used
    #[error("Client has been destroyed")]
    Disposed,

    /// `connect()` was called without an API key
    #[error("API key is required")]
    MissingApiKey,

    /// Negotiation was attempted without an assigned input stream
    #[error("No input stream assigned for negotiation")]
    MissingInputStream,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The negotiation endpoint answered with a non-2xx status
    #[error("Handshake failed with status {status}: {detail}")]
    HandshakeFailed {
        /// HTTP status code
        status: u16,
        /// Best-effort detail: serialized JSON body or plain text
        detail: String,
    },

    /// The negotiation endpoint answered 2xx but carried no answer SDP
    #[error("Handshake response did not contain an answer SDP")]
    MissingAnswerSdp,

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Peer connection operation failed
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// Data channel operation failed
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// No active session
    #[error("Not connected")]
    NotConnected,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RealtimeError {
    /// Usage errors are caller mistakes and are never retried.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            RealtimeError::Disposed | RealtimeError::MissingApiKey | RealtimeError::MissingInputStream
        )
    }
}

impl From<reqwest::Error> for RealtimeError {
    fn from(e: reqwest::Error) -> Self {
        RealtimeError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::Serialization(e.to_string())
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Reconnection Policy
// =============================================================================

/// Configuration for automatic reconnection behavior.
///
/// Delays are taken from a table indexed by `attempt - 1`; once the table is
/// exhausted its last entry repeats for every further attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    /// Maximum number of reconnection attempts since the last successful connect.
    /// Default: 5
    pub max_attempts: u32,

    /// Backoff delay table in milliseconds.
    /// Default: [1000, 2000, 4000, 8000]
    pub delays_ms: Vec<u64>,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delays_ms: vec![1000, 2000, 4000, 8000],
        }
    }
}

impl ReconnectionConfig {
    /// Create a config that never reconnects.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Delay to wait before the given 1-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.delays_ms.is_empty() {
            return Duration::ZERO;
        }
        let index = (attempt.saturating_sub(1) as usize).min(self.delays_ms.len() - 1);
        Duration::from_millis(self.delays_ms[index])
    }

    /// Check whether the given 1-based attempt is still allowed.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Status discriminant of [`ConnectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "idle"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Reconnecting => write!(f, "reconnecting"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Externally observable connection state.
///
/// `attempt` only exists while reconnecting and `message` only in the
/// terminal error state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting {
        /// 1-based reconnection attempt number
        attempt: u32,
    },
    Error {
        /// Human-readable failure description
        message: String,
    },
}

impl ConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            ConnectionState::Idle => ConnectionStatus::Idle,
            ConnectionState::Connecting => ConnectionStatus::Connecting,
            ConnectionState::Connected => ConnectionStatus::Connected,
            ConnectionState::Reconnecting { .. } => ConnectionStatus::Reconnecting,
            ConnectionState::Error { .. } => ConnectionStatus::Error,
        }
    }

    pub fn attempt(&self) -> Option<u32> {
        match self {
            ConnectionState::Reconnecting { attempt } => Some(*attempt),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ConnectionState::Error { message } => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting ({attempt})"),
            ConnectionState::Error { message } => write!(f, "error: {message}"),
            other => write!(f, "{}", other.status()),
        }
    }
}

// =============================================================================
// Callbacks
// =============================================================================

/// Severity attached to entries delivered to the caller's log sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Callback type for connection state transitions. Invoked synchronously,
/// once per transition, in transition order.
pub type StateChangeCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Callback type for a newly captured remote stream.
pub type RemoteStreamCallback = Arc<dyn Fn(MediaStream) + Send + Sync>;

/// Callback type for the caller's diagnostics sink.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str, Option<&serde_json::Value>) + Send + Sync>;

/// Callback type fired when the first inbound audio is available.
pub type FirstAudioFrameCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback type for server-confirmed session updates.
pub type SessionUpdatedCallback = Arc<dyn Fn(ConfirmedSession) + Send + Sync>;

/// The full set of events observable on a [`RealtimeClient`](super::RealtimeClient).
///
/// Passed once at construction; every field is optional.
#[derive(Clone, Default)]
pub struct RealtimeClientCallbacks {
    pub on_state_change: Option<StateChangeCallback>,
    pub on_remote_stream: Option<RemoteStreamCallback>,
    pub on_log: Option<LogCallback>,
    pub on_first_audio_frame: Option<FirstAudioFrameCallback>,
    pub on_session_updated: Option<SessionUpdatedCallback>,
}

impl fmt::Debug for RealtimeClientCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeClientCallbacks")
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_remote_stream", &self.on_remote_stream.is_some())
            .field("on_log", &self.on_log.is_some())
            .field("on_first_audio_frame", &self.on_first_audio_frame.is_some())
            .field("on_session_updated", &self.on_session_updated.is_some())
            .finish()
    }
}
