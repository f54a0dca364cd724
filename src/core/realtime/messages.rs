//! Wire types for the negotiation endpoint and the `oai-events` control channel.
//!
//! # Protocol Overview
//!
//! Handshake (JSON mode) request body:
//! - `{ "sdp": "<offer>", "session": { ... } }`
//!
//! Client events (sent over the control channel):
//! - session.update - Push session configuration
//! - user_speech_start - Local barge-in started
//! - user_speech_stop - Local barge-in ended
//!
//! Server events (received over the control channel):
//! - session.updated / session.update - Session configuration confirmation
//! - input_audio_buffer.speech_started / speech_stopped - Server VAD signals
//!
//! The server schema has drifted across versions, so inbound fields are read
//! through ordered lookup tables rather than fixed structs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Label of the control data channel.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

// =============================================================================
// Session Payload
// =============================================================================

/// Session object as sent in the handshake body and in `session.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_modalities: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioSettings>,

    /// Flat parameter bag mirrored for servers that only read it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_parameters: Option<Map<String, Value>>,
}

impl SessionPayload {
    /// True when serializing would produce `{}`.
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.output_modalities.is_none()
            && self.instructions.is_none()
            && self.turn_detection.is_none()
            && self.audio.is_none()
            && self.session_parameters.is_none()
    }
}

/// Resolved turn detection object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        min_speech_duration_ms: Option<u32>,
    },
}

/// `audio` object of the session payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<AudioInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AudioOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInput {
    pub format: AudioFormatWire,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioOutput {
    pub voice: String,
}

/// Audio format as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormatWire {
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
}

// =============================================================================
// Handshake
// =============================================================================

/// JSON-mode handshake request body.
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeRequest<'a> {
    pub sdp: &'a str,
    pub session: &'a SessionPayload,
}

/// Where an answer SDP may live in a JSON handshake response, in priority order.
pub const ANSWER_SDP_PATHS: &[&[&str]] = &[&["sdp"], &["rtc_connection", "sdp"]];

// =============================================================================
// Client Events
// =============================================================================

/// Events sent over the control channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionPayload },

    #[serde(rename = "user_speech_start")]
    UserSpeechStart,

    #[serde(rename = "user_speech_stop")]
    UserSpeechStop,
}

impl ClientEvent {
    pub fn speech_activity(active: bool) -> Self {
        if active {
            ClientEvent::UserSpeechStart
        } else {
            ClientEvent::UserSpeechStop
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::UserSpeechStart => "user_speech_start",
            ClientEvent::UserSpeechStop => "user_speech_stop",
        }
    }
}

// =============================================================================
// Server Events
// =============================================================================

/// Inbound message types that carry a session object.
pub const SESSION_EVENT_TYPES: &[&str] = &["session.updated", "session.update"];

/// Inbound server VAD signals.
pub const SPEECH_STARTED_EVENT: &str = "input_audio_buffer.speech_started";
pub const SPEECH_STOPPED_EVENT: &str = "input_audio_buffer.speech_stopped";

/// Voice lookup order inside an inbound `session` object.
pub const VOICE_PATHS: &[&[&str]] = &[
    &["session_parameters", "voice"],
    &["voice"],
    &["audio", "output", "voice"],
];

/// Instructions lookup order inside an inbound `session` object.
pub const INSTRUCTIONS_PATHS: &[&[&str]] = &[&["session_parameters", "instructions"], &["instructions"]];

/// Turn detection type lookup order inside an inbound `session` object.
pub const TURN_DETECTION_PATHS: &[&[&str]] = &[
    &["session_parameters", "turn_detection", "type"],
    &["turn_detection", "type"],
];

/// Follow `path` through nested objects.
pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

/// First string found along the given paths, in order.
pub fn first_string(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup(value, path).and_then(Value::as_str))
        .map(str::to_string)
}
