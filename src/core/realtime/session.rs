//! Desired session configuration and its two wire projections.
//!
//! The store holds an immutable [`SessionConfig`] that is replaced wholesale
//! on every update. From it derive:
//! - the initial descriptor sent in the JSON handshake body
//! - the incremental `session.update` payload pushed over the control channel
//!
//! Both share the same resolution helpers so instructions, turn detection and
//! voice always come out identically in each.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::diagnostics::Diagnostics;
use super::messages::{
    AudioFormatWire, AudioInput, AudioOutput, AudioSettings, ClientEvent, INSTRUCTIONS_PATHS,
    SESSION_EVENT_TYPES, SessionPayload, TURN_DETECTION_PATHS, TurnDetection, VOICE_PATHS,
    first_string,
};

/// Default input audio: 16-bit PCM, 16 kHz, mono.
pub const DEFAULT_INPUT_FORMAT_TYPE: &str = "audio/pcm";
pub const DEFAULT_INPUT_SAMPLE_RATE_HZ: u32 = 16000;
pub const DEFAULT_INPUT_CHANNELS: u16 = 1;

/// Turn detection mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDetectionMode {
    None,
    ServerVad,
}

/// Server VAD tuning, only used with [`TurnDetectionMode::ServerVad`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadParams {
    pub threshold: Option<f64>,
    pub silence_duration_ms: Option<u32>,
    pub min_speech_duration_ms: Option<u32>,
}

/// Input audio format requested by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(default)]
    pub sample_rate_hz: Option<u32>,
    #[serde(default)]
    pub channels: Option<u16>,
}

impl Default for InputAudioFormat {
    fn default() -> Self {
        Self {
            format_type: DEFAULT_INPUT_FORMAT_TYPE.to_string(),
            sample_rate_hz: Some(DEFAULT_INPUT_SAMPLE_RATE_HZ),
            channels: Some(DEFAULT_INPUT_CHANNELS),
        }
    }
}

impl From<&InputAudioFormat> for AudioFormatWire {
    fn from(format: &InputAudioFormat) -> Self {
        AudioFormatWire {
            format_type: format.format_type.clone(),
            rate: format.sample_rate_hz,
            channels: format.channels,
        }
    }
}

/// Partially specified session configuration.
///
/// Also used as the patch type for [`SessionConfigStore::update`]: every
/// `Some` field replaces the current value, `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub instructions: Option<String>,
    pub turn_detection: Option<TurnDetectionMode>,
    pub vad: Option<VadParams>,
    pub voice: Option<String>,
    pub modalities: Option<Vec<String>>,
    pub input_audio_format: Option<InputAudioFormat>,
    /// Extra parameters passed through verbatim in `session_parameters`
    pub session_parameters: Option<Map<String, Value>>,
}

impl SessionConfig {
    /// Shallow merge: `vad` and `session_parameters` are replaced, not deep-merged.
    pub fn merged(&self, patch: &SessionConfig) -> SessionConfig {
        SessionConfig {
            instructions: patch.instructions.clone().or_else(|| self.instructions.clone()),
            turn_detection: patch.turn_detection.or(self.turn_detection),
            vad: patch.vad.clone().or_else(|| self.vad.clone()),
            voice: patch.voice.clone().or_else(|| self.voice.clone()),
            modalities: patch.modalities.clone().or_else(|| self.modalities.clone()),
            input_audio_format: patch
                .input_audio_format
                .clone()
                .or_else(|| self.input_audio_format.clone()),
            session_parameters: patch
                .session_parameters
                .clone()
                .or_else(|| self.session_parameters.clone()),
        }
    }

    fn resolved_turn_detection(&self) -> Option<TurnDetection> {
        self.turn_detection.map(|mode| match mode {
            TurnDetectionMode::None => TurnDetection::None,
            TurnDetectionMode::ServerVad => {
                let vad = self.vad.clone().unwrap_or_default();
                TurnDetection::ServerVad {
                    threshold: vad.threshold,
                    silence_duration_ms: vad.silence_duration_ms,
                    min_speech_duration_ms: vad.min_speech_duration_ms,
                }
            }
        })
    }

    fn resolved_audio(&self, input_format: Option<AudioFormatWire>) -> Option<AudioSettings> {
        let output = self.voice.clone().map(|voice| AudioOutput { voice });
        let input = input_format.map(|format| AudioInput { format });
        if input.is_none() && output.is_none() {
            return None;
        }
        Some(AudioSettings { input, output })
    }

    /// Passthrough parameters overlaid with the mirrored top-level fields.
    fn resolved_session_parameters(
        &self,
        turn_detection: Option<&TurnDetection>,
    ) -> Option<Map<String, Value>> {
        let mut params = self.session_parameters.clone().unwrap_or_default();
        if let Some(instructions) = &self.instructions {
            params.insert(
                "instructions".to_string(),
                Value::String(instructions.clone()),
            );
        }
        if let Some(td) = turn_detection
            && let Ok(value) = serde_json::to_value(td)
        {
            params.insert("turn_detection".to_string(), value);
        }
        if let Some(voice) = &self.voice {
            params.insert("voice".to_string(), Value::String(voice.clone()));
        }
        (!params.is_empty()).then_some(params)
    }
}

/// Last session state confirmed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmedSession {
    pub voice: Option<String>,
    pub instructions: Option<String>,
    /// Turn detection type string, e.g. `server_vad`
    pub turn_detection: Option<String>,
}

/// Holds the desired session configuration and renders its wire shapes.
pub struct SessionConfigStore {
    model: String,
    current: ArcSwap<SessionConfig>,
}

impl SessionConfigStore {
    pub fn new(model: impl Into<String>, initial: SessionConfig) -> Self {
        Self {
            model: model.into(),
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn snapshot(&self) -> Arc<SessionConfig> {
        self.current.load_full()
    }

    /// Merge `patch` over the current config and return the new value.
    pub fn update(&self, patch: &SessionConfig) -> Arc<SessionConfig> {
        self.current.rcu(|current| current.merged(patch));
        self.current.load_full()
    }

    /// Full handshake-time session object.
    pub fn build_initial_descriptor(&self) -> SessionPayload {
        let config = self.snapshot();
        let turn_detection = config.resolved_turn_detection();
        let input_format = config
            .input_audio_format
            .clone()
            .unwrap_or_default();

        SessionPayload {
            model: Some(self.model.clone()),
            output_modalities: Some(
                config
                    .modalities
                    .clone()
                    .unwrap_or_else(|| vec!["audio".to_string()]),
            ),
            instructions: config.instructions.clone(),
            session_parameters: config.resolved_session_parameters(turn_detection.as_ref()),
            audio: config.resolved_audio(Some(AudioFormatWire::from(&input_format))),
            turn_detection,
        }
    }

    /// `session.update` event, or `None` when there is nothing to send.
    pub fn build_update_payload(&self) -> Option<ClientEvent> {
        let config = self.snapshot();
        let turn_detection = config.resolved_turn_detection();

        let session = SessionPayload {
            model: None,
            output_modalities: config.modalities.clone(),
            instructions: config.instructions.clone(),
            session_parameters: config.resolved_session_parameters(turn_detection.as_ref()),
            audio: config.resolved_audio(config.input_audio_format.as_ref().map(AudioFormatWire::from)),
            turn_detection,
        };

        (!session.is_empty()).then_some(ClientEvent::SessionUpdate { session })
    }

    /// Parse an inbound control message into a confirmation.
    ///
    /// Returns `None` for other message types and for malformed JSON, which
    /// is logged as a warning.
    pub fn parse_inbound(raw: &str, diagnostics: &Diagnostics) -> Option<ConfirmedSession> {
        let message: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                diagnostics.warn(
                    "Failed to parse control message",
                    Some(serde_json::json!({ "error": e.to_string() })),
                );
                return None;
            }
        };

        let message_type = message.get("type").and_then(Value::as_str)?;
        if !SESSION_EVENT_TYPES.contains(&message_type) {
            return None;
        }

        let session = message.get("session").cloned().unwrap_or(Value::Null);
        Some(ConfirmedSession {
            voice: first_string(&session, VOICE_PATHS),
            instructions: first_string(&session, INSTRUCTIONS_PATHS),
            turn_detection: first_string(&session, TURN_DETECTION_PATHS),
        })
    }
}
