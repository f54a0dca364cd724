//! Realtime WebRTC voice session engine.
//!
//! This module negotiates and maintains a low-latency voice connection with a
//! cloud speech API and keeps the desired session configuration in sync with
//! what the server confirms.
//!
//! # Components
//!
//! - [`SessionConfigStore`] - desired configuration and its two wire shapes
//! - [`HandshakeNegotiator`] - SDP offer/answer exchange in JSON or SDP mode
//! - [`MediaPipeline`] - local tracks, remote stream capture, sink routing
//! - [`ControlChannel`] - `oai-events` data channel sends
//! - [`ReconnectionSupervisor`] - bounded single-flight reconnection
//! - [`RealtimeClient`] - the state machine tying them together
//!
//! # Example
//!
//! ```rust,ignore
//! use rtc_voice_client::config::ClientConfig;
//! use rtc_voice_client::core::realtime::{ConnectOptions, RealtimeClient, RealtimeClientCallbacks};
//! use std::sync::Arc;
//!
//! let callbacks = RealtimeClientCallbacks {
//!     on_state_change: Some(Arc::new(|state| println!("state: {state}"))),
//!     ..Default::default()
//! };
//! let client = RealtimeClient::new(&ClientConfig::from_env()?, callbacks, factory)?;
//! client.connect(ConnectOptions::new(microphone, "sk-...")).await?;
//! ```

mod base;
mod client;
mod control;
mod diagnostics;
mod handshake;
mod media;
mod messages;
mod reconnect;
mod session;

pub use base::{
    ConnectionState, ConnectionStatus, FirstAudioFrameCallback, LogCallback, LogLevel,
    RealtimeClientCallbacks, RealtimeError, RealtimeResult, ReconnectionConfig,
    RemoteStreamCallback, SessionUpdatedCallback, StateChangeCallback,
};
pub use client::{ConnectOptions, RealtimeClient};
pub use control::ControlChannel;
pub use diagnostics::Diagnostics;
pub use handshake::{HandshakeMode, HandshakeNegotiator, UNSUPPORTED_CONTENT_TYPE, extract_answer_sdp};
pub use media::MediaPipeline;
pub use messages::{
    AudioFormatWire, AudioSettings, CONTROL_CHANNEL_LABEL, ClientEvent, SessionPayload,
    TurnDetection,
};
pub use reconnect::{ReconnectCounters, ReconnectDecision, ReconnectionSupervisor};
pub use session::{
    ConfirmedSession, InputAudioFormat, SessionConfig, SessionConfigStore, TurnDetectionMode,
    VadParams,
};
