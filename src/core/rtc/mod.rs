//! Peer connection abstractions.
//!
//! The realtime client never talks to a WebRTC stack directly. It drives the
//! traits in this module, which a backend implements (see the `webrtc` module
//! behind the `webrtc-backend` feature) and which tests replace with mocks.
//!
//! Events flow the other way: a backend pushes [`PeerEvent`]s into the
//! [`PeerEventSender`] it was handed at creation time.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::realtime::RealtimeResult;

#[cfg(feature = "webrtc-backend")]
pub mod webrtc;

// =============================================================================
// Media
// =============================================================================

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A local or remote media track.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> TrackKind;

    /// Whether the track is currently muted (no media flowing yet).
    fn muted(&self) -> bool;

    /// Access to the backend type behind the trait object.
    fn as_any(&self) -> &dyn Any;
}

/// A group of tracks sharing one stream id.
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Wrap a lone track in a fresh stream.
    pub fn from_track(track: Arc<dyn MediaTrack>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), vec![track])
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field(
                "tracks",
                &self.tracks.iter().map(|t| t.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Receiving half of an RTP media flow.
pub trait RtpReceiver: Send + Sync {
    /// Apply a playout-delay (jitter buffer) hint, in seconds.
    fn set_playout_delay_hint(&self, seconds: f64) -> RealtimeResult<()>;
}

/// Output element the remote stream is rendered to.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Bind (or unbind with `None`) the stream this sink plays.
    fn attach(&self, stream: Option<MediaStream>);

    /// Whether the sink can be routed to an explicit output device.
    fn supports_output_routing(&self) -> bool {
        false
    }

    /// Route playback to the given output device.
    async fn set_output_device(&self, device_id: &str) -> RealtimeResult<()>;
}

// =============================================================================
// Data Channel
// =============================================================================

/// An application data channel carried alongside the media.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;

    /// Whether the underlying ready-state is "open".
    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> RealtimeResult<()>;

    async fn close(&self) -> RealtimeResult<()>;
}

// =============================================================================
// Peer Connection
// =============================================================================

/// Transport-level peer connection states reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// An ICE server entry handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Configuration used to build a peer connection.
#[derive(Debug, Clone, Default)]
pub struct PeerConnectionConfig {
    pub ice_servers: Vec<IceServer>,
}

/// An inbound remote track together with its receiver and streams.
#[derive(Clone)]
pub struct RemoteTrackEvent {
    pub track: Arc<dyn MediaTrack>,
    pub receiver: Option<Arc<dyn RtpReceiver>>,
    pub streams: Vec<MediaStream>,
}

impl fmt::Debug for RemoteTrackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrackEvent")
            .field("track", &self.track.id())
            .field("streams", &self.streams)
            .finish()
    }
}

/// Events a backend reports for one peer connection.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    ConnectionStateChanged(PeerConnectionState),
    Track(RemoteTrackEvent),
    TrackUnmuted { track_id: String },
    DataChannelOpen { label: String },
    DataChannelMessage { label: String, text: String },
    DataChannelClosed { label: String },
}

/// Sending side of a per-session event channel.
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Receiving side of a per-session event channel.
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// A WebRTC peer connection as seen by the client.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Add a local track for sending.
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> RealtimeResult<()>;

    /// Add a receive-only audio transceiver.
    async fn add_recvonly_audio_transceiver(&self) -> RealtimeResult<()>;

    async fn create_data_channel(
        &self,
        label: &str,
        ordered: bool,
    ) -> RealtimeResult<Arc<dyn DataChannel>>;

    /// Create an offer that receives audio and no video; returns its SDP.
    async fn create_offer(&self) -> RealtimeResult<String>;

    async fn set_local_description(&self, offer_sdp: &str) -> RealtimeResult<()>;

    /// Apply the remote description with type `answer`.
    async fn set_remote_answer(&self, answer_sdp: &str) -> RealtimeResult<()>;

    /// Receivers of all current inbound audio flows.
    async fn audio_receivers(&self) -> Vec<Arc<dyn RtpReceiver>>;

    async fn close(&self) -> RealtimeResult<()>;
}

/// Builds peer connections; the injection point for backends and tests.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        config: PeerConnectionConfig,
        events: PeerEventSender,
    ) -> RealtimeResult<Arc<dyn PeerConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTrack {
        id: &'static str,
        kind: TrackKind,
    }

    impl MediaTrack for StubTrack {
        fn id(&self) -> String {
            self.id.to_string()
        }

        fn kind(&self) -> TrackKind {
            self.kind
        }

        fn muted(&self) -> bool {
            false
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_stream_from_track() {
        let track: Arc<dyn MediaTrack> = Arc::new(StubTrack {
            id: "remote-audio",
            kind: TrackKind::Audio,
        });
        let stream = MediaStream::from_track(track);
        assert_eq!(stream.tracks().len(), 1);
        assert_eq!(stream.tracks()[0].id(), "remote-audio");
        assert!(!stream.id().is_empty());
    }

    #[test]
    fn test_audio_tracks_filter() {
        let stream = MediaStream::new(
            "mic",
            vec![
                Arc::new(StubTrack {
                    id: "a",
                    kind: TrackKind::Audio,
                }),
                Arc::new(StubTrack {
                    id: "v",
                    kind: TrackKind::Video,
                }),
            ],
        );
        let ids: Vec<String> = stream.audio_tracks().map(|t| t.id()).collect();
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_ice_server_serde_skips_empty_credentials() {
        let server = IceServer {
            urls: vec!["stun:stun.example.org".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&server).unwrap();
        assert_eq!(json, serde_json::json!({"urls": ["stun:stun.example.org"]}));
    }
}
