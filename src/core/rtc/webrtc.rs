//! webrtc-rs backend for the peer connection traits.
//!
//! webrtc-rs exposes neither track mute state nor a playout-delay control, so
//! remote tracks always report unmuted and jitter hints are only recorded.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::{
    DataChannel, IceServer, MediaStream, MediaTrack, PeerConnection, PeerConnectionConfig,
    PeerConnectionFactory, PeerConnectionState, PeerEvent, PeerEventSender, RemoteTrackEvent,
    RtpReceiver, TrackKind,
};
use crate::core::realtime::{RealtimeError, RealtimeResult};

/// A single Opus frame that decodes to 20 ms of silence.
const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];
const OPUS_FRAME_DURATION: Duration = Duration::from_millis(20);

fn peer_error(e: webrtc::Error) -> RealtimeError {
    RealtimeError::PeerConnection(e.to_string())
}

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New => PeerConnectionState::New,
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
            _ => PeerConnectionState::New,
        }
    }
}

impl From<&IceServer> for RTCIceServer {
    fn from(server: &IceServer) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Tracks
// =============================================================================

/// Local Opus audio track fed with encoded samples.
pub struct LocalAudioTrack {
    inner: Arc<TrackLocalStaticSample>,
}

impl LocalAudioTrack {
    pub fn new(track_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        };
        Self {
            inner: Arc::new(TrackLocalStaticSample::new(
                capability,
                track_id.into(),
                stream_id.into(),
            )),
        }
    }

    /// Write one encoded Opus frame.
    pub async fn write_frame(&self, data: Bytes, duration: Duration) -> RealtimeResult<()> {
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        self.inner.write_sample(&sample).await.map_err(peer_error)
    }

    /// Write one 20 ms silence frame.
    pub async fn write_silence(&self) -> RealtimeResult<()> {
        self.write_frame(
            Bytes::from_static(&OPUS_SILENCE_FRAME),
            OPUS_FRAME_DURATION,
        )
        .await
    }

    /// Wrap this track in a single-track stream.
    pub fn into_stream(self: Arc<Self>) -> MediaStream {
        let stream_id = self.inner.stream_id().to_string();
        MediaStream::new(stream_id, vec![self as Arc<dyn MediaTrack>])
    }
}

impl MediaTrack for LocalAudioTrack {
    fn id(&self) -> String {
        self.inner.id().to_string()
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn muted(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct RemoteTrack {
    inner: Arc<TrackRemote>,
}

impl MediaTrack for RemoteTrack {
    fn id(&self) -> String {
        self.inner.id()
    }

    fn kind(&self) -> TrackKind {
        match self.inner.kind() {
            RTPCodecType::Video => TrackKind::Video,
            _ => TrackKind::Audio,
        }
    }

    fn muted(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Receiver {
    inner: Arc<RTCRtpReceiver>,
    playout_delay_hint: Mutex<Option<f64>>,
}

impl Receiver {
    fn new(inner: Arc<RTCRtpReceiver>) -> Self {
        Self {
            inner,
            playout_delay_hint: Mutex::new(None),
        }
    }
}

impl RtpReceiver for Receiver {
    fn set_playout_delay_hint(&self, seconds: f64) -> RealtimeResult<()> {
        *self.playout_delay_hint.lock() = Some(seconds);
        tracing::debug!(
            kind = %self.inner.kind(),
            seconds,
            "Playout delay hint recorded (not supported by webrtc-rs)"
        );
        Ok(())
    }
}

// =============================================================================
// Data Channel
// =============================================================================

struct WebRtcDataChannel {
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> String {
        self.inner.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.inner.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> RealtimeResult<()> {
        self.inner
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| RealtimeError::DataChannel(e.to_string()))
    }

    async fn close(&self) -> RealtimeResult<()> {
        self.inner
            .close()
            .await
            .map_err(|e| RealtimeError::DataChannel(e.to_string()))
    }
}

fn forward_data_channel_events(channel: &Arc<RTCDataChannel>, events: &PeerEventSender) {
    let label = channel.label().to_string();

    let tx = events.clone();
    let open_label = label.clone();
    channel.on_open(Box::new(move || {
        let _ = tx.send(PeerEvent::DataChannelOpen {
            label: open_label.clone(),
        });
        Box::pin(async {})
    }));

    let tx = events.clone();
    let message_label = label.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        if msg.is_string {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = tx.send(PeerEvent::DataChannelMessage {
                        label: message_label.clone(),
                        text,
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Dropping non UTF-8 data channel message"),
            }
        }
        Box::pin(async {})
    }));

    let tx = events.clone();
    channel.on_close(Box::new(move || {
        let _ = tx.send(PeerEvent::DataChannelClosed {
            label: label.clone(),
        });
        Box::pin(async {})
    }));
}

// =============================================================================
// Peer Connection
// =============================================================================

pub struct WebRtcPeerConnection {
    inner: Arc<RTCPeerConnection>,
    events: PeerEventSender,
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> RealtimeResult<()> {
        let local = track
            .as_any()
            .downcast_ref::<LocalAudioTrack>()
            .ok_or_else(|| {
                RealtimeError::PeerConnection(format!(
                    "Track {} is not a webrtc-rs local track",
                    track.id()
                ))
            })?;

        let sender = self
            .inner
            .add_track(Arc::clone(&local.inner) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(peer_error)?;

        // RTCP has to be drained for interceptors to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn add_recvonly_audio_transceiver(&self) -> RealtimeResult<()> {
        self.inner
            .add_transceiver_from_kind(
                RTPCodecType::Audio,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map(|_| ())
            .map_err(peer_error)
    }

    async fn create_data_channel(
        &self,
        label: &str,
        ordered: bool,
    ) -> RealtimeResult<Arc<dyn DataChannel>> {
        let channel = self
            .inner
            .create_data_channel(
                label,
                Some(RTCDataChannelInit {
                    ordered: Some(ordered),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| RealtimeError::DataChannel(e.to_string()))?;

        forward_data_channel_events(&channel, &self.events);
        Ok(Arc::new(WebRtcDataChannel { inner: channel }))
    }

    async fn create_offer(&self) -> RealtimeResult<String> {
        let offer = self.inner.create_offer(None).await.map_err(peer_error)?;
        Ok(offer.sdp)
    }

    async fn set_local_description(&self, offer_sdp: &str) -> RealtimeResult<()> {
        let offer = RTCSessionDescription::offer(offer_sdp.to_string()).map_err(peer_error)?;
        self.inner
            .set_local_description(offer)
            .await
            .map_err(peer_error)
    }

    async fn set_remote_answer(&self, answer_sdp: &str) -> RealtimeResult<()> {
        let answer = RTCSessionDescription::answer(answer_sdp.to_string()).map_err(peer_error)?;
        self.inner
            .set_remote_description(answer)
            .await
            .map_err(peer_error)
    }

    async fn audio_receivers(&self) -> Vec<Arc<dyn RtpReceiver>> {
        self.inner
            .get_receivers()
            .await
            .into_iter()
            .filter(|r| r.kind() == RTPCodecType::Audio)
            .map(|r| Arc::new(Receiver::new(r)) as Arc<dyn RtpReceiver>)
            .collect()
    }

    async fn close(&self) -> RealtimeResult<()> {
        self.inner.close().await.map_err(peer_error)
    }
}

/// Builds webrtc-rs peer connections with default codecs and interceptors.
#[derive(Debug, Default, Clone)]
pub struct WebRtcPeerConnectionFactory;

impl WebRtcPeerConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerConnectionFactory {
    async fn create(
        &self,
        config: PeerConnectionConfig,
        events: PeerEventSender,
    ) -> RealtimeResult<Arc<dyn PeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(peer_error)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(peer_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(RTCIceServer::from).collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(peer_error)?,
        );

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            tracing::info!(state = %state, "Peer connection state changed");
            let _ = tx.send(PeerEvent::ConnectionStateChanged(state.into()));
            Box::pin(async {})
        }));

        let tx = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, receiver: Arc<RTCRtpReceiver>, _transceiver| {
                tracing::info!(
                    track_id = %track.id(),
                    codec = %track.codec().capability.mime_type,
                    "Remote track received"
                );

                let stream_id = track.stream_id();
                let remote: Arc<dyn MediaTrack> = Arc::new(RemoteTrack {
                    inner: track.clone(),
                });
                let _ = tx.send(PeerEvent::Track(RemoteTrackEvent {
                    track: remote.clone(),
                    receiver: Some(Arc::new(Receiver::new(receiver)) as Arc<dyn RtpReceiver>),
                    streams: vec![MediaStream::new(stream_id, vec![remote])],
                }));

                // Keep RTP flowing through the interceptors
                Box::pin(async move {
                    tokio::spawn(async move { while track.read_rtp().await.is_ok() {} });
                })
            },
        ));

        Ok(Arc::new(WebRtcPeerConnection { inner: pc, events }))
    }
}
