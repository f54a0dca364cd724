//! In-memory peer connection backend for client tests.
//!
//! Every peer records what the client did to it and exposes the event sender
//! it was created with, so tests can play the part of the transport.

#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use rtc_voice_client::core::realtime::{RealtimeError, RealtimeResult};
use rtc_voice_client::core::rtc::{
    AudioSink, DataChannel, MediaStream, MediaTrack, PeerConnection, PeerConnectionConfig,
    PeerConnectionFactory, PeerConnectionState, PeerEvent, PeerEventSender, RemoteTrackEvent,
    RtpReceiver, TrackKind,
};

pub const OFFER_SDP: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";

pub const ANSWER_SDP: &str = "v=0\r\no=- 1 2 IN IP4 10.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

/// Poll `condition` every 10 ms for up to two seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

// =============================================================================
// Tracks
// =============================================================================

pub struct MockTrack {
    id: String,
    kind: TrackKind,
    muted: AtomicBool,
}

impl MockTrack {
    pub fn audio(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind: TrackKind::Audio,
            muted: AtomicBool::new(false),
        })
    }

    pub fn muted_audio(id: &str) -> Arc<Self> {
        let track = Self::audio(id);
        track.muted.store(true, Ordering::SeqCst);
        track
    }
}

impl MediaTrack for MockTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A microphone stream with a single audio track.
pub fn microphone() -> MediaStream {
    MediaStream::new("local-mic", vec![MockTrack::audio("mic-track") as Arc<dyn MediaTrack>])
}

#[derive(Default)]
pub struct MockReceiver {
    pub hints: Mutex<Vec<f64>>,
}

impl RtpReceiver for MockReceiver {
    fn set_playout_delay_hint(&self, seconds: f64) -> RealtimeResult<()> {
        self.hints.lock().push(seconds);
        Ok(())
    }
}

/// Records every stream it is bound to; `None` entries are detaches.
#[derive(Default)]
pub struct MockSink {
    pub routable: bool,
    pub attached: Mutex<Vec<Option<String>>>,
    pub devices: Mutex<Vec<String>>,
}

impl MockSink {
    pub fn routable() -> Arc<Self> {
        Arc::new(Self {
            routable: true,
            ..Default::default()
        })
    }
}

#[async_trait]
impl AudioSink for MockSink {
    fn attach(&self, stream: Option<MediaStream>) {
        self.attached
            .lock()
            .push(stream.map(|s| s.id().to_string()));
    }

    fn supports_output_routing(&self) -> bool {
        self.routable
    }

    async fn set_output_device(&self, device_id: &str) -> RealtimeResult<()> {
        self.devices.lock().push(device_id.to_string());
        Ok(())
    }
}

// =============================================================================
// Data Channel
// =============================================================================

pub struct MockDataChannel {
    label: String,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl MockDataChannel {
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn sent_events(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent_events()
            .iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: String) -> RealtimeResult<()> {
        if !self.is_open() {
            return Err(RealtimeError::DataChannel("channel closed".to_string()));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn close(&self) -> RealtimeResult<()> {
        self.set_open(false);
        Ok(())
    }
}

// =============================================================================
// Peer Connection
// =============================================================================

pub struct MockPeerConnection {
    pub config: PeerConnectionConfig,
    events: PeerEventSender,
    channel_open: bool,
    pub added_tracks: Mutex<Vec<String>>,
    pub recvonly_transceivers: Mutex<u32>,
    pub channel: Mutex<Option<Arc<MockDataChannel>>>,
    pub local_description: Mutex<Option<String>>,
    pub remote_answer: Mutex<Option<String>>,
    pub receiver: Arc<MockReceiver>,
    closed: AtomicBool,
}

impl MockPeerConnection {
    /// Push an event as the transport would.
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_state(&self, state: PeerConnectionState) {
        self.emit(PeerEvent::ConnectionStateChanged(state));
    }

    pub fn emit_remote_track(&self, track: Arc<MockTrack>) {
        self.emit(PeerEvent::Track(RemoteTrackEvent {
            track: track as Arc<dyn MediaTrack>,
            receiver: Some(self.receiver.clone() as Arc<dyn RtpReceiver>),
            streams: Vec::new(),
        }));
    }

    pub fn control_channel(&self) -> Option<Arc<MockDataChannel>> {
        self.channel.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> RealtimeResult<()> {
        self.added_tracks.lock().push(track.id());
        Ok(())
    }

    async fn add_recvonly_audio_transceiver(&self) -> RealtimeResult<()> {
        *self.recvonly_transceivers.lock() += 1;
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        _ordered: bool,
    ) -> RealtimeResult<Arc<dyn DataChannel>> {
        let channel = Arc::new(MockDataChannel {
            label: label.to_string(),
            open: AtomicBool::new(self.channel_open),
            sent: Mutex::new(Vec::new()),
        });
        *self.channel.lock() = Some(channel.clone());
        Ok(channel as Arc<dyn DataChannel>)
    }

    async fn create_offer(&self) -> RealtimeResult<String> {
        Ok(OFFER_SDP.to_string())
    }

    async fn set_local_description(&self, offer_sdp: &str) -> RealtimeResult<()> {
        *self.local_description.lock() = Some(offer_sdp.to_string());
        Ok(())
    }

    async fn set_remote_answer(&self, answer_sdp: &str) -> RealtimeResult<()> {
        *self.remote_answer.lock() = Some(answer_sdp.to_string());
        Ok(())
    }

    async fn audio_receivers(&self) -> Vec<Arc<dyn RtpReceiver>> {
        vec![self.receiver.clone() as Arc<dyn RtpReceiver>]
    }

    async fn close(&self) -> RealtimeResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Factory
// =============================================================================

pub struct MockFactory {
    channel_open: bool,
    peers: Mutex<Vec<Arc<MockPeerConnection>>>,
}

impl MockFactory {
    /// Peers whose control channel is open as soon as it is created.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channel_open: true,
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Peers whose control channel starts closed.
    pub fn with_closed_channels() -> Arc<Self> {
        Arc::new(Self {
            channel_open: false,
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn latest(&self) -> Option<Arc<MockPeerConnection>> {
        self.peers.lock().last().cloned()
    }

    pub fn peer(&self, index: usize) -> Option<Arc<MockPeerConnection>> {
        self.peers.lock().get(index).cloned()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockFactory {
    async fn create(
        &self,
        config: PeerConnectionConfig,
        events: PeerEventSender,
    ) -> RealtimeResult<Arc<dyn PeerConnection>> {
        let peer = Arc::new(MockPeerConnection {
            config,
            events,
            channel_open: self.channel_open,
            added_tracks: Mutex::new(Vec::new()),
            recvonly_transceivers: Mutex::new(0),
            channel: Mutex::new(None),
            local_description: Mutex::new(None),
            remote_answer: Mutex::new(None),
            receiver: Arc::new(MockReceiver::default()),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().push(peer.clone());
        Ok(peer as Arc<dyn PeerConnection>)
    }
}
