//! Local/remote media wiring for one client.
//!
//! Owns the captured remote stream, the bound output sink, the preferred
//! output device and the jitter-buffer hint. Survives reconnects: only the
//! pending first-frame bookkeeping is reset with each new session.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use super::base::{FirstAudioFrameCallback, LogLevel, RealtimeResult, RemoteStreamCallback};
use super::diagnostics::Diagnostics;
use crate::core::rtc::{AudioSink, MediaStream, PeerConnection, RemoteTrackEvent, RtpReceiver};

#[derive(Default)]
struct MediaState {
    remote_stream: Option<MediaStream>,
    sink: Option<Arc<dyn AudioSink>>,
    output_device_id: Option<String>,
    jitter_buffer_ms: Option<u64>,
    /// Remote tracks that arrived muted and still owe a first-frame signal
    pending_unmute: HashSet<String>,
}

pub struct MediaPipeline {
    state: Mutex<MediaState>,
    on_remote_stream: Option<RemoteStreamCallback>,
    on_first_audio_frame: Option<FirstAudioFrameCallback>,
    diagnostics: Diagnostics,
}

impl MediaPipeline {
    pub fn new(
        on_remote_stream: Option<RemoteStreamCallback>,
        on_first_audio_frame: Option<FirstAudioFrameCallback>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            state: Mutex::new(MediaState::default()),
            on_remote_stream,
            on_first_audio_frame,
            diagnostics,
        }
    }

    /// Seed the preferred output device and jitter hint from configuration.
    pub fn with_preferences(
        self,
        output_device_id: Option<String>,
        jitter_buffer_ms: Option<u64>,
    ) -> Self {
        {
            let mut state = self.state.lock();
            state.output_device_id = output_device_id;
            state.jitter_buffer_ms = jitter_buffer_ms;
        }
        self
    }

    /// Add every local track and a receive-only audio transceiver.
    ///
    /// Track failures are fatal for the attempt; the transceiver is best-effort.
    pub async fn attach_local_tracks(
        &self,
        peer: &dyn PeerConnection,
        stream: &MediaStream,
    ) -> RealtimeResult<()> {
        for track in stream.tracks() {
            peer.add_track(track.clone()).await?;
        }

        if let Err(e) = peer.add_recvonly_audio_transceiver().await {
            self.diagnostics.warn(
                "Failed to add receive-only audio transceiver",
                Some(json!({ "error": e.to_string() })),
            );
        }
        Ok(())
    }

    /// Capture an inbound remote track.
    pub async fn on_remote_track(&self, event: RemoteTrackEvent) {
        let stream = event
            .streams
            .first()
            .cloned()
            .unwrap_or_else(|| MediaStream::from_track(event.track.clone()));
        let track_id = event.track.id();
        let muted = event.track.muted();

        let (sink, jitter_buffer_ms) = {
            let mut state = self.state.lock();
            state.remote_stream = Some(stream.clone());
            if muted {
                state.pending_unmute.insert(track_id.clone());
            }
            (state.sink.clone(), state.jitter_buffer_ms)
        };

        self.diagnostics.log(
            LogLevel::Info,
            "Remote track received",
            Some(json!({ "track_id": track_id, "stream_id": stream.id(), "muted": muted })),
        );

        if let (Some(receiver), Some(ms)) = (event.receiver.as_ref(), jitter_buffer_ms) {
            self.apply_jitter_hint(receiver.as_ref(), ms);
        }

        if let Some(sink) = sink {
            sink.attach(Some(stream.clone()));
        }

        if let Some(callback) = &self.on_remote_stream {
            callback(stream);
        }

        if !muted {
            self.fire_first_audio_frame();
        }
    }

    /// A previously muted remote track started flowing.
    ///
    /// Fires the first-frame callback once per pending track; repeated or
    /// unknown unmutes are ignored.
    pub fn handle_unmute(&self, track_id: &str) {
        let was_pending = self.state.lock().pending_unmute.remove(track_id);
        if was_pending {
            self.fire_first_audio_frame();
        }
    }

    /// Bind (or unbind with `None`) the output sink. Last writer wins.
    pub async fn bind_sink(&self, sink: Option<Arc<dyn AudioSink>>) {
        let (previous, stream, device_id) = {
            let mut state = self.state.lock();
            let previous = std::mem::replace(&mut state.sink, sink.clone());
            (
                previous,
                state.remote_stream.clone(),
                state.output_device_id.clone(),
            )
        };

        if let Some(previous) = previous
            && !sink.as_ref().is_some_and(|s| Arc::ptr_eq(s, &previous))
        {
            previous.attach(None);
        }

        if let Some(sink) = sink {
            sink.attach(stream);
            if let Some(device_id) = device_id {
                self.route_output(sink.as_ref(), &device_id).await;
            }
        }
    }

    /// Store the preferred output device and reapply it to the bound sink.
    pub async fn set_output_device_id(&self, device_id: &str) {
        let sink = {
            let mut state = self.state.lock();
            state.output_device_id = Some(device_id.to_string());
            state.sink.clone()
        };

        if let Some(sink) = sink {
            self.route_output(sink.as_ref(), device_id).await;
        }
    }

    /// Store the jitter hint and reapply it to every current audio receiver.
    pub async fn set_jitter_buffer_ms(&self, ms: u64, peer: Option<&dyn PeerConnection>) {
        self.state.lock().jitter_buffer_ms = Some(ms);

        let Some(peer) = peer else {
            return;
        };
        for receiver in peer.audio_receivers().await {
            self.apply_jitter_hint(receiver.as_ref(), ms);
        }
    }

    pub fn output_device_id(&self) -> Option<String> {
        self.state.lock().output_device_id.clone()
    }

    pub fn remote_stream(&self) -> Option<MediaStream> {
        self.state.lock().remote_stream.clone()
    }

    /// Forget first-frame bookkeeping belonging to a torn-down session.
    pub fn reset_session(&self) {
        self.state.lock().pending_unmute.clear();
    }

    /// Drop the remote stream and detach it from the bound sink.
    pub fn clear_remote_stream(&self) {
        let sink = {
            let mut state = self.state.lock();
            state.pending_unmute.clear();
            state.remote_stream.take();
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.attach(None);
        }
    }

    async fn route_output(&self, sink: &dyn AudioSink, device_id: &str) {
        if !sink.supports_output_routing() {
            tracing::debug!(device_id, "Sink does not support output routing");
            return;
        }
        if let Err(e) = sink.set_output_device(device_id).await {
            self.diagnostics.warn(
                "Failed to route remote audio to output device",
                Some(json!({ "device_id": device_id, "error": e.to_string() })),
            );
        }
    }

    fn apply_jitter_hint(&self, receiver: &dyn RtpReceiver, ms: u64) {
        let seconds = ms as f64 / 1000.0;
        if let Err(e) = receiver.set_playout_delay_hint(seconds) {
            self.diagnostics.warn(
                "Failed to apply jitter buffer hint",
                Some(json!({ "jitter_buffer_ms": ms, "error": e.to_string() })),
            );
        }
    }

    fn fire_first_audio_frame(&self) {
        self.diagnostics.debug("First remote audio frame available");
        if let Some(callback) = &self.on_first_audio_frame {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::RealtimeError;
    use crate::core::rtc::{MediaTrack, TrackKind};
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestTrack {
        id: String,
        muted: bool,
    }

    impl MediaTrack for TestTrack {
        fn id(&self) -> String {
            self.id.clone()
        }

        fn kind(&self) -> TrackKind {
            TrackKind::Audio
        }

        fn muted(&self) -> bool {
            self.muted
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Default)]
    struct TestReceiver {
        hints: Mutex<Vec<f64>>,
    }

    impl RtpReceiver for TestReceiver {
        fn set_playout_delay_hint(&self, seconds: f64) -> RealtimeResult<()> {
            self.hints.lock().push(seconds);
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestSink {
        routing: bool,
        fail_routing: bool,
        attached: Mutex<Vec<Option<String>>>,
        devices: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AudioSink for TestSink {
        fn attach(&self, stream: Option<MediaStream>) {
            self.attached.lock().push(stream.map(|s| s.id().to_string()));
        }

        fn supports_output_routing(&self) -> bool {
            self.routing
        }

        async fn set_output_device(&self, device_id: &str) -> RealtimeResult<()> {
            if self.fail_routing {
                return Err(RealtimeError::InvalidConfiguration("no such device".into()));
            }
            self.devices.lock().push(device_id.to_string());
            Ok(())
        }
    }

    fn track_event(
        id: &str,
        muted: bool,
        receiver: Option<Arc<dyn RtpReceiver>>,
    ) -> RemoteTrackEvent {
        RemoteTrackEvent {
            track: Arc::new(TestTrack {
                id: id.to_string(),
                muted,
            }),
            receiver,
            streams: Vec::new(),
        }
    }

    fn counting_pipeline() -> (MediaPipeline, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let pipeline = MediaPipeline::new(
            None,
            Some(Arc::new(move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })),
            Diagnostics::default(),
        );
        (pipeline, count)
    }

    #[tokio::test]
    async fn test_unmuted_track_fires_first_frame_immediately() {
        let (pipeline, count) = counting_pipeline();
        pipeline.on_remote_track(track_event("t1", false, None)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // A stray unmute afterwards does not fire again
        pipeline.handle_unmute("t1");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_muted_track_fires_once_after_unmute() {
        let (pipeline, count) = counting_pipeline();
        pipeline.on_remote_track(track_event("t1", true, None)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        pipeline.handle_unmute("t1");
        pipeline.handle_unmute("t1");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_stream_built_from_lone_track() {
        let seen: Arc<Mutex<Vec<MediaStream>>> = Arc::default();
        let seen_clone = seen.clone();
        let pipeline = MediaPipeline::new(
            Some(Arc::new(move |stream| seen_clone.lock().push(stream))),
            None,
            Diagnostics::default(),
        );

        pipeline.on_remote_track(track_event("remote", false, None)).await;

        let stream = pipeline.remote_stream().unwrap();
        assert_eq!(stream.tracks()[0].id(), "remote");
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].id(), stream.id());
    }

    #[tokio::test]
    async fn test_remote_stream_prefers_event_stream() {
        let pipeline = MediaPipeline::new(None, None, Diagnostics::default());
        let track: Arc<dyn MediaTrack> = Arc::new(TestTrack {
            id: "remote".into(),
            muted: false,
        });
        pipeline
            .on_remote_track(RemoteTrackEvent {
                track: track.clone(),
                receiver: None,
                streams: vec![MediaStream::new("server-stream", vec![track])],
            })
            .await;
        assert_eq!(pipeline.remote_stream().unwrap().id(), "server-stream");
    }

    #[tokio::test]
    async fn test_jitter_hint_applied_in_seconds() {
        let pipeline = MediaPipeline::new(None, None, Diagnostics::default())
            .with_preferences(None, Some(120));
        let receiver = Arc::new(TestReceiver::default());

        pipeline
            .on_remote_track(track_event("t1", false, Some(receiver.clone())))
            .await;
        assert_eq!(*receiver.hints.lock(), vec![0.12]);
    }

    #[tokio::test]
    async fn test_sink_binding_and_routing() {
        let pipeline = MediaPipeline::new(None, None, Diagnostics::default())
            .with_preferences(Some("speakers".into()), None);
        pipeline.on_remote_track(track_event("t1", false, None)).await;
        let stream_id = pipeline.remote_stream().unwrap().id().to_string();

        let sink = Arc::new(TestSink {
            routing: true,
            ..Default::default()
        });
        pipeline.bind_sink(Some(sink.clone())).await;
        assert_eq!(*sink.attached.lock(), vec![Some(stream_id)]);
        assert_eq!(*sink.devices.lock(), vec!["speakers".to_string()]);

        pipeline.set_output_device_id("headset").await;
        assert_eq!(
            *sink.devices.lock(),
            vec!["speakers".to_string(), "headset".to_string()]
        );

        pipeline.bind_sink(None).await;
        assert_eq!(sink.attached.lock().last(), Some(&None));
    }

    #[tokio::test]
    async fn test_routing_skipped_or_swallowed() {
        let pipeline = MediaPipeline::new(None, None, Diagnostics::default());

        let plain = Arc::new(TestSink::default());
        pipeline.bind_sink(Some(plain.clone())).await;
        pipeline.set_output_device_id("headset").await;
        assert!(plain.devices.lock().is_empty());

        let failing = Arc::new(TestSink {
            routing: true,
            fail_routing: true,
            ..Default::default()
        });
        pipeline.bind_sink(Some(failing.clone())).await;
        pipeline.set_output_device_id("missing").await;
        assert!(failing.devices.lock().is_empty());
        assert_eq!(pipeline.output_device_id().as_deref(), Some("missing"));
    }
}
