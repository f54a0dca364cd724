//! Realtime voice client.
//!
//! Ties together the state machine, the handshake negotiator, the session
//! config store, the media pipeline, the control channel and the reconnection
//! supervisor.
//!
//! # Session lifecycle
//!
//! Each negotiation builds a fresh peer connection with its own event channel
//! and pump task. Starting a new negotiation always tears the previous one
//! down first, and teardown aborts the old pump, so a closed connection can
//! never emit state changes after a fresher one exists.
//!
//! # Cancellation
//!
//! In-flight handshakes are not aborted by `disconnect()`/`destroy()`. Their
//! results are discarded instead: every negotiation carries the epoch it was
//! started in and checks it before installing anything.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use super::base::{
    ConnectionState, LogLevel, RealtimeClientCallbacks, RealtimeError, RealtimeResult,
};
use super::control::ControlChannel;
use super::diagnostics::Diagnostics;
use super::handshake::HandshakeNegotiator;
use super::media::MediaPipeline;
use super::messages::{CONTROL_CHANNEL_LABEL, ClientEvent, SPEECH_STARTED_EVENT, SPEECH_STOPPED_EVENT};
use super::reconnect::{ReconnectCounters, ReconnectDecision, ReconnectionSupervisor};
use super::session::{ConfirmedSession, SessionConfig, SessionConfigStore};
use crate::config::ClientConfig;
use crate::core::rtc::{
    AudioSink, IceServer, MediaStream, PeerConnection, PeerConnectionConfig,
    PeerConnectionFactory, PeerConnectionState, PeerEvent, PeerEventReceiver,
};
use crate::utils::validate_endpoint_url;

/// Arguments of [`RealtimeClient::connect`].
#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// Live microphone stream to send
    pub stream: Option<MediaStream>,
    /// Overrides the configured API key
    pub api_key: Option<String>,
    /// Overrides the configured ICE servers; kept across reconnects
    pub ice_servers: Option<Vec<IceServer>>,
}

impl ConnectOptions {
    pub fn new(stream: MediaStream, api_key: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            api_key: Some(api_key.into()),
            ice_servers: None,
        }
    }

    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServer>) -> Self {
        self.ice_servers = Some(ice_servers);
        self
    }
}

/// Per-negotiation resources plus what a reconnect needs to replay.
#[derive(Default)]
struct RuntimeState {
    peer: Option<Arc<dyn PeerConnection>>,
    pump: Option<JoinHandle<()>>,
    /// Identifies the session whose pump may act on client state
    generation: u64,
    stream: Option<MediaStream>,
    api_key: Option<Zeroizing<String>>,
    ice_servers: Vec<IceServer>,
}

struct ClientInner {
    callbacks: RealtimeClientCallbacks,
    diagnostics: Diagnostics,
    factory: Arc<dyn PeerConnectionFactory>,
    negotiator: HandshakeNegotiator,
    session_config: SessionConfigStore,
    media: MediaPipeline,
    control: ControlChannel,
    supervisor: ReconnectionSupervisor,
    default_api_key: Option<Zeroizing<String>>,

    state: Mutex<ConnectionState>,
    /// Serializes state writes with their callback invocation
    transition: Mutex<()>,
    confirmed: Mutex<Option<ConfirmedSession>>,
    runtime: Mutex<RuntimeState>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    /// Only one negotiation runs at a time
    negotiation: tokio::sync::Mutex<()>,
    /// Bumped by every connect/disconnect; stale negotiations compare against it
    epoch: AtomicU64,
    disposed: AtomicBool,
}

/// WebRTC realtime voice client.
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    /// Create a client. Nothing is negotiated until [`connect`](Self::connect).
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` when the endpoint is not a valid
    /// negotiation URL or the reconnect delay table is empty.
    pub fn new(
        config: &ClientConfig,
        callbacks: RealtimeClientCallbacks,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> RealtimeResult<Self> {
        config
            .validate()
            .map_err(RealtimeError::InvalidConfiguration)?;
        let endpoint = validate_endpoint_url(&config.endpoint)
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;

        let diagnostics = Diagnostics::new(callbacks.on_log.clone());
        let negotiator = HandshakeNegotiator::new(
            endpoint,
            config.model.clone(),
            config.handshake_mode,
            diagnostics.clone(),
        );
        let media = MediaPipeline::new(
            callbacks.on_remote_stream.clone(),
            callbacks.on_first_audio_frame.clone(),
            diagnostics.clone(),
        )
        .with_preferences(config.output_device_id.clone(), config.jitter_buffer_ms);

        let inner = ClientInner {
            diagnostics: diagnostics.clone(),
            factory,
            negotiator,
            session_config: SessionConfigStore::new(config.model.clone(), config.session.clone()),
            media,
            control: ControlChannel::new(diagnostics),
            supervisor: ReconnectionSupervisor::new(config.reconnection.clone()),
            default_api_key: config.api_key.clone().map(Zeroizing::new),
            callbacks,
            state: Mutex::new(ConnectionState::Idle),
            transition: Mutex::new(()),
            confirmed: Mutex::new(None),
            runtime: Mutex::new(RuntimeState {
                ice_servers: config.ice_servers.clone(),
                ..Default::default()
            }),
            reconnect_task: Mutex::new(None),
            negotiation: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        };

        tracing::debug!(
            endpoint = %config.endpoint,
            model = %config.model,
            mode = %config.handshake_mode,
            "Realtime client created"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Current connection state.
    pub fn get_state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    /// The captured remote stream, if a remote track has arrived.
    pub fn get_remote_stream(&self) -> Option<MediaStream> {
        self.inner.media.remote_stream()
    }

    /// Connect with the given stream and credentials.
    ///
    /// # Errors
    /// - `Disposed` after [`destroy`](Self::destroy)
    /// - `MissingApiKey` when neither the options nor the configuration carry one
    /// - `MissingInputStream` without a stream
    /// - any handshake or peer connection error; the state then becomes `error`
    pub async fn connect(&self, options: ConnectOptions) -> RealtimeResult<()> {
        let inner = &self.inner;
        inner.ensure_live()?;

        let api_key = options
            .api_key
            .map(Zeroizing::new)
            .or_else(|| inner.default_api_key.clone())
            .filter(|k| !k.trim().is_empty())
            .ok_or(RealtimeError::MissingApiKey)?;
        let stream = options.stream.ok_or(RealtimeError::MissingInputStream)?;

        inner.cancel_reconnect();
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut runtime = inner.runtime.lock();
            runtime.stream = Some(stream);
            runtime.api_key = Some(api_key);
            if let Some(ice_servers) = options.ice_servers {
                runtime.ice_servers = ice_servers;
            }
        }

        inner.supervisor.arm();
        inner.update_state(ConnectionState::Connecting);

        match inner.establish(epoch).await {
            Ok(()) => Ok(()),
            Err(e) if inner.is_stale(epoch) => Err(e),
            Err(e) => {
                inner.supervisor.disarm();
                inner.diagnostics.error(
                    "Connect failed",
                    Some(json!({ "error": e.to_string() })),
                );
                inner.update_state(ConnectionState::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Stop reconnecting, tear the session down and return to `idle`.
    pub async fn disconnect(&self) {
        self.inner.shutdown().await;
    }

    /// Disconnect and make the client unusable. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown().await;
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.diagnostics.debug("Client destroyed");
    }

    /// Signal local barge-in start/stop over the control channel.
    pub async fn notify_speech_activity(&self, active: bool) {
        self.inner
            .control
            .send(&ClientEvent::speech_activity(active))
            .await;
    }

    /// Merge `patch` into the desired session configuration and push it if
    /// the control channel is open.
    ///
    /// # Errors
    /// Returns `Disposed` after [`destroy`](Self::destroy).
    pub async fn update_session_config(
        &self,
        patch: SessionConfig,
    ) -> RealtimeResult<Arc<SessionConfig>> {
        self.inner.ensure_live()?;
        let updated = self.inner.session_config.update(&patch);
        self.inner
            .control
            .flush_session_update(&self.inner.session_config)
            .await;
        Ok(updated)
    }

    pub fn get_session_config_snapshot(&self) -> Arc<SessionConfig> {
        self.inner.session_config.snapshot()
    }

    /// Last session state confirmed by the server via `session.updated`.
    pub fn confirmed_session(&self) -> Option<ConfirmedSession> {
        self.inner.confirmed.lock().clone()
    }

    /// The initial handshake descriptor for the current configuration.
    pub fn initial_descriptor(&self) -> Value {
        serde_json::to_value(self.inner.session_config.build_initial_descriptor())
            .unwrap_or(Value::Null)
    }

    /// Bind (or unbind with `None`) the sink the remote stream plays on.
    pub async fn bind_remote_audio_element(&self, sink: Option<Arc<dyn AudioSink>>) {
        self.inner.media.bind_sink(sink).await;
    }

    pub async fn set_output_device_id(&self, device_id: &str) {
        self.inner.media.set_output_device_id(device_id).await;
    }

    /// Set the playout-delay hint and apply it to every current audio receiver.
    pub async fn set_jitter_buffer_ms(&self, ms: u64) {
        let peer = self.inner.runtime.lock().peer.clone();
        self.inner
            .media
            .set_jitter_buffer_ms(ms, peer.as_deref())
            .await;
    }

    /// Reconnection counters, for diagnostics.
    pub fn reconnect_counters(&self) -> ReconnectCounters {
        self.inner.supervisor.counters()
    }
}

impl ClientInner {
    fn ensure_live(&self) -> RealtimeResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(RealtimeError::Disposed);
        }
        Ok(())
    }

    fn is_stale(&self, epoch: u64) -> bool {
        self.disposed.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch
    }

    fn stale_error(&self) -> RealtimeError {
        if self.disposed.load(Ordering::SeqCst) {
            RealtimeError::Disposed
        } else {
            RealtimeError::NotConnected
        }
    }

    /// Set the state and notify synchronously. No-op once disposed.
    fn update_state(&self, next: ConnectionState) {
        let _transition = self.transition.lock();
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        *self.state.lock() = next.clone();

        self.diagnostics.log(
            LogLevel::Debug,
            "Connection state changed",
            Some(json!({
                "status": next.status().to_string(),
                "attempt": next.attempt(),
                "error": next.error(),
            })),
        );

        if let Some(callback) = &self.callbacks.on_state_change {
            callback(next);
        }
    }

    /// Build a new session and negotiate it.
    async fn establish(self: &Arc<Self>, epoch: u64) -> RealtimeResult<()> {
        let _negotiating = self.negotiation.lock().await;
        if self.is_stale(epoch) {
            return Err(self.stale_error());
        }

        let result = self.negotiate_session(epoch).await;
        if result.is_err() {
            self.teardown_session().await;
        }
        result
    }

    async fn negotiate_session(self: &Arc<Self>, epoch: u64) -> RealtimeResult<()> {
        let (stream, api_key, ice_servers) = {
            let runtime = self.runtime.lock();
            (
                runtime.stream.clone(),
                runtime.api_key.clone(),
                runtime.ice_servers.clone(),
            )
        };
        let api_key = api_key.ok_or(RealtimeError::MissingApiKey)?;
        let stream = stream.ok_or(RealtimeError::MissingInputStream)?;

        self.teardown_session().await;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peer = self
            .factory
            .create(PeerConnectionConfig { ice_servers }, events_tx)
            .await?;

        let installed = {
            let mut runtime = self.runtime.lock();
            if self.is_stale(epoch) {
                false
            } else {
                runtime.generation += 1;
                let generation = runtime.generation;
                runtime.peer = Some(peer.clone());
                runtime.pump = Some(tokio::spawn(run_event_pump(
                    Arc::downgrade(self),
                    generation,
                    events_rx,
                )));
                true
            }
        };
        if !installed {
            let _ = peer.close().await;
            return Err(self.stale_error());
        }

        self.media.attach_local_tracks(peer.as_ref(), &stream).await?;
        let channel = peer.create_data_channel(CONTROL_CHANNEL_LABEL, true).await?;
        self.control.replace(Some(channel));

        let descriptor = self.session_config.build_initial_descriptor();
        self.negotiator
            .negotiate(peer.as_ref(), api_key.as_str(), &descriptor)
            .await?;

        if self.is_stale(epoch) {
            return Err(self.stale_error());
        }

        // Reconnect case: the channel may already be open
        self.control.flush_session_update(&self.session_config).await;
        Ok(())
    }

    /// Close the control channel and peer connection of the current session.
    async fn teardown_session(&self) {
        let (peer, pump) = {
            let mut runtime = self.runtime.lock();
            (runtime.peer.take(), runtime.pump.take())
        };
        if let Some(pump) = pump {
            pump.abort();
        }

        if let Some(channel) = self.control.take()
            && let Err(e) = channel.close().await
        {
            tracing::debug!(error = %e, "Failed to close control channel");
        }
        if let Some(peer) = peer
            && let Err(e) = peer.close().await
        {
            tracing::debug!(error = %e, "Failed to close peer connection");
        }

        self.media.reset_session();
    }

    async fn shutdown(&self) {
        self.supervisor.disarm();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_reconnect();
        self.teardown_session().await;
        self.media.clear_remote_stream();
        {
            let mut runtime = self.runtime.lock();
            runtime.stream = None;
            runtime.api_key = None;
        }
        if *self.state.lock() != ConnectionState::Idle {
            self.update_state(ConnectionState::Idle);
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
    }

    fn can_replay(&self) -> bool {
        let runtime = self.runtime.lock();
        runtime.stream.is_some() && runtime.api_key.is_some()
    }

    /// React to a transport drop.
    fn schedule_reconnect(self: &Arc<Self>) {
        let mut task_slot = self.reconnect_task.lock();

        // An attempt that negotiated but never reached `connected`
        if task_slot.as_ref().is_some_and(|t| t.is_finished()) {
            task_slot.take();
            self.supervisor.release();
        }

        match self.supervisor.schedule(self.can_replay()) {
            ReconnectDecision::Skip => {}
            ReconnectDecision::Exhausted => {
                drop(task_slot);
                self.fail_reconnect("Reconnect attempts exhausted".to_string());
            }
            ReconnectDecision::Attempt { attempt, delay } => {
                let epoch = self.epoch.load(Ordering::SeqCst);
                *task_slot = Some(tokio::spawn(run_reconnect(
                    Arc::downgrade(self),
                    epoch,
                    attempt,
                    delay,
                )));
            }
        }
    }

    fn fail_reconnect(&self, message: String) {
        self.diagnostics.error(
            "Reconnection gave up",
            Some(json!({ "error": message })),
        );
        self.update_state(ConnectionState::Error { message });
    }

    async fn handle_peer_event(self: &Arc<Self>, event: PeerEvent) {
        match event {
            PeerEvent::ConnectionStateChanged(state) => self.handle_peer_state(state).await,
            PeerEvent::Track(track_event) => self.media.on_remote_track(track_event).await,
            PeerEvent::TrackUnmuted { track_id } => self.media.handle_unmute(&track_id),
            PeerEvent::DataChannelOpen { label } => {
                self.diagnostics.debug("Control channel open");
                if label == CONTROL_CHANNEL_LABEL {
                    self.control.flush_session_update(&self.session_config).await;
                }
            }
            PeerEvent::DataChannelMessage { label, text } => {
                if label == CONTROL_CHANNEL_LABEL {
                    self.handle_control_message(&text);
                }
            }
            PeerEvent::DataChannelClosed { label } => {
                tracing::debug!(label = %label, "Data channel closed");
            }
        }
    }

    async fn handle_peer_state(self: &Arc<Self>, state: PeerConnectionState) {
        tracing::debug!(state = ?state, "Peer connection state changed");
        match state {
            PeerConnectionState::Connected => {
                self.supervisor.on_connected();
                // A running attempt finishes on its own once establish returns
                self.reconnect_task.lock().take();
                self.update_state(ConnectionState::Connected);
                self.control.flush_session_update(&self.session_config).await;
            }
            PeerConnectionState::Disconnected | PeerConnectionState::Failed => {
                self.diagnostics.warn(
                    "Peer connection lost",
                    Some(json!({ "state": format!("{state:?}").to_lowercase() })),
                );
                if self.supervisor.should_reconnect() {
                    self.schedule_reconnect();
                }
            }
            PeerConnectionState::New
            | PeerConnectionState::Connecting
            | PeerConnectionState::Closed => {}
        }
    }

    fn handle_control_message(&self, text: &str) {
        let message_type = serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string));

        match message_type.as_deref() {
            Some(SPEECH_STARTED_EVENT) => self.diagnostics.debug("Server detected speech start"),
            Some(SPEECH_STOPPED_EVENT) => self.diagnostics.debug("Server detected speech stop"),
            _ => {}
        }

        if let Some(confirmed) = SessionConfigStore::parse_inbound(text, &self.diagnostics) {
            self.diagnostics.log(
                LogLevel::Info,
                "Session updated",
                Some(json!({
                    "voice": confirmed.voice,
                    "instructions": confirmed.instructions.is_some(),
                    "turn_detection": confirmed.turn_detection,
                })),
            );
            *self.confirmed.lock() = Some(confirmed.clone());
            if let Some(callback) = &self.callbacks.on_session_updated {
                callback(confirmed);
            }
        }
    }
}

/// Forward one session's peer events to the client until the session ends.
async fn run_event_pump(client: Weak<ClientInner>, generation: u64, mut events: PeerEventReceiver) {
    while let Some(event) = events.recv().await {
        let Some(inner) = client.upgrade() else {
            break;
        };
        if inner.runtime.lock().generation != generation {
            break;
        }
        inner.handle_peer_event(event).await;
    }
    tracing::debug!(generation, "Peer event pump finished");
}

/// Run scheduled attempts until one negotiates, the cap is hit or the
/// client stops wanting to reconnect.
async fn run_reconnect(
    client: Weak<ClientInner>,
    epoch: u64,
    mut attempt: u32,
    mut delay: std::time::Duration,
) {
    loop {
        {
            let Some(inner) = client.upgrade() else {
                return;
            };
            if inner.is_stale(epoch) || !inner.supervisor.should_reconnect() {
                return;
            }
            inner.diagnostics.log(
                LogLevel::Info,
                "Scheduling reconnect",
                Some(json!({ "attempt": attempt, "delay_ms": delay.as_millis() as u64 })),
            );
            inner.update_state(ConnectionState::Reconnecting { attempt });
        }

        tokio::time::sleep(delay).await;

        let Some(inner) = client.upgrade() else {
            return;
        };
        if inner.is_stale(epoch) || !inner.supervisor.should_reconnect() {
            return;
        }

        let error = match inner.establish(epoch).await {
            Ok(()) => return,
            Err(e) => e,
        };
        if inner.is_stale(epoch) {
            return;
        }
        inner.diagnostics.warn(
            "Reconnect attempt failed",
            Some(json!({ "attempt": attempt, "error": error.to_string() })),
        );

        match inner.supervisor.attempt_failed() {
            ReconnectDecision::Attempt {
                attempt: next,
                delay: next_delay,
            } => {
                attempt = next;
                delay = next_delay;
            }
            ReconnectDecision::Exhausted => {
                inner.fail_reconnect(error.to_string());
                return;
            }
            ReconnectDecision::Skip => return,
        }
    }
}
