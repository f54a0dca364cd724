pub mod realtime;
pub mod rtc;

// Re-export commonly used types for convenience
pub use realtime::{
    ConnectOptions, ConnectionState, ConnectionStatus, HandshakeMode, RealtimeClient,
    RealtimeClientCallbacks, RealtimeError, RealtimeResult, ReconnectionConfig, SessionConfig,
};
pub use rtc::{
    AudioSink, DataChannel, IceServer, MediaStream, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerEvent,
};
