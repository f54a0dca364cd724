//! The `oai-events` control channel.
//!
//! Sends are fire-and-forget: anything attempted while the channel is not open
//! is dropped with a warning, and transport failures are logged and swallowed.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use super::diagnostics::Diagnostics;
use super::messages::ClientEvent;
use super::session::SessionConfigStore;
use crate::core::rtc::DataChannel;

pub struct ControlChannel {
    channel: Mutex<Option<Arc<dyn DataChannel>>>,
    diagnostics: Diagnostics,
}

impl ControlChannel {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            channel: Mutex::new(None),
            diagnostics,
        }
    }

    /// Install the channel of a new session, returning the previous one.
    pub fn replace(&self, channel: Option<Arc<dyn DataChannel>>) -> Option<Arc<dyn DataChannel>> {
        std::mem::replace(&mut *self.channel.lock(), channel)
    }

    pub fn take(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel.lock().take()
    }

    pub fn is_open(&self) -> bool {
        self.channel.lock().as_ref().is_some_and(|c| c.is_open())
    }

    /// Serialize and send one event. Returns whether it was handed to the channel.
    pub async fn send(&self, event: &ClientEvent) -> bool {
        let channel = self.channel.lock().clone();
        let Some(channel) = channel.filter(|c| c.is_open()) else {
            self.diagnostics.warn(
                "Control channel not open, dropping event",
                Some(json!({ "type": event.type_name() })),
            );
            return false;
        };

        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                self.diagnostics.error(
                    "Failed to serialize control event",
                    Some(json!({ "type": event.type_name(), "error": e.to_string() })),
                );
                return false;
            }
        };

        match channel.send_text(text).await {
            Ok(()) => {
                tracing::debug!(event_type = event.type_name(), "Sent control event");
                true
            }
            Err(e) => {
                self.diagnostics.warn(
                    "Control channel send failed",
                    Some(json!({ "type": event.type_name(), "error": e.to_string() })),
                );
                false
            }
        }
    }

    /// Push the current session configuration if there is anything to push
    /// and the channel is open.
    pub async fn flush_session_update(&self, store: &SessionConfigStore) -> bool {
        if !self.is_open() {
            return false;
        }
        match store.build_update_payload() {
            Some(event) => self.send(&event).await,
            None => {
                tracing::debug!("Session configuration empty, skipping session.update");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::SessionConfig;
    use crate::core::realtime::{RealtimeError, RealtimeResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestChannel {
        open: AtomicBool,
        fail: bool,
        sent: Mutex<Vec<String>>,
    }

    impl TestChannel {
        fn new(open: bool, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                open: AtomicBool::new(open),
                fail,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DataChannel for TestChannel {
        fn label(&self) -> String {
            "oai-events".to_string()
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn send_text(&self, text: String) -> RealtimeResult<()> {
            if self.fail {
                return Err(RealtimeError::DataChannel("buffer full".into()));
            }
            self.sent.lock().push(text);
            Ok(())
        }

        async fn close(&self) -> RealtimeResult<()> {
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_without_channel_is_dropped() {
        let control = ControlChannel::new(Diagnostics::default());
        assert!(!control.send(&ClientEvent::UserSpeechStart).await);
    }

    #[tokio::test]
    async fn test_send_on_closed_channel_is_dropped() {
        let control = ControlChannel::new(Diagnostics::default());
        let channel = TestChannel::new(false, false);
        control.replace(Some(channel.clone()));

        assert!(!control.send(&ClientEvent::UserSpeechStart).await);
        assert!(channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        let control = ControlChannel::new(Diagnostics::default());
        control.replace(Some(TestChannel::new(true, true)));
        assert!(!control.send(&ClientEvent::UserSpeechStop).await);
    }

    #[tokio::test]
    async fn test_flush_session_update() {
        let control = ControlChannel::new(Diagnostics::default());
        let channel = TestChannel::new(true, false);
        control.replace(Some(channel.clone()));

        let store = SessionConfigStore::new("gpt-realtime", SessionConfig::default());
        assert!(!control.flush_session_update(&store).await);
        assert!(channel.sent.lock().is_empty());

        store.update(&SessionConfig {
            instructions: Some("Hi".to_string()),
            ..Default::default()
        });
        assert!(control.flush_session_update(&store).await);

        let sent: serde_json::Value = serde_json::from_str(&channel.sent.lock()[0]).unwrap();
        assert_eq!(sent["type"], "session.update");
        assert_eq!(sent["session"]["instructions"], "Hi");
    }
}
