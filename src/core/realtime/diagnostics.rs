//! Diagnostics fan-out: every entry goes to `tracing` and to the caller's
//! optional log sink.

use serde_json::Value;

use super::base::{LogCallback, LogLevel};

#[derive(Clone, Default)]
pub struct Diagnostics {
    sink: Option<LogCallback>,
}

impl Diagnostics {
    pub fn new(sink: Option<LogCallback>) -> Self {
        Self { sink }
    }

    pub fn log(&self, level: LogLevel, message: &str, data: Option<Value>) {
        match (level, data.as_ref()) {
            (LogLevel::Debug, Some(d)) => tracing::debug!(data = %d, "{}", message),
            (LogLevel::Debug, None) => tracing::debug!("{}", message),
            (LogLevel::Info, Some(d)) => tracing::info!(data = %d, "{}", message),
            (LogLevel::Info, None) => tracing::info!("{}", message),
            (LogLevel::Warn, Some(d)) => tracing::warn!(data = %d, "{}", message),
            (LogLevel::Warn, None) => tracing::warn!("{}", message),
            (LogLevel::Error, Some(d)) => tracing::error!(data = %d, "{}", message),
            (LogLevel::Error, None) => tracing::error!("{}", message),
        }

        if let Some(sink) = &self.sink {
            sink(level, message, data.as_ref());
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: &str, data: Option<Value>) {
        self.log(LogLevel::Warn, message, data);
    }

    pub fn error(&self, message: &str, data: Option<Value>) {
        self.log(LogLevel::Error, message, data);
    }
}
