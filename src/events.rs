//! Operator-facing events emitted while the post-upgrade steps run.
//!
//! Decision logic reports through an injected [`EventSink`] instead of writing
//! to stdout, so the same run can feed logs, tests, or any other frontend.

use std::fmt;

use tracing::{info, warn};

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warning,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "Info"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// A single event tied to the step that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeEvent {
    pub step: &'static str,
    pub level: EventLevel,
    pub message: String,
}

impl UpgradeEvent {
    pub fn info(step: &'static str, message: impl Into<String>) -> Self {
        Self {
            step,
            level: EventLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(step: &'static str, message: impl Into<String>) -> Self {
        Self {
            step,
            level: EventLevel::Warning,
            message: message.into(),
        }
    }
}

/// Receiver for upgrade events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UpgradeEvent);
}

/// Sink that forwards events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: UpgradeEvent) {
        match event.level {
            EventLevel::Info => info!(step = event.step, "{}", event.message),
            EventLevel::Warning => warn!(step = event.step, "WARNING: {}", event.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors() {
        let event = UpgradeEvent::warning("apiserver-cert", "backup failed");
        assert_eq!(event.level, EventLevel::Warning);
        assert_eq!(event.step, "apiserver-cert");
        assert_eq!(event.message, "backup failed");

        let event = UpgradeEvent::info("self-hosting", "converting");
        assert_eq!(event.level, EventLevel::Info);
    }

    #[test]
    fn test_level_display() {
        assert_eq!(EventLevel::Info.to_string(), "Info");
        assert_eq!(EventLevel::Warning.to_string(), "Warning");
    }

    #[test]
    fn test_tracing_sink_accepts_events() {
        let sink = TracingEventSink;
        sink.emit(UpgradeEvent::info("upload-config", "uploaded"));
        sink.emit(UpgradeEvent::warning("apiserver-cert", "skipped"));
    }
}
