//! Telemetry collaborator seam.
//!
//! The core never ships events anywhere itself. It hands them to a
//! [`Telemetry`] implementation supplied by the host.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;

/// A single telemetry event.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub event_type: String,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn new(event_type: impl Into<String>, metadata: Value) -> Self {
        Self {
            event_type: event_type.into(),
            metadata,
            timestamp: Utc::now(),
        }
    }
}

pub trait Telemetry: Send + Sync {
    fn send(&self, event: TelemetryEvent);
}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn send(&self, event: TelemetryEvent) {
        tracing::info!(
            target: "xfidelity::telemetry",
            event_type = %event.event_type,
            metadata = %event.metadata,
            "telemetry event"
        );
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn send(&self, _event: TelemetryEvent) {}
}

/// Keeps events in memory; used by hosts that batch, and by tests.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events of one type, oldest first.
    pub fn events_of(&self, event_type: &str) -> Vec<TelemetryEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl Telemetry for MemoryTelemetry {
    fn send(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_telemetry_filters_by_type() {
        let telemetry = MemoryTelemetry::new();
        telemetry.send(TelemetryEvent::new("ruleFailure", json!({"rule": "a"})));
        telemetry.send(TelemetryEvent::new("exemptionAllowed", json!({"rule": "b"})));
        telemetry.send(TelemetryEvent::new("ruleFailure", json!({"rule": "c"})));

        let failures = telemetry.events_of("ruleFailure");
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[1].metadata["rule"], json!("c"));
        assert_eq!(telemetry.events().len(), 3);
    }
}
