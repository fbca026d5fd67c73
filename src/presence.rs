//! Read-only snapshot consumers
//!
//! The companion presence notifier shows live workout status outside the main
//! application UI. The diagnostic sink receives periodic human-readable dumps.
//! Both receive snapshots by value.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};

use crate::snapshot::MetricsSnapshot;

/// Companion "live presence" surface
pub trait PresenceNotifier: Send + Sync {
    fn started(&self, activity_symbol: &str);
    fn updated(&self, snapshot: MetricsSnapshot);
    fn ended(&self);
}

/// Destination for periodic diagnostic dumps
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, snapshot: MetricsSnapshot);
}

/// Emits diagnostic dumps as `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn record(&self, snapshot: MetricsSnapshot) {
        tracing::info!(
            elapsed_secs = snapshot.elapsed_time.as_secs(),
            "workout snapshot\n{}",
            snapshot
        );
    }
}

/// Presence notification as observed by [`RecordingPresence`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PresenceEvent {
    Started { activity_symbol: String },
    Updated { snapshot: MetricsSnapshot },
    Ended,
}

/// Presence notifier that keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingPresence {
    events: Mutex<Vec<PresenceEvent>>,
}

impl RecordingPresence {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: PresenceEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<PresenceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn started_count(&self) -> usize {
        self.count(|e| matches!(e, PresenceEvent::Started { .. }))
    }

    pub fn update_count(&self) -> usize {
        self.count(|e| matches!(e, PresenceEvent::Updated { .. }))
    }

    pub fn ended_count(&self) -> usize {
        self.count(|e| matches!(e, PresenceEvent::Ended))
    }

    pub fn last_snapshot(&self) -> Option<MetricsSnapshot> {
        self.events().into_iter().rev().find_map(|e| match e {
            PresenceEvent::Updated { snapshot } => Some(snapshot),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&PresenceEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

impl PresenceNotifier for RecordingPresence {
    fn started(&self, activity_symbol: &str) {
        self.push(PresenceEvent::Started {
            activity_symbol: activity_symbol.to_string(),
        });
    }

    fn updated(&self, snapshot: MetricsSnapshot) {
        self.push(PresenceEvent::Updated { snapshot });
    }

    fn ended(&self) {
        self.push(PresenceEvent::Ended);
    }
}

/// Diagnostic sink that keeps every dump in memory
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    dumps: Mutex<Vec<MetricsSnapshot>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dumps(&self) -> Vec<MetricsSnapshot> {
        self.dumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DiagnosticSink for RecordingDiagnostics {
    fn record(&self, snapshot: MetricsSnapshot) {
        self.dumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot);
    }
}
