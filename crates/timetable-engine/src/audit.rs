//! Audit events for committed writes and publish transitions.
//!
//! The engine reports; it does not store. Each successful write produces one
//! immutable [`AuditEvent`] handed synchronously to an [`AuditSink`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::model::Actor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SaveEntry,
    DeleteEntry,
    DeleteBlock,
    SaveSubstitution,
    DeleteSubstitution,
    Publish,
    Unpublish,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SaveEntry => "save_entry",
            AuditAction::DeleteEntry => "delete_entry",
            AuditAction::DeleteBlock => "delete_block",
            AuditAction::SaveSubstitution => "save_substitution",
            AuditAction::DeleteSubstitution => "delete_substitution",
            AuditAction::Publish => "publish",
            AuditAction::Unpublish => "unpublish",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub actor: Actor,
    /// Human-readable subject of the write, e.g. `class 7a day 1 periods 3-4`.
    pub target: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub at: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Emits every event as a structured `tracing` record on the
/// `timetable::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let before = event.before.as_ref().map(Value::to_string).unwrap_or_default();
        let after = event.after.as_ref().map(Value::to_string).unwrap_or_default();
        info!(
            target: "timetable::audit",
            action = event.action.as_str(),
            actor = %event.actor,
            subject = %event.target,
            at = %event.at.to_rfc3339(),
            before = %before,
            after = %after,
            "audit"
        );
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

impl<T: AuditSink + ?Sized> AuditSink for std::sync::Arc<T> {
    fn record(&self, event: &AuditEvent) {
        (**self).record(event)
    }
}
