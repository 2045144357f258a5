use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutcome {
    Success,
    Rejected,
    Failed,
}

/// Structured "action occurred" event emitted after every successful
/// mutation. Delivery and storage are the audit collaborator's concern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub event_id: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub action: String,
    pub actor: String,
    pub outcome: ActionOutcome,
    /// Before/after values and any numeric context, keyed by field name.
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl ActionEvent {
    pub fn new(
        entity_kind: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
        actor: impl Into<String>,
        outcome: ActionOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            entity_kind: entity_kind.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: ActionEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<ActionEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<ActionEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: ActionEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Runtime sink: forwards events to the tracing pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: ActionEvent) {
        tracing::info!(
            entity_kind = %event.entity_kind,
            entity_id = %event.entity_id,
            action = %event.action,
            actor = %event.actor,
            outcome = ?event.outcome,
            metadata = ?event.metadata,
            "audit event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{ActionEvent, ActionOutcome, AuditSink, InMemoryAuditSink};

    #[test]
    fn in_memory_sink_collects_events_in_order() {
        let sink = InMemoryAuditSink::default();
        sink.emit(ActionEvent::new("stage_record", "ENG-1", "submit", "u-1", ActionOutcome::Success));
        sink.emit(
            ActionEvent::new("stage_record", "ENG-1", "approve", "u-2", ActionOutcome::Success)
                .with_metadata("step", "1"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "submit");
        assert_eq!(events[1].metadata.get("step").map(String::as_str), Some("1"));
    }
}
