//! mab_audit
//!
//! The broker's audit trail. Every `AuditEvent` is appended in the order
//! it is emitted, is emitted with redaction already applied where the
//! caller asked for it, and — if a sink is attached — is written as one
//! sorted-key JSON line per event.

use std::io::Write;

use mab_contract::RedactionRecord;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to encode audit event: {0}")]
    Encode(#[from] mab_common::CanonError),
    #[error("failed to write audit sink: {0}")]
    Sink(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub schema_version: String,
    pub event_type: String,
    pub event_id: String,
    pub occurred_at: String,
    pub request_id: String,
    pub trace_id: String,
    pub requester_id: String,
    pub service: String,
    pub environment: String,
    pub redactions: Vec<RedactionRecord>,
    pub payload: Value,
}

/// Per-call identity shared by every event emitted while handling one
/// request, so call sites don't have to repeat it.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub request_id: String,
    pub trace_id: String,
    pub requester_id: String,
}

pub struct AuditEmitter {
    schema_version: String,
    service: String,
    environment: String,
    events: Vec<AuditEvent>,
    sink: Option<Box<dyn Write + Send>>,
}

impl AuditEmitter {
    pub fn new(
        schema_version: impl Into<String>,
        service: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: schema_version.into(),
            service: service.into(),
            environment: environment.into(),
            events: Vec::new(),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Emit `payload` verbatim, with a caller-supplied redaction record
    /// (possibly empty). Use this when the payload was already redacted
    /// upstream, or when the event type is exempt from redaction.
    pub fn emit(
        &mut self,
        event_type: &str,
        ctx: &EventContext,
        payload: Value,
        redactions: Vec<RedactionRecord>,
    ) -> Result<(), AuditError> {
        let event = AuditEvent {
            schema_version: self.schema_version.clone(),
            event_type: event_type.to_string(),
            event_id: Uuid::new_v4().to_string(),
            occurred_at: now_rfc3339(),
            request_id: ctx.request_id.clone(),
            trace_id: ctx.trace_id.clone(),
            requester_id: ctx.requester_id.clone(),
            service: self.service.clone(),
            environment: self.environment.clone(),
            redactions,
            payload,
        };
        self.write_to_sink(&event)?;
        self.events.push(event);
        Ok(())
    }

    /// Run the payload through the redactor before emitting, and record
    /// whatever fields it found.
    pub fn emit_redacted(
        &mut self,
        event_type: &str,
        ctx: &EventContext,
        payload: Value,
    ) -> Result<(), AuditError> {
        let (redacted_payload, redactions) = mab_redaction::redact(payload);
        self.emit(event_type, ctx, redacted_payload, redactions)
    }

    fn write_to_sink(&mut self, event: &AuditEvent) -> Result<(), AuditError> {
        if let Some(sink) = self.sink.as_mut() {
            let line = mab_common::canonical_json_string(event)?;
            sink.write_all(line.as_bytes())?;
            sink.write_all(b"\n")?;
        }
        Ok(())
    }

    /// All events recorded so far, in emission order.
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> EventContext {
        EventContext {
            request_id: "req-1".into(),
            trace_id: "trace-1".into(),
            requester_id: "svc-a".into(),
        }
    }

    #[test]
    fn events_are_recorded_in_emission_order() {
        let mut emitter = AuditEmitter::new("1.0", "mab", "test");
        emitter
            .emit("request.received", &ctx(), json!({"a": 1}), vec![])
            .unwrap();
        emitter
            .emit("policy.decided", &ctx(), json!({"b": 2}), vec![])
            .unwrap();
        let types: Vec<&str> = emitter.events().iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["request.received", "policy.decided"]);
    }

    #[test]
    fn emit_redacted_strips_sensitive_fields_and_records_them() {
        let mut emitter = AuditEmitter::new("1.0", "mab", "test");
        emitter
            .emit_redacted("request.received", &ctx(), json!({"authorization": "Bearer x"}))
            .unwrap();
        let event = &emitter.events()[0];
        assert_eq!(event.payload["authorization"], json!("***REDACTED***"));
        assert_eq!(event.redactions.len(), 1);
    }

    #[test]
    fn sink_receives_one_sorted_key_json_line_per_event() {
        let buf: Vec<u8> = Vec::new();
        let mut emitter = AuditEmitter::new("1.0", "mab", "test").with_sink(Box::new(buf));
        emitter
            .emit("request.received", &ctx(), json!({"z": 1, "a": 2}), vec![])
            .unwrap();
        // Re-encode the stored event and confirm key ordering matches what
        // would have been written to the sink.
        let encoded = mab_common::canonical_json_string(&emitter.events()[0]).unwrap();
        assert!(encoded.find("\"environment\"").unwrap() < encoded.find("\"event_type\"").unwrap());
    }
}
