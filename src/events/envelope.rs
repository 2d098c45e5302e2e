//! TMF event envelopes.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    AttributeValueChange,
    StateChange,
    Delete,
}

impl EventKind {
    /// TMF notification priority: creates and state changes first.
    pub fn priority(&self) -> &'static str {
        match self {
            EventKind::Create | EventKind::StateChange => "1",
            EventKind::Delete => "2",
            EventKind::AttributeValueChange => "3",
        }
    }

    /// Topic suffix on the internal bus.
    pub fn topic(&self) -> &'static str {
        match self {
            EventKind::Create => "created",
            EventKind::AttributeValueChange => "attributeValueChanged",
            EventKind::StateChange => "stateChanged",
            EventKind::Delete => "deleted",
        }
    }
}

/// A published event with its TMF notification metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_time: String,
    pub event_type: String,
    pub correlation_id: String,
    /// API domain of the source, e.g. `tmf621`
    pub domain: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub time_occurred: String,
    #[serde(rename = "@type")]
    pub at_type: String,
    #[serde(rename = "@baseType")]
    pub base_type: String,
    /// Payload, keyed by the lower camel resource name
    pub event: Value,
}

impl EventEnvelope {
    /// Build an envelope; a correlation id is generated when none is given.
    pub fn new(
        kind: EventKind,
        event_type: impl Into<String>,
        domain: impl Into<String>,
        event: Value,
        correlation_id: Option<String>,
    ) -> Self {
        let event_type = event_type.into();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        Self {
            event_id: Uuid::new_v4().to_string(),
            event_time: now.clone(),
            correlation_id: correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            domain: domain.into(),
            title: event_type.clone(),
            description: format!("{} notification", event_type),
            priority: kind.priority().to_string(),
            time_occurred: now,
            at_type: event_type.clone(),
            base_type: "Event".to_string(),
            event_type,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_metadata() {
        let envelope = EventEnvelope::new(
            EventKind::Create,
            "TroubleTicketCreateEvent",
            "tmf621",
            json!({"troubleTicket": {"id": "t1"}}),
            Some("corr-1".to_string()),
        );

        assert_eq!(envelope.title, "TroubleTicketCreateEvent");
        assert_eq!(envelope.description, "TroubleTicketCreateEvent notification");
        assert_eq!(envelope.priority, "1");
        assert_eq!(envelope.correlation_id, "corr-1");
        assert_eq!(envelope.event_time, envelope.time_occurred);
    }

    #[test]
    fn test_envelope_serializes_camel_case() {
        let envelope = EventEnvelope::new(
            EventKind::Delete,
            "ProductDeleteEvent",
            "tmf637",
            json!({}),
            None,
        );
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["eventType"], "ProductDeleteEvent");
        assert_eq!(value["@type"], "ProductDeleteEvent");
        assert_eq!(value["@baseType"], "Event");
        assert_eq!(value["priority"], "2");
        assert!(value["correlationId"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(value.get("timeOccurred").is_some());
    }

    #[test]
    fn test_priorities() {
        assert_eq!(EventKind::StateChange.priority(), "1");
        assert_eq!(EventKind::AttributeValueChange.priority(), "3");
        assert_eq!(EventKind::AttributeValueChange.topic(), "attributeValueChanged");
    }
}
