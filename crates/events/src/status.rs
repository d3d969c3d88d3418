//! Reading lifecycle facts out of serialized event envelopes.
//!
//! Domain events are externally tagged enums (`{"StatusChanged": {...}}`) and every
//! status change body is a `StatusChange<S>` whose statuses serialize as their wire
//! names. Consumers that see many entity types (status board, saga, notifications)
//! decode the body with `S = String` and never need the typed enums.

use serde_json::Value as JsonValue;

use loomerp_core::lifecycle::StatusChange;

use crate::EventEnvelope;

pub const STATUS_CHANGED_SUFFIX: &str = ".status_changed";
pub const CREATED_SUFFIX: &str = ".created";

/// Body of an externally tagged enum value.
pub fn variant_body(payload: &JsonValue) -> Option<&JsonValue> {
    match payload {
        JsonValue::Object(map) if map.len() == 1 => map.values().next(),
        _ => None,
    }
}

/// Status change carried by the envelope, with statuses as wire names.
pub fn status_change(envelope: &EventEnvelope<JsonValue>) -> Option<StatusChange<String>> {
    if !envelope.event_type().ends_with(STATUS_CHANGED_SUFFIX) {
        return None;
    }
    let body = variant_body(envelope.payload())?;
    match serde_json::from_value(body.clone()) {
        Ok(change) => Some(change),
        Err(e) => {
            tracing::warn!(
                event_id = %envelope.event_id(),
                event_type = envelope.event_type(),
                error = %e,
                "undecodable status change payload"
            );
            None
        }
    }
}

/// Body of a creation event.
pub fn created_body(envelope: &EventEnvelope<JsonValue>) -> Option<&JsonValue> {
    if !envelope.event_type().ends_with(CREATED_SUFFIX) {
        return None;
    }
    variant_body(envelope.payload())
}
