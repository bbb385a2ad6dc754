//! Origin and schema gate for inbound payloads.
//!
//! The channel is shared with unrelated senders, so every inbound payload
//! must pass [`sanitize`] before it is acted on.

use serde_json::Value;

use crate::{
    Envelope, Inbound, MessageKind,
    envelope::{DISCRIMINANT, MESSAGE_TYPE, TYPE_FIELD},
};

/// Returns `true` when the payload carries the `postmate` discriminant.
#[must_use]
pub fn has_discriminant(payload: &Value) -> bool {
    payload
        .as_object()
        .is_some_and(|object| object.contains_key(DISCRIMINANT))
}

/// Check an inbound payload against the expected sender origin and the
/// envelope schema.
///
/// Origins are compared by exact string match.
#[must_use]
pub fn sanitize(inbound: &Inbound, expected_origin: Option<&str>) -> bool {
    if expected_origin.is_some_and(|origin| origin != inbound.origin) {
        return false;
    }
    let Some(object) = inbound.payload.as_object() else {
        return false;
    };
    let Some(kind) = object.get(DISCRIMINANT) else {
        return false;
    };
    if object.get(TYPE_FIELD).and_then(Value::as_str) != Some(MESSAGE_TYPE) {
        return false;
    }
    kind.as_str().and_then(MessageKind::from_wire).is_some()
}

/// Sanitize and decode an inbound payload.
///
/// Returns `None` when the payload fails [`sanitize`] or lacks the fields
/// its kind requires.
#[must_use]
pub fn parse(inbound: &Inbound, expected_origin: Option<&str>) -> Option<Envelope> {
    if !sanitize(inbound, expected_origin) {
        tracing::trace!(origin = %inbound.origin, "Dropping unsanitized payload");
        return None;
    }
    match serde_json::from_value(inbound.payload.clone()) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::debug!(origin = %inbound.origin, "Malformed envelope: {e}");
            None
        }
    }
}
