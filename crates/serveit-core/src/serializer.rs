//! Total conversion of payloads into JSON.

use serde_json::{Map, Value};
use tracing::trace;

use crate::payload::{Opaque, Payload};

/// Recursively coerce `payload` into a JSON value. Never fails.
///
/// JSON values are returned as they are. Arrays and opaque values with a
/// sequence form are converted to nested sequences first. Mappings and
/// sequences are rebuilt element by element. Iterable opaque values are
/// iterated, and anything left over is rendered with `Display`.
pub fn serialize(payload: &Payload) -> Value {
    match payload {
        Payload::Json(value) => value.clone(),
        Payload::Array(array) => serialize(&array.to_sequence()),
        Payload::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), serialize(value)))
                .collect::<Map<String, Value>>(),
        ),
        Payload::Seq(items) => serialize_all(items),
        Payload::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        Payload::Object(object) => serialize_object(object.as_ref()),
    }
}

/// Owning variant of [`serialize`] that avoids cloning JSON payloads.
pub fn into_json(payload: Payload) -> Value {
    match payload {
        Payload::Json(value) => value,
        other => serialize(&other),
    }
}

fn serialize_all(items: &[Payload]) -> Value {
    Value::Array(items.iter().map(serialize).collect())
}

fn serialize_object(object: &dyn Opaque) -> Value {
    if let Some(items) = object.to_sequence() {
        return serialize_all(&items);
    }
    match object.elements() {
        Some(Ok(items)) => return serialize_all(&items),
        Some(Err(err)) => trace!("iteration of {object:?} failed ({err}); using its string form"),
        None => {}
    }
    Value::String(object.to_string())
}
