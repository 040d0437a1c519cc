//! Accessors for the identity fields of structured objects.
//!
//! Objects are plain `serde_json::Value` maps shaped like
//! `{"apiVersion": .., "kind": .., "metadata": {"name": .., "namespace": ..}}`.

use serde_json::{Map, Value};

use crate::reference::ObjectReference;

fn metadata_str<'a>(object: &'a Value, field: &str) -> &'a str {
    object
        .get("metadata")
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

pub fn name(object: &Value) -> &str {
    metadata_str(object, "name")
}

pub fn namespace(object: &Value) -> &str {
    metadata_str(object, "namespace")
}

pub fn resource_version(object: &Value) -> &str {
    metadata_str(object, "resourceVersion")
}

pub fn uid(object: &Value) -> &str {
    metadata_str(object, "uid")
}

pub fn api_version(object: &Value) -> &str {
    object
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

pub fn kind(object: &Value) -> &str {
    object.get("kind").and_then(Value::as_str).unwrap_or_default()
}

/// Returns the `metadata` map, creating it if absent.
///
/// Returns `None` when the object itself is not a map.
pub fn metadata_mut(object: &mut Value) -> Option<&mut Map<String, Value>> {
    let obj = object.as_object_mut()?;
    let meta = obj
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !meta.is_object() {
        *meta = Value::Object(Map::new());
    }
    meta.as_object_mut()
}

/// Builds a reference pointing at the given object.
pub fn object_reference(object: &Value) -> ObjectReference {
    ObjectReference::new(
        api_version(object),
        kind(object),
        namespace(object),
        name(object),
    )
}
