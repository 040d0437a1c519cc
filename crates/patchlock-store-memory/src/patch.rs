//! Patch application for the in-memory store.
//!
//! Implements the four patch conventions of the store's patch endpoint:
//! - JSON Patch (RFC 6902), via the `json-patch` crate
//! - JSON Merge Patch (RFC 7386), via the `json-patch` crate
//! - Strategic merge patch: merge patch semantics, plus lists of maps that
//!   all carry a `name` key are merged item by item, and `$patch: delete` /
//!   `$patch: replace` directives
//! - Apply patch: YAML or JSON body applied with strategic merge semantics.
//!   There is no field ownership tracking in this backend.

use json_patch::{Patch, PatchOperation, merge, patch};
use patchlock_store::{PatchType, StoreError};
use serde_json::{Map, Value};

/// List items are matched on this key during strategic merges.
const MERGE_KEY: &str = "name";

/// Directive key inside strategic merge patch maps.
const DIRECTIVE_KEY: &str = "$patch";

/// Applies a patch body to an object and returns the patched copy.
///
/// # Errors
///
/// Returns `StoreError::InvalidPatch` if the body does not parse, fails to
/// apply, or changes the object's identity.
pub fn apply_patch(
    current: &Value,
    patch_type: PatchType,
    body: &[u8],
) -> Result<Value, StoreError> {
    let mut patched = current.clone();

    match patch_type {
        PatchType::JsonPatch => {
            let operations: Patch = serde_json::from_slice(body).map_err(|e| {
                StoreError::invalid_patch(format!("invalid JSON patch document: {e}"))
            })?;
            validate_json_patch_operations(&operations.0)?;
            patch(&mut patched, &operations.0)
                .map_err(|e| StoreError::invalid_patch(format!("patch operation failed: {e}")))?;
        }
        PatchType::MergePatch => {
            let doc = parse_map_body(serde_json::from_slice(body), "merge patch")?;
            merge(&mut patched, &doc);
        }
        PatchType::StrategicMergePatch => {
            let doc = parse_map_body(serde_json::from_slice(body), "strategic merge patch")?;
            strategic_merge(&mut patched, &doc);
        }
        PatchType::ApplyPatch => {
            let doc = parse_map_body(
                serde_yaml::from_slice::<Value>(body).map_err(|e| e.to_string()),
                "apply patch",
            )?;
            strategic_merge(&mut patched, &doc);
        }
    }

    validate_identity_unchanged(current, &patched)?;
    Ok(patched)
}

fn parse_map_body<E: std::fmt::Display>(
    parsed: Result<Value, E>,
    what: &str,
) -> Result<Value, StoreError> {
    let doc = parsed.map_err(|e| StoreError::invalid_patch(format!("invalid {what} document: {e}")))?;
    if !doc.is_object() {
        return Err(StoreError::invalid_patch(format!(
            "{what} document must be a map"
        )));
    }
    Ok(doc)
}

/// Rejects JSON patch operations that target identity fields.
fn validate_json_patch_operations(operations: &[PatchOperation]) -> Result<(), StoreError> {
    for op in operations {
        let path = json_patch_operation_path(op);
        for protected in ["/apiVersion", "/kind", "/metadata/name", "/metadata/namespace"] {
            if path == protected {
                return Err(StoreError::invalid_patch(format!(
                    "cannot modify {protected} with patch"
                )));
            }
        }
    }
    Ok(())
}

fn json_patch_operation_path(op: &PatchOperation) -> &str {
    match op {
        PatchOperation::Add(add_op) => add_op.path.as_str(),
        PatchOperation::Remove(remove_op) => remove_op.path.as_str(),
        PatchOperation::Replace(replace_op) => replace_op.path.as_str(),
        PatchOperation::Move(move_op) => move_op.path.as_str(),
        PatchOperation::Copy(copy_op) => copy_op.path.as_str(),
        PatchOperation::Test(test_op) => test_op.path.as_str(),
    }
}

/// Merge-style patches can still rewrite identity fields; catch that here.
fn validate_identity_unchanged(before: &Value, after: &Value) -> Result<(), StoreError> {
    let fields: [(&str, &[&str]); 5] = [
        ("apiVersion", &["apiVersion"]),
        ("kind", &["kind"]),
        ("metadata.name", &["metadata", "name"]),
        ("metadata.namespace", &["metadata", "namespace"]),
        ("metadata.uid", &["metadata", "uid"]),
    ];
    for (label, path) in fields {
        if lookup(before, path) != lookup(after, path) {
            return Err(StoreError::invalid_patch(format!(
                "cannot modify {label} with patch"
            )));
        }
    }
    Ok(())
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

// ============================================================================
// Strategic merge
// ============================================================================

fn strategic_merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = strip_directives(patch);
        return;
    };

    if directive(patch_map) == Some("replace") {
        *target = strip_directives(patch);
        return;
    }

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Some(target_map) = target.as_object_mut() else {
        return;
    };

    for (key, value) in patch_map {
        if key == DIRECTIVE_KEY {
            continue;
        }
        if value.is_null() {
            target_map.remove(key);
            continue;
        }
        match target_map.get_mut(key) {
            Some(existing) => merge_value(existing, value),
            None => {
                target_map.insert(key.clone(), strip_directives(value));
            }
        }
    }
}

fn merge_value(existing: &mut Value, patch: &Value) {
    if existing.is_object() && patch.is_object() {
        strategic_merge(existing, patch);
        return;
    }
    if let (Value::Array(items), Value::Array(patch_items)) = (&mut *existing, patch)
        && is_keyed_list(items, patch_items)
    {
        merge_keyed_list(items, patch_items);
        return;
    }
    *existing = strip_directives(patch);
}

fn directive(map: &Map<String, Value>) -> Option<&str> {
    map.get(DIRECTIVE_KEY).and_then(Value::as_str)
}

fn merge_key(item: &Value) -> Option<&str> {
    item.get(MERGE_KEY).and_then(Value::as_str)
}

fn is_keyed_list(items: &[Value], patch_items: &[Value]) -> bool {
    !patch_items.is_empty()
        && patch_items.iter().all(|i| merge_key(i).is_some())
        && items.iter().all(Value::is_object)
}

fn merge_keyed_list(items: &mut Vec<Value>, patch_items: &[Value]) {
    for patch_item in patch_items {
        let Some(key) = merge_key(patch_item) else {
            continue;
        };
        let position = items.iter().position(|i| merge_key(i) == Some(key));
        let delete = patch_item
            .as_object()
            .and_then(directive)
            .is_some_and(|d| d == "delete");

        match (position, delete) {
            (Some(idx), true) => {
                items.remove(idx);
            }
            (None, true) => {}
            (Some(idx), false) => strategic_merge(&mut items[idx], patch_item),
            (None, false) => items.push(strip_directives(patch_item)),
        }
    }
}

fn strip_directives(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != DIRECTIVE_KEY)
                .map(|(k, v)| (k.clone(), strip_directives(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_directives).collect()),
        other => other.clone(),
    }
}
