//! Partial updates and publish-payload placement for cached JSON payloads

use serde_json::{Map, Value};

/// Canonical top-level field holding the publish payload of a result
pub const PUBLISH_PAYLOAD_FIELD: &str = "publishPayload";

/// Merge `partial` into `target` in place.
///
/// Keys containing `.` address nested fields (`"analysis.status"`);
/// missing intermediate objects are created. Object values merge
/// recursively, everything else replaces. Fields not named in `partial`
/// are left alone.
pub fn apply_partial_update(target: &mut Value, partial: &Value) {
    let Value::Object(fields) = partial else {
        *target = partial.clone();
        return;
    };
    for (key, value) in fields {
        let path: Vec<&str> = key.split('.').filter(|s| !s.is_empty()).collect();
        if path.is_empty() {
            continue;
        }
        set_path(target, &path, value);
    }
}

fn set_path(target: &mut Value, path: &[&str], value: &Value) {
    let object = as_object_mut(target);
    let (head, rest) = match path {
        [head, rest @ ..] => (*head, rest),
        [] => return,
    };
    if rest.is_empty() {
        if let Some(existing) = object.get_mut(head) {
            if existing.is_object() && value.is_object() {
                apply_partial_update(existing, value);
                return;
            }
        }
        object.insert(head.to_string(), value.clone());
        return;
    }
    let child = object
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    set_path(child, rest, value);
}

fn as_object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just made an object"),
    }
}

/// Read a dot-path field.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .try_fold(value, |cursor, segment| cursor.get(segment))
}

/// Move a nested publish payload to the top level.
///
/// Looks one and two levels deep. A top-level copy wins; otherwise the
/// first nested copy found (shallower first) is promoted. Nested copies
/// are removed either way. The top-level payload's own fields are never
/// searched. Returns whether `payload` changed.
pub fn canonicalize_publish_payload(payload: &mut Value) -> bool {
    let Value::Object(top) = payload else {
        return false;
    };

    let mut found: Option<Value> = None;
    let mut changed = false;
    for depth in 1..=2 {
        for (key, value) in top.iter_mut() {
            if key == PUBLISH_PAYLOAD_FIELD {
                continue;
            }
            if let Some(copy) = take_nested(value, depth) {
                changed = true;
                if found.is_none() {
                    found = Some(copy);
                }
            }
        }
    }

    if let Some(copy) = found {
        top.entry(PUBLISH_PAYLOAD_FIELD.to_string()).or_insert(copy);
    }
    changed
}

fn take_nested(value: &mut Value, depth: usize) -> Option<Value> {
    let Value::Object(map) = value else {
        return None;
    };
    if depth == 1 {
        return map.remove(PUBLISH_PAYLOAD_FIELD);
    }
    let mut first = None;
    for child in map.values_mut() {
        if let Some(copy) = take_nested(child, depth - 1) {
            first.get_or_insert(copy);
        }
    }
    first
}

/// Publish payload of a cached result: top level, else one level down.
pub fn find_publish_payload(payload: &Value) -> Option<&Value> {
    if let Some(v) = payload.get(PUBLISH_PAYLOAD_FIELD) {
        return Some(v);
    }
    payload
        .as_object()?
        .values()
        .find_map(|v| v.get(PUBLISH_PAYLOAD_FIELD))
}
