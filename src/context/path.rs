//! Dotted path helpers for structured context values.

use serde_json::{Map, Value};

use super::ContextError;

/// Split `"viewer.skipBeforeUnloadExecution"` into the store key and the
/// remaining path segments.
pub fn split_key(path: &str) -> (&str, Vec<&str>) {
    let mut parts = path.split('.');
    let key = parts.next().unwrap_or_default();
    (key, parts.filter(|s| !s.is_empty()).collect())
}

pub fn lookup<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `new_value` at `segments` inside `root`, creating empty objects for
/// missing intermediates. An empty path replaces `root`.
pub fn assign(
    root: &mut Value,
    full_path: &str,
    segments: &[&str],
    new_value: Value,
) -> Result<(), ContextError> {
    let Some((last, parents)) = segments.split_last() else {
        *root = new_value;
        return Ok(());
    };

    if root.is_null() {
        *root = Value::Object(Map::new());
    }

    let mut current = root;
    for segment in parents {
        let map = current
            .as_object_mut()
            .ok_or_else(|| ContextError::NotAnObject(full_path.to_string()))?;
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
    }

    let map = current
        .as_object_mut()
        .ok_or_else(|| ContextError::NotAnObject(full_path.to_string()))?;
    map.insert(last.to_string(), new_value);
    Ok(())
}
