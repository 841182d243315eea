//! Dot-path addressing over a serialized state tree.
//!
//! Segments index objects by key and arrays by decimal position.

use serde_json::{Map, Value};

use crate::error::StateError;
use crate::state::model::REGIONS;

/// Splits `path` into segments, rejecting empty segments and unknown regions.
pub(crate) fn parse(path: &str) -> Result<Vec<&str>, StateError> {
    let invalid = || StateError::InvalidPath {
        path: path.to_string(),
    };
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid());
    }
    match segments.first() {
        Some(region) if REGIONS.contains(region) => Ok(segments),
        _ => Err(invalid()),
    }
}

/// Reads the value at `segments`, if every step exists.
pub(crate) fn lookup<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, seg| match node {
        Value::Object(map) => map.get(*seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Writes `value` at `segments`, creating missing intermediate objects.
///
/// Array positions must exist, or equal the length to append.
pub(crate) fn assign(
    root: &mut Value,
    segments: &[&str],
    value: Value,
    path: &str,
) -> Result<(), StateError> {
    let invalid = || StateError::InvalidPath {
        path: path.to_string(),
    };
    let Some((last, parents)) = segments.split_last() else {
        return Err(invalid());
    };

    let mut node = root;
    for seg in parents {
        node = match node {
            Value::Object(map) => map
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let i = seg.parse::<usize>().map_err(|_| invalid())?;
                items.get_mut(i).ok_or_else(invalid)?
            }
            _ => return Err(invalid()),
        };
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
    }

    match node {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let i = last.parse::<usize>().map_err(|_| invalid())?;
            match i.cmp(&items.len()) {
                std::cmp::Ordering::Less => items[i] = value,
                std::cmp::Ordering::Equal => items.push(value),
                std::cmp::Ordering::Greater => return Err(invalid()),
            }
            Ok(())
        }
        _ => Err(invalid()),
    }
}
