//! Path access into nested plain data.
//!
//! Paths use `.` for object keys and `[n]` for array indices:
//! `"contacts[2].address.city"`. Note that `a[2].b` treats `a` as an array
//! while `a.2.b` treats it as an object when containers have to be created.

use crate::ids::RowIndex;
use serde_json::{Map, Value};

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A field array plus the positional index of one of its rows, used to place
/// a value inside nested rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedAncestor {
    pub name: String,
    pub index: RowIndex,
}

/// Split a path string into segments. Empty segments are dropped.
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;

    let flush = |current: &mut String, bracketed: bool, segments: &mut Vec<PathSegment>| {
        if current.is_empty() {
            return;
        }
        let token = std::mem::take(current);
        match token.parse::<usize>() {
            Ok(index) if bracketed => segments.push(PathSegment::Index(index)),
            _ => segments.push(PathSegment::Key(token)),
        }
    };

    for ch in path.chars() {
        match ch {
            '.' if !in_brackets => flush(&mut current, false, &mut segments),
            '[' => {
                flush(&mut current, false, &mut segments);
                in_brackets = true;
            }
            ']' if in_brackets => {
                flush(&mut current, true, &mut segments);
                in_brackets = false;
            }
            _ => current.push(ch),
        }
    }
    flush(&mut current, in_brackets, &mut segments);
    segments
}

/// Segments for `prefix` rows followed by the parsed `name`.
pub fn segments_with_prefix(prefix: &[IndexedAncestor], name: &str) -> Vec<PathSegment> {
    let mut segments = Vec::with_capacity(prefix.len() * 2 + 1);
    for ancestor in prefix {
        segments.extend(parse_path(&ancestor.name));
        segments.push(PathSegment::Index(ancestor.index.0));
    }
    segments.extend(parse_path(name));
    segments
}

/// Resolve a path string. Returns `None` when a segment is missing or when the
/// path is empty (the root itself is never returned, so a field can't collide
/// with the whole object).
pub fn get_path<'a>(obj: &'a Value, path: &str) -> Option<&'a Value> {
    get_segments(obj, &parse_path(path))
}

/// Resolve pre-parsed segments. An empty segment list resolves to `None`.
pub fn get_segments<'a>(obj: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    if segments.is_empty() {
        return None;
    }
    let mut current = obj;
    for segment in segments {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get(key)?,
            (Value::Object(map), PathSegment::Index(index)) => map.get(&index.to_string())?,
            (Value::Array(items), PathSegment::Index(index)) => items.get(*index)?,
            (Value::Array(items), PathSegment::Key(key)) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at `path`, creating intermediate containers on the way.
pub fn set_path(obj: &mut Value, path: &str, value: Value) {
    set_segments(obj, &parse_path(path), value);
}

/// Write `value` at `name` inside the rows described by `prefix`.
pub fn set_path_with_prefix(obj: &mut Value, prefix: &[IndexedAncestor], name: &str, value: Value) {
    set_segments(obj, &segments_with_prefix(prefix, name), value);
}

/// Write `value` at the given segments.
///
/// A missing (or scalar) intermediate becomes an array when the next segment
/// is an index, otherwise an object. Arrays are padded with `null` when
/// writing past their end.
pub fn set_segments(obj: &mut Value, segments: &[PathSegment], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = obj;
    for segment in parents {
        current = child_slot(current, segment);
    }
    *child_slot(current, last) = value;
}

/// Remove whatever sits at `path`. Array elements are replaced by `null`
/// rather than shifting their siblings.
pub fn remove_path(obj: &mut Value, path: &str) {
    let segments = parse_path(path);
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = obj;
    for segment in parents {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => match map.get_mut(key) {
                Some(v) => v,
                None => return,
            },
            (Value::Array(items), PathSegment::Index(index)) => match items.get_mut(*index) {
                Some(v) => v,
                None => return,
            },
            _ => return,
        };
    }
    match (current, last) {
        (Value::Object(map), PathSegment::Key(key)) => {
            map.remove(key);
        }
        (Value::Object(map), PathSegment::Index(index)) => {
            map.remove(&index.to_string());
        }
        (Value::Array(items), PathSegment::Index(index)) => {
            if let Some(item) = items.get_mut(*index) {
                *item = Value::Null;
            }
        }
        _ => {}
    }
}

/// Mutable slot for `segment` inside `container`. A container of the wrong
/// shape is replaced by an empty one of the right shape.
fn child_slot<'a>(container: &'a mut Value, segment: &PathSegment) -> &'a mut Value {
    let fits = match (&*container, segment) {
        (Value::Object(_), _) => true,
        (Value::Array(_), PathSegment::Index(_)) => true,
        (Value::Array(_), PathSegment::Key(key)) => key.parse::<usize>().is_ok(),
        _ => false,
    };
    if !fits {
        *container = match segment {
            PathSegment::Index(_) => Value::Array(Vec::new()),
            PathSegment::Key(_) => Value::Object(Map::new()),
        };
    }
    match container {
        Value::Object(map) => {
            let key = match segment {
                PathSegment::Key(key) => key.clone(),
                PathSegment::Index(index) => index.to_string(),
            };
            map.entry(key).or_insert(Value::Null)
        }
        Value::Array(items) => {
            let index = match segment {
                PathSegment::Index(index) => *index,
                PathSegment::Key(key) => key.parse::<usize>().unwrap_or_default(),
            };
            padded(items, index)
        }
        // Unreachable after the reshape above; keep the slot itself.
        other => other,
    }
}

fn padded(items: &mut Vec<Value>, index: usize) -> &mut Value {
    if items.len() <= index {
        items.resize(index + 1, Value::Null);
    }
    &mut items[index]
}
