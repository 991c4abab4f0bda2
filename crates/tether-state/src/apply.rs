//! In-place application of structural diffs
//!
//! Arrays are always edited through the existing `Vec` (insert, replace,
//! splice) and never reassigned, so anything holding the array node keeps
//! seeing the same container after a patch.

use crate::diff::{ArrayPatch, Diff, EditOp};
use crate::StateError;
use serde_json::{Map, Value};
use tracing::trace;

/// Where a diff lands inside its parent container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location<'a> {
    /// Property of an object
    Key(&'a str),
    /// Existing array element, replaced in place
    Index(usize),
    /// Array position, the value is inserted before it
    Insert(usize),
}

/// Apply `diff` at `at` inside `parent`
///
/// Literals are assigned (or inserted) wholesale. Patches recurse into the
/// child that already lives at `at`; a patch never creates missing
/// children.
pub fn apply(parent: &mut Value, at: Location<'_>, diff: &Diff) -> Result<(), StateError> {
    match (parent, at) {
        (Value::Object(map), Location::Key(key)) => apply_entry(map, key, diff),
        (Value::Array(items), Location::Index(_) | Location::Insert(_)) => {
            apply_element(items, at, diff)
        }
        (_, Location::Key(_)) => Err(StateError::NotAnObject(format!("{at:?}"))),
        _ => Err(StateError::NotAnArray(format!("{at:?}"))),
    }
}

/// Apply `diff` to `target` itself
pub fn patch(target: &mut Value, diff: &Diff) -> Result<(), StateError> {
    match diff {
        Diff::ObjectPatch(entries) => {
            let Value::Object(map) = target else {
                return Err(StateError::NotAnObject(kind(target).to_string()));
            };
            for (key, child) in entries {
                apply_entry(map, key, child)?;
            }
            Ok(())
        }
        Diff::ArrayPatch(edits) => {
            let Value::Array(items) = target else {
                return Err(StateError::NotAnArray(kind(target).to_string()));
            };
            patch_array(items, edits)
        }
        literal => {
            if let Some(value) = literal.literal() {
                *target = value;
            }
            Ok(())
        }
    }
}

fn apply_entry(map: &mut Map<String, Value>, key: &str, diff: &Diff) -> Result<(), StateError> {
    match diff.literal() {
        Some(value) => {
            map.insert(key.to_owned(), value);
            Ok(())
        }
        None => {
            let child = map
                .get_mut(key)
                .ok_or_else(|| StateError::MissingChild(key.to_owned()))?;
            patch(child, diff)
        }
    }
}

fn apply_element(items: &mut Vec<Value>, at: Location<'_>, diff: &Diff) -> Result<(), StateError> {
    let len = items.len();
    match (at, diff.literal()) {
        (Location::Insert(index), Some(value)) => {
            if index > len {
                return Err(StateError::IndexOutOfRange { index, len });
            }
            items.insert(index, value);
        }
        (Location::Index(index), Some(value)) => {
            let slot = items
                .get_mut(index)
                .ok_or(StateError::IndexOutOfRange { index, len })?;
            *slot = value;
        }
        // A patch always edits the element already at the index, even in
        // insertion mode.
        (Location::Index(index) | Location::Insert(index), None) => {
            let child = items
                .get_mut(index)
                .ok_or(StateError::IndexOutOfRange { index, len })?;
            patch(child, diff)?;
        }
        (Location::Key(key), _) => return Err(StateError::NotAnObject(key.to_owned())),
    }
    Ok(())
}

fn patch_array(items: &mut Vec<Value>, edits: &ArrayPatch) -> Result<(), StateError> {
    trace!(ops = edits.ops.len(), len = edits.len, current = items.len(), "applying array patch");

    if items.len() > edits.len {
        items.truncate(edits.len);
    }

    let mut pos = items.len();
    let mut insert_count = 0usize;
    // Pre-edit copy, taken on the first structural op
    let mut snapshot: Option<Vec<Value>> = None;

    for op in edits.ops.iter().rev() {
        match op {
            EditOp::Skip(n) => pos = retreat(pos, *n)?,
            EditOp::Delete(n) => {
                snapshot.get_or_insert_with(|| items.clone());
                pos = retreat(pos, *n)?;
                items.drain(pos..pos + n);
            }
            EditOp::InsertMarker(n) => insert_count = *n,
            EditOp::Clone { start, len } => {
                let source = snapshot.get_or_insert_with(|| items.clone());
                insert_range(items, pos, source, *start, *len)?;
            }
            EditOp::CloneAndPatch { start, len, diff } => {
                let source = snapshot.get_or_insert_with(|| items.clone());
                insert_range(items, pos, source, *start, *len)?;
                apply_element(items, Location::Index(pos), diff)?;
            }
            EditOp::Element(diff) => {
                if insert_count > 0 {
                    insert_count -= 1;
                    apply_element(items, Location::Insert(pos), diff)?;
                } else {
                    pos = retreat(pos, 1)?;
                    apply_element(items, Location::Index(pos), diff)?;
                }
            }
        }
    }
    Ok(())
}

fn retreat(pos: usize, n: usize) -> Result<usize, StateError> {
    pos.checked_sub(n)
        .ok_or(StateError::CursorUnderflow { requested: n, pos })
}

fn insert_range(
    items: &mut Vec<Value>,
    pos: usize,
    source: &[Value],
    start: usize,
    len: usize,
) -> Result<(), StateError> {
    let end = start.saturating_add(len);
    if end > source.len() {
        return Err(StateError::CloneOutOfRange {
            start,
            end,
            len: source.len(),
        });
    }
    if pos > items.len() {
        return Err(StateError::IndexOutOfRange {
            index: pos,
            len: items.len(),
        });
    }
    items.splice(pos..pos, source[start..end].iter().cloned());
    Ok(())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
