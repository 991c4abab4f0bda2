//! Structural diff representation
//!
//! The remote side encodes changes as plain JSON where control markers
//! (`_a`, `_d`, `_id`, ...) decide how a value is interpreted. Decoding
//! turns that into an explicit [`Diff`] once, so application never has to
//! guess a value's role from the fields it happens to carry.

use crate::StateError;
use serde::Deserialize;
use serde_json::{Map, Value};

/// A change to apply at one location of the mirror
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// String, number, boolean or null, assigned verbatim
    Primitive(Value),

    /// Array assigned verbatim
    ArrayLiteral(Vec<Value>),

    /// Object carrying the identity marker, assigned without merging
    ObjectLiteral(Map<String, Value>),

    /// Per-key diffs applied to an existing object
    ObjectPatch(Vec<(String, Diff)>),

    /// Run-length edits applied to an existing array
    ArrayPatch(ArrayPatch),
}

/// Edits to an array, walked from the last op to the first
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayPatch {
    /// Ops in wire order
    pub ops: Vec<EditOp>,

    /// Length the array is truncated to before the walk
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    /// Move the cursor back, elements unchanged
    Skip(usize),

    /// Remove the elements just before the cursor
    Delete(usize),

    /// Turn the next `n` element ops into insertions
    InsertMarker(usize),

    /// Insert a range of the pre-edit array at the cursor
    Clone { start: usize, len: usize },

    /// Insert a range of the pre-edit array, then patch the element at the cursor
    CloneAndPatch {
        start: usize,
        len: usize,
        diff: Box<Diff>,
    },

    /// Insert or replace one element
    Element(Diff),
}

impl Diff {
    /// Decode using the default marker dialect
    pub fn decode(wire: &Value) -> Result<Self, StateError> {
        Markers::default().decode(wire)
    }

    /// The value assigned by a literal diff, `None` for patches
    pub fn literal(&self) -> Option<Value> {
        match self {
            Diff::Primitive(value) => Some(value.clone()),
            Diff::ArrayLiteral(values) => Some(Value::Array(values.clone())),
            Diff::ObjectLiteral(map) => Some(Value::Object(map.clone())),
            Diff::ObjectPatch(_) | Diff::ArrayPatch(_) => None,
        }
    }
}

/// Marker dialect used by the remote encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum Markers {
    /// `_a`, `_l`, `_id`, `_d`, `_i`, `_c`, `_t`, `_v`
    #[default]
    #[cfg_attr(feature = "clap", value(name = "underscore"))]
    Underscore,
    /// `$a`, `$l`, `$m`, `$d`, `$i`, `$c`, `$t`, `$v`
    #[cfg_attr(feature = "clap", value(name = "dollar"))]
    Dollar,
}

struct MarkerNames {
    ops: &'static str,
    len: &'static str,
    identity: &'static str,
    delete: &'static str,
    insert: &'static str,
    clone: &'static str,
    clone_patch: &'static str,
    value: &'static str,
}

const UNDERSCORE: MarkerNames = MarkerNames {
    ops: "_a",
    len: "_l",
    identity: "_id",
    delete: "_d",
    insert: "_i",
    clone: "_c",
    clone_patch: "_t",
    value: "_v",
};

const DOLLAR: MarkerNames = MarkerNames {
    ops: "$a",
    len: "$l",
    identity: "$m",
    delete: "$d",
    insert: "$i",
    clone: "$c",
    clone_patch: "$t",
    value: "$v",
};

impl Markers {
    fn names(self) -> &'static MarkerNames {
        match self {
            Markers::Underscore => &UNDERSCORE,
            Markers::Dollar => &DOLLAR,
        }
    }

    /// Decode a wire value into a [`Diff`]
    pub fn decode(self, wire: &Value) -> Result<Diff, StateError> {
        let names = self.names();
        match wire {
            Value::Array(values) => Ok(Diff::ArrayLiteral(values.clone())),
            Value::Object(map) => {
                if let Some(ops) = map.get(names.ops) {
                    self.decode_array_patch(ops, map)
                } else if map.contains_key(names.identity) {
                    Ok(Diff::ObjectLiteral(map.clone()))
                } else {
                    let entries = map
                        .iter()
                        .map(|(key, value)| Ok((key.clone(), self.decode(value)?)))
                        .collect::<Result<Vec<_>, StateError>>()?;
                    Ok(Diff::ObjectPatch(entries))
                }
            }
            primitive => Ok(Diff::Primitive(primitive.clone())),
        }
    }

    fn decode_array_patch(self, ops: &Value, map: &Map<String, Value>) -> Result<Diff, StateError> {
        let names = self.names();
        let ops = ops
            .as_array()
            .ok_or_else(|| StateError::Decode(format!("{} must be an array", names.ops)))?;
        let len = count(map, names.len)?;
        let ops = ops
            .iter()
            .map(|op| self.decode_op(op))
            .collect::<Result<Vec<_>, StateError>>()?;
        Ok(Diff::ArrayPatch(ArrayPatch { ops, len }))
    }

    fn decode_op(self, op: &Value) -> Result<EditOp, StateError> {
        let names = self.names();
        if let Value::Number(n) = op {
            let n = n
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| StateError::Decode(format!("invalid skip count {n}")))?;
            return Ok(EditOp::Skip(n));
        }
        let Value::Object(map) = op else {
            return Ok(EditOp::Element(self.decode(op)?));
        };

        if map.contains_key(names.delete) {
            Ok(EditOp::Delete(count(map, names.delete)?))
        } else if map.contains_key(names.insert) {
            Ok(EditOp::InsertMarker(count(map, names.insert)?))
        } else if map.contains_key(names.clone_patch) {
            let inner = map.get(names.value).ok_or_else(|| {
                StateError::Decode(format!("{} op without {}", names.clone_patch, names.value))
            })?;
            Ok(EditOp::CloneAndPatch {
                start: count(map, names.clone)?,
                len: count(map, names.len)?,
                diff: Box::new(self.decode(inner)?),
            })
        } else if map.contains_key(names.clone) {
            Ok(EditOp::Clone {
                start: count(map, names.clone)?,
                len: count(map, names.len)?,
            })
        } else {
            Ok(EditOp::Element(self.decode(op)?))
        }
    }
}

fn count(map: &Map<String, Value>, field: &str) -> Result<usize, StateError> {
    match map.get(field) {
        Some(value) => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| StateError::Decode(format!("{field} must be a non-negative integer, got {value}"))),
        None => Err(StateError::Decode(format!("missing {field}"))),
    }
}
