//! Model mirroring for Tether
//!
//! Decodes the remote side's structural diffs into a tagged union and
//! applies them in place to a locally held JSON tree.

pub mod apply;
pub mod diff;
pub mod mirror;

pub use apply::{apply, patch, Location};
pub use diff::{ArrayPatch, Diff, EditOp, Markers};
pub use mirror::Mirror;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Missing child {0:?}")]
    MissingChild(String),

    #[error("Expected an object at {0}")]
    NotAnObject(String),

    #[error("Expected an array at {0}")]
    NotAnArray(String),

    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Clone range {start}..{end} out of range for snapshot length {len}")]
    CloneOutOfRange { start: usize, end: usize, len: usize },

    #[error("Edit cursor underflow: {requested} past position {pos}")]
    CursorUnderflow { requested: usize, pos: usize },
}
