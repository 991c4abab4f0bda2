//! Local replica of the remote model

use crate::{apply::patch, diff::Diff, StateError};
use serde_json::Value;
use tracing::debug;

/// Client-held copy of the remote data model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mirror {
    root: Value,
    revision: u64,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a model diff at the root
    ///
    /// A literal replaces the whole model; a patch edits the current root.
    /// On error the model may already be partially updated.
    pub fn apply(&mut self, diff: &Diff) -> Result<(), StateError> {
        patch(&mut self.root, diff)?;
        self.revision += 1;
        debug!(revision = self.revision, "applied model diff");
        Ok(())
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Look up a node by JSON pointer, e.g. `/list/0/name`
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.root.pointer(pointer)
    }

    /// Number of diffs applied so far
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True until the first model diff has been applied
    pub fn is_empty(&self) -> bool {
        self.revision == 0
    }
}
