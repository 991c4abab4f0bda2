use anyhow::Result;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestFixtures {
    temp_dir: TempDir,
}

impl TestFixtures {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    pub fn create_config(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// The model most scenarios start from
pub fn sample_model() -> Value {
    json!({
        "_id": 1,
        "Age": 42,
        "Details": {"_id": 2, "Name": "Joe"},
        "List": [
            {"_id": 3, "Name": "Elem 1"},
            {"_id": 4, "Name": "Elem 2"}
        ]
    })
}

pub fn model_frame(diff: Value) -> String {
    json!({ "m": diff }).to_string()
}

pub fn event_frame(name: &str, payload: Value) -> String {
    json!({ "n": name, "ev": payload }).to_string()
}

pub fn invoke_frame(name: &str, args: Vec<Value>) -> String {
    json!({ "f": name, "a": args }).to_string()
}

pub fn value_response(id: u64, value: Value) -> String {
    json!({ "id": id, "v": value }).to_string()
}

pub fn values_response(id: u64, values: Vec<Value>) -> String {
    json!({ "id": id, "a": values }).to_string()
}

pub fn error_response(id: u64, error: Value) -> String {
    json!({ "id": id, "e": error }).to_string()
}

pub fn empty_response(id: u64) -> String {
    json!({ "id": id }).to_string()
}
