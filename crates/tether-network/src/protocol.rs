//! Frame protocol between the model owner and its observers
//!
//! Every frame is a JSON object. Inbound frames are told apart by which
//! discriminant field is present (`m`, `n`, `f`, `id`, checked in that
//! order); outbound calls are caller-supplied fields plus an `id`.

use crate::NetworkError;
use serde_json::{Map, Value};
use tether_state::{Diff, Markers};

/// Notification sent when the observer goes away
pub const TERMINATION_NOTICE: &str = "goui:gui_terminated";

/// Event raised locally when the channel is permanently gone
pub const PROCESS_TERMINATED_EVENT: &str = "goui:process_terminated";

/// A decoded frame from the remote side
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Diff against the mirror root
    Model(Diff),

    /// Named event for listeners
    Event { name: String, payload: Value },

    /// Request to run a local command
    Invoke { name: String, args: Vec<Value> },

    /// Answer to an earlier call
    Response { id: u64, outcome: CallOutcome },
}

/// Result carried by a response frame
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// `e`: the remote reported an error
    Failed(Value),
    /// `a`: several return values
    Values(Vec<Value>),
    /// `v`: a single return value
    Value(Value),
    /// No payload at all
    Empty,
}

impl InboundFrame {
    /// Decode one text frame
    pub fn decode(text: &str, markers: Markers) -> Result<Self, NetworkError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| NetworkError::MalformedFrame(format!("invalid JSON: {e}")))?;
        let Value::Object(mut map) = value else {
            return Err(NetworkError::MalformedFrame("frame is not an object".to_string()));
        };

        if let Some(model) = map.remove("m") {
            let diff = markers
                .decode(&model)
                .map_err(|e| NetworkError::MalformedFrame(e.to_string()))?;
            return Ok(InboundFrame::Model(diff));
        }

        if let Some(name) = map.remove("n") {
            return Ok(InboundFrame::Event {
                name: string_field("n", name)?,
                payload: map.remove("ev").unwrap_or(Value::Null),
            });
        }

        if let Some(name) = map.remove("f") {
            let args = match map.remove("a") {
                None => Vec::new(),
                Some(Value::Array(args)) => args,
                Some(other) => {
                    return Err(NetworkError::MalformedFrame(format!(
                        "invocation arguments must be a list, got {other}"
                    )))
                }
            };
            return Ok(InboundFrame::Invoke {
                name: string_field("f", name)?,
                args,
            });
        }

        if let Some(id) = map.remove("id") {
            let id = id
                .as_u64()
                .ok_or_else(|| NetworkError::MalformedFrame(format!("invalid call id {id}")))?;
            let outcome = if let Some(error) = map.remove("e") {
                CallOutcome::Failed(error)
            } else if let Some(values) = map.remove("a") {
                match values {
                    Value::Array(values) => CallOutcome::Values(values),
                    other => {
                        return Err(NetworkError::MalformedFrame(format!(
                            "response list must be an array, got {other}"
                        )))
                    }
                }
            } else if let Some(value) = map.remove("v") {
                CallOutcome::Value(value)
            } else {
                CallOutcome::Empty
            };
            return Ok(InboundFrame::Response { id, outcome });
        }

        Err(NetworkError::MalformedFrame(
            "no m, n, f or id field".to_string(),
        ))
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Model(_) => "model",
            InboundFrame::Event { .. } => "event",
            InboundFrame::Invoke { .. } => "invoke",
            InboundFrame::Response { .. } => "response",
        }
    }
}

fn string_field(field: &str, value: Value) -> Result<String, NetworkError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(NetworkError::MalformedFrame(format!(
            "{field} must be a string, got {other}"
        ))),
    }
}

/// Caller-supplied body of an outbound call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Call {
    fields: Map<String, Value>,
}

impl Call {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Method call in the shape the remote dispatcher expects:
    /// `{"n": name, "v": [args...]}`
    pub fn method(name: impl Into<String>, args: Vec<Value>) -> Self {
        let mut fields = Map::new();
        fields.insert("n".to_string(), Value::String(name.into()));
        fields.insert("v".to_string(), Value::Array(args));
        Self { fields }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// A frame sent to the remote side
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Correlated call; `id` overrides any caller field of the same name
    Call { id: u64, call: Call },

    /// Fire-and-forget notification, e.g. [`TERMINATION_NOTICE`]
    Notify { name: String },
}

impl OutboundFrame {
    pub fn encode(&self) -> Result<String, NetworkError> {
        let body = match self {
            OutboundFrame::Call { id, call } => {
                let mut fields = call.fields.clone();
                fields.insert("id".to_string(), Value::from(*id));
                fields
            }
            OutboundFrame::Notify { name } => {
                let mut fields = Map::new();
                fields.insert("n".to_string(), Value::String(name.clone()));
                fields
            }
        };
        Ok(serde_json::to_string(&Value::Object(body))?)
    }
}
