//! Outstanding calls awaiting a response

use crate::ChannelError;
use serde_json::Value;
use std::collections::HashMap;
use tether_network::CallOutcome;
use tokio::sync::oneshot;

/// Successful result of a remote call
#[derive(Debug, Clone, PartialEq)]
pub enum CallReply {
    Single(Value),
    Multiple(Vec<Value>),
    Empty,
}

impl CallReply {
    /// Flatten into one JSON value; `Empty` becomes `null`
    pub fn into_value(self) -> Value {
        match self {
            CallReply::Single(value) => value,
            CallReply::Multiple(values) => Value::Array(values),
            CallReply::Empty => Value::Null,
        }
    }
}

impl CallReply {
    pub fn from_outcome(outcome: CallOutcome) -> Result<Self, ChannelError> {
        match outcome {
            CallOutcome::Failed(error) => Err(ChannelError::Remote(error)),
            CallOutcome::Values(values) => Ok(CallReply::Multiple(values)),
            CallOutcome::Value(value) => Ok(CallReply::Single(value)),
            CallOutcome::Empty => Ok(CallReply::Empty),
        }
    }
}

pub type ReplySender = oneshot::Sender<Result<CallReply, ChannelError>>;

/// Maps call ids to their completion handles
///
/// Ids start at 1 and are never reused for the life of the table.
#[derive(Debug)]
pub struct CorrelationTable {
    next_id: u64,
    pending: HashMap<u64, ReplySender>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next id and park `reply` under it
    pub fn register(&mut self, reply: ReplySender) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, reply);
        id
    }

    /// Resolve and remove the entry for `id`
    ///
    /// Returns false when no call with that id is pending.
    pub fn complete(&mut self, id: u64, outcome: CallOutcome) -> bool {
        match self.pending.remove(&id) {
            Some(reply) => {
                // The caller may have dropped its handle
                let _ = reply.send(CallReply::from_outcome(outcome));
                true
            }
            None => false,
        }
    }

    /// Fail one entry without a response, e.g. when its frame can't be encoded
    pub fn reject(&mut self, id: u64, error: ChannelError) {
        if let Some(reply) = self.pending.remove(&id) {
            let _ = reply.send(Err(error));
        }
    }

    pub fn reject_all(&mut self, error: ChannelError) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(error.clone()));
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let mut table = CorrelationTable::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        assert_eq!(table.register(tx1), 1);
        assert_eq!(table.register(tx2), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_complete_removes_entry() {
        let mut table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        let id = table.register(tx);

        assert!(table.complete(id, CallOutcome::Value(json!(5))));
        assert!(!table.contains(id));
        assert_eq!(rx.try_recv().unwrap(), Ok(CallReply::Single(json!(5))));

        // A second response for the same id is unknown
        assert!(!table.complete(id, CallOutcome::Empty));
    }

    #[test]
    fn test_unknown_id_leaves_table_untouched() {
        let mut table = CorrelationTable::new();
        let (tx, _rx) = oneshot::channel();
        table.register(tx);

        assert!(!table.complete(42, CallOutcome::Empty));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_failure_outcome_maps_to_remote_error() {
        let mut table = CorrelationTable::new();
        let (tx, mut rx) = oneshot::channel();
        let id = table.register(tx);

        table.complete(id, CallOutcome::Failed(json!("no such method")));
        assert_eq!(
            rx.try_recv().unwrap(),
            Err(ChannelError::Remote(json!("no such method")))
        );
    }

    #[test]
    fn test_reject_all_drains() {
        let mut table = CorrelationTable::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        table.register(tx1);
        table.register(tx2);

        table.reject_all(ChannelError::Terminated);
        assert!(table.is_empty());
        assert_eq!(rx1.try_recv().unwrap(), Err(ChannelError::Terminated));
        assert_eq!(rx2.try_recv().unwrap(), Err(ChannelError::Terminated));
    }

    #[test]
    fn test_reply_flattening() {
        assert_eq!(CallReply::Single(json!(1)).into_value(), json!(1));
        assert_eq!(CallReply::Multiple(vec![json!(1), json!(2)]).into_value(), json!([1, 2]));
        assert_eq!(CallReply::Empty.into_value(), Value::Null);
    }
}
