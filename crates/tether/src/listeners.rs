//! Named event listeners

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type Listener = Arc<dyn Fn(&mut Event) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An event as seen by listeners
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    payload: Value,
    default_prevented: bool,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            default_prevented: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Suppress the channel's built-in reaction to this event, if it has one
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    by_name: HashMap<String, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, name: impl Into<String>, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_name.entry(name.into()).or_default().push((id, listener));
        id
    }

    /// Remove one listener; false if it was not registered under `name`
    pub fn unsubscribe(&mut self, name: &str, id: ListenerId) -> bool {
        let Some(entries) = self.by_name.get_mut(name) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.by_name.remove(name);
        }
        removed
    }

    /// Listeners for `name` in registration order
    pub fn snapshot(&self, name: &str) -> Vec<Listener> {
        self.by_name
            .get(name)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.by_name.get(name).map_or(0, Vec::len)
    }
}

/// Deliver `event` to every listener registered for its name
///
/// The lock is released before any listener runs, so listeners may
/// subscribe or unsubscribe; such changes apply from the next event on.
pub fn emit(registry: &Mutex<ListenerRegistry>, event: &mut Event) -> usize {
    let listeners = registry
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .snapshot(event.name());
    for listener in &listeners {
        listener(event);
    }
    listeners.len()
}
