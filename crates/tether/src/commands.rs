//! Locally runnable commands the remote side may invoke

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type CommandHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Resolves a command name to something callable
pub trait CommandResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<CommandHandler>;
}

/// Closed name to handler table populated by the host
#[derive(Default, Clone)]
pub struct CommandTable {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn with<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        self.register(name, handler);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("CommandTable").field("names", &names).finish()
    }
}

impl CommandResolver for CommandTable {
    fn resolve(&self, name: &str) -> Option<CommandHandler> {
        self.handlers.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_resolve_registered_command() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let table = CommandTable::new().with("alert", move |args| sink.lock().unwrap().extend(args));

        let handler = table.resolve("alert").expect("registered");
        handler(vec![json!("hello"), json!(3)]);
        assert_eq!(*seen.lock().unwrap(), vec![json!("hello"), json!(3)]);
    }

    #[test]
    fn test_unknown_name_does_not_resolve() {
        let table = CommandTable::new().with("alert", |_| {});
        assert!(table.resolve("eval").is_none());
        assert!(table.resolve("").is_none());
    }

    #[test]
    fn test_debug_lists_names() {
        let table = CommandTable::new().with("b", |_| {}).with("a", |_| {});
        assert_eq!(format!("{table:?}"), r#"CommandTable { names: ["a", "b"] }"#);
    }
}
