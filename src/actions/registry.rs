//! Action name to handler mapping
//!
//! Handlers are plain synchronous functions from payload bytes to a result
//! string. They must not block: a slow handler delays every inbound message
//! queued behind it.

use crate::protocol::ActionResult;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handler invoked with the request payload
pub type ActionHandler = Arc<dyn Fn(&[u8]) -> String + Send + Sync>;

/// Registry of named actions
///
/// Populated before the session's background loop starts and shared
/// read-only (behind an `Arc`) afterwards.
///
/// # Examples
/// ```
/// use sensor_sim::actions::ActionRegistry;
///
/// let mut registry = ActionRegistry::new();
/// registry.register("ping", |_payload| "pong".to_string());
///
/// let result = registry.dispatch("ping", b"");
/// assert!(result.found);
/// assert_eq!(result.output, "pong");
/// assert!(!registry.dispatch("erase", b"").found);
/// ```
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, ActionHandler>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[u8]) -> String + Send + Sync + 'static,
    {
        self.register_handler(name, Arc::new(handler));
    }

    pub fn register_handler(&mut self, name: impl Into<String>, handler: ActionHandler) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::debug!(action = %name, "Replaced existing action handler");
        } else {
            tracing::debug!(action = %name, "Registered action handler");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Look up and invoke the handler for `name`
    ///
    /// An unknown name is a normal outcome (`found == false`). A panicking
    /// handler unwinds through this call; callers decide how to contain it.
    pub fn dispatch(&self, name: &str, payload: &[u8]) -> ActionResult {
        match self.handlers.get(name) {
            Some(handler) => ActionResult::handled(handler(payload)),
            None => ActionResult::missing(name),
        }
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
