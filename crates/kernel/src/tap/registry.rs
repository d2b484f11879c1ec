//! Tap registry - indexes which handlers subscribe to which taps.
//!
//! The registry maps each tap to an ordered list of handlers.
//! Handlers are sorted by weight (lower = higher priority, called first);
//! handlers with equal weight keep their registration order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::event::{ContentEvent, Tap, TapVerdict};

/// Callback signature for tap handlers.
pub type TapCallback = dyn Fn(&ContentEvent<'_>) -> TapVerdict + Send + Sync;

/// A registered tap handler with a name and priority.
#[derive(Clone)]
pub struct TapHandler {
    /// Name for logs.
    pub name: String,
    /// Weight for ordering (lower = higher priority).
    pub weight: i32,
    pub callback: Arc<TapCallback>,
}

impl TapHandler {
    pub fn new<F>(name: impl Into<String>, weight: i32, callback: F) -> Self
    where
        F: Fn(&ContentEvent<'_>) -> TapVerdict + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            weight,
            callback: Arc::new(callback),
        }
    }

    pub fn call(&self, event: &ContentEvent<'_>) -> TapVerdict {
        (self.callback)(event)
    }
}

impl fmt::Debug for TapHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapHandler")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

/// Registry mapping taps to ordered handlers.
#[derive(Debug, Default)]
pub struct TapRegistry {
    handlers: HashMap<Tap, Vec<TapHandler>>,
}

impl TapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to a tap.
    pub fn register(&mut self, tap: Tap, handler: TapHandler) {
        let list = self.handlers.entry(tap).or_default();
        list.push(handler);
        list.sort_by_key(|h| h.weight);
    }

    /// Get handlers for a tap, in weight order.
    ///
    /// Returns an empty slice if nothing subscribes to the tap.
    pub fn get_handlers(&self, tap: Tap) -> &[TapHandler] {
        self.handlers.get(&tap).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Check if any handler subscribes to a tap.
    pub fn has_tap(&self, tap: Tap) -> bool {
        self.handlers
            .get(&tap)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    /// Get all taps with at least one handler.
    pub fn taps(&self) -> impl Iterator<Item = Tap> + '_ {
        self.handlers
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(tap, _)| *tap)
    }

    /// Get the count of handlers for a tap.
    pub fn handler_count(&self, tap: Tap) -> usize {
        self.handlers.get(&tap).map(|v| v.len()).unwrap_or(0)
    }

    /// Get total number of taps with handlers.
    pub fn tap_count(&self) -> usize {
        self.taps().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(_: &ContentEvent<'_>) -> TapVerdict {
        TapVerdict::Allow
    }

    #[test]
    fn empty_registry() {
        let registry = TapRegistry::new();
        assert_eq!(registry.tap_count(), 0);
        assert!(!registry.has_tap(Tap::Saving));
        assert!(registry.get_handlers(Tap::Saving).is_empty());
        assert_eq!(registry.handler_count(Tap::Saving), 0);
    }

    #[test]
    fn handlers_sorted_by_weight_then_registration() {
        let mut registry = TapRegistry::new();
        registry.register(Tap::Publishing, TapHandler::new("late", 10, allow));
        registry.register(Tap::Publishing, TapHandler::new("early", -5, allow));
        registry.register(Tap::Publishing, TapHandler::new("late-too", 10, allow));

        let names: Vec<&str> = registry
            .get_handlers(Tap::Publishing)
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(names, vec!["early", "late", "late-too"]);
        assert_eq!(registry.tap_count(), 1);
    }
}
