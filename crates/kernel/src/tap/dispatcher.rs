//! Tap dispatcher - invokes handlers in weight order.
//!
//! For cancellable taps the first `Deny` stops dispatch and vetoes the
//! operation. For informational taps every handler runs and verdicts are
//! ignored.

use parking_lot::RwLock;
use tracing::debug;

use super::event::{ContentEvent, Tap, TapVerdict};
use super::registry::{TapHandler, TapRegistry};

/// Dispatcher for invoking content taps.
#[derive(Debug, Default)]
pub struct TapDispatcher {
    registry: RwLock<TapRegistry>,
}

impl TapDispatcher {
    /// Create a dispatcher with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dispatcher over a prepared registry.
    pub fn with_registry(registry: TapRegistry) -> Self {
        Self {
            registry: RwLock::new(registry),
        }
    }

    /// Subscribe a handler.
    pub fn register(&self, tap: Tap, handler: TapHandler) {
        debug!(tap = %tap, handler = %handler.name, weight = handler.weight, "tap handler registered");
        self.registry.write().register(tap, handler);
    }

    /// Subscribe a closure.
    pub fn on<F>(&self, tap: Tap, name: impl Into<String>, weight: i32, callback: F)
    where
        F: Fn(&ContentEvent<'_>) -> TapVerdict + Send + Sync + 'static,
    {
        self.register(tap, TapHandler::new(name, weight, callback));
    }

    /// Number of handlers subscribed to a tap.
    pub fn handler_count(&self, tap: Tap) -> usize {
        self.registry.read().handler_count(tap)
    }

    /// Dispatch an event.
    ///
    /// Returns `Deny` only for a cancellable tap that a handler vetoed.
    pub fn dispatch(&self, event: &ContentEvent<'_>) -> TapVerdict {
        // Handlers may register further handlers; never call them under the lock.
        let handlers: Vec<TapHandler> = self.registry.read().get_handlers(event.tap).to_vec();
        if handlers.is_empty() {
            return TapVerdict::Allow;
        }

        let cancellable = event.tap.is_cancellable();
        for handler in &handlers {
            let verdict = handler.call(event);
            if cancellable && verdict == TapVerdict::Deny {
                debug!(tap = %event.tap, handler = %handler.name, "operation cancelled by tap handler");
                return TapVerdict::Deny;
            }
        }

        debug!(tap = %event.tap, handlers = handlers.len(), "dispatch complete");
        TapVerdict::Allow
    }

    /// Dispatch a cancellable event; `true` means the operation may proceed.
    pub fn allows(&self, event: &ContentEvent<'_>) -> bool {
        self.dispatch(event) == TapVerdict::Allow
    }
}
