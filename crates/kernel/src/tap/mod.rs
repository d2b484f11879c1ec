//! Tap system for content lifecycle extension points.
//!
//! Taps are named extension points that handlers subscribe to. When a tap is
//! invoked, its handlers are called in weight order (lower = higher priority).
//! Handlers on "-ing" taps can veto the operation.

mod dispatcher;
mod event;
mod registry;

pub use dispatcher::TapDispatcher;
pub use event::{ContentEvent, EventPayload, Tap, TapVerdict};
pub use registry::{TapCallback, TapHandler, TapRegistry};
