//! Shared building blocks for the storefront cache layer
//!
//! Both the tiered key-value cache and the binary asset cache are built on
//! the same three pieces: a probed set of storage capabilities, an injectable
//! clock, and a per-key registry of in-flight requests so that at most one
//! fetch per cache key runs at a time.

pub mod backend;
pub mod clock;
pub mod inflight;

pub use backend::{BackendKind, Capabilities};
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use inflight::{InFlightRegistry, Joined};
