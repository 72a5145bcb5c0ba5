//! Worker tracker: discovery, health polling, termination, and token
//! accounting for worker subprocesses registered by the gateway bridge.

pub mod tracker;

pub use tracker::{TrackerError, TrackerResult, WorkerTracker};
