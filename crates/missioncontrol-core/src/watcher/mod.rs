//! File watcher & projector: watches `.mission/` for changes, debounces,
//! parses, diffs against the store, and publishes the resulting events.

pub mod parse;
pub mod projector;

pub use projector::{Projector, WatcherError, WatcherResult};
