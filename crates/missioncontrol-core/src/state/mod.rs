//! The state store: a typed, in-memory projection of `.mission/`.
//!
//! Single-writer, many-readers. Readers take a short lock solely to clone
//! the slice of state they need; no I/O or parsing ever happens while the
//! lock is held.

pub mod store;

pub use store::{Change, ChangeEvent, StateSnapshot, StateStore, StoreError, StoreResult};
