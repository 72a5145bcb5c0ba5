//! MissionControl orchestrator runtime.
//!
//! A single human-facing "King" agent decides what to do; short-lived
//! "Worker" agents carry out scoped tasks. Every decision, briefing,
//! finding, and gate approval is a file on disk; this crate watches those
//! files, maintains a consistent in-memory projection, fans events out to
//! subscribers, and tracks worker subprocesses.
//!
//! Eight components, leaves first: the [`state`] store, the [`watcher`]
//! projector, the pure [`engine`], the [`worker`] tracker, the [`events`]
//! hub, the [`gateway`] bridge, the [`validator`] pipeline, and the
//! [`writer`] that makes writes to `.mission/` crash-safe.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod id;
pub mod model;
pub mod runtime;
pub mod state;
pub mod validator;
pub mod watcher;
pub mod worker;
pub mod writer;

pub use config::Config;
pub use error::MissionControlError;
pub use runtime::{init_tracing, Mission};
