//! Crate-level error aggregation for the CLI boundary. Every component
//! keeps its own `thiserror` enum (`StoreError`, `WatcherError`,
//! `TrackerError`, `HubError`, `BridgeError`, `WriterError`); this type
//! exists only so the CLI can propagate any of them with `?`.

use crate::events::HubError;
use crate::gateway::BridgeError;
use crate::state::StoreError;
use crate::watcher::WatcherError;
use crate::worker::TrackerError;
use crate::writer::WriterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MissionControlError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Watcher(#[from] WatcherError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
