//! Ties the eight components together into one process lifecycle:
//! `init -> running -> draining -> stopped`. The store is a single typed
//! service owned here and handed out as `Arc`s, never a module-level
//! singleton reached from scattered call sites.

use crate::config::Config;
use crate::events::EventHub;
use crate::gateway::GatewayBridge;
use crate::state::StateStore;
use crate::watcher::Projector;
use crate::worker::WorkerTracker;
use crate::writer::MissionWriter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The running orchestrator: one state store, one hub, one projector, one
/// tracker, one writer, plus the cancellation token that propagates
/// shutdown to every task spawned below.
pub struct Mission {
    pub config: Config,
    pub store: Arc<StateStore>,
    pub hub: Arc<EventHub>,
    pub tracker: Arc<WorkerTracker>,
    pub bridge: Arc<GatewayBridge>,
    pub writer: MissionWriter,
    cancel: CancellationToken,
}

impl Mission {
    /// Bring up the store, hub, tracker, and watcher, and spawn their
    /// background loops. Does not block; the caller awaits shutdown
    /// separately (e.g. on a signal or a test's own cancellation).
    pub fn bootstrap(config: Config) -> anyhow::Result<Arc<Mission>> {
        let store = Arc::new(StateStore::new(config.audit_ring_capacity));
        let token = if config.auth_required() { Some(config.api_token.clone()) } else { None };
        let hub = EventHub::new(config.subscriber_queue_capacity, token);
        let tracker = WorkerTracker::new(store.clone(), hub.clone(), config.clone());
        let bridge = GatewayBridge::new();
        let writer = MissionWriter::new(config.mission_dir.clone());
        let cancel = CancellationToken::new();

        let projector = Projector::new(store.clone(), hub.clone(), config.mission_dir.clone());
        projector.spawn(cancel.clone())?;

        tracker.clone().spawn_poll_loop(config.mission_dir.join("state").join("workers.json"), cancel.clone());
        tracker.clone().spawn_heartbeat_loop(cancel.clone());

        info!(mission_dir = %config.mission_dir.display(), "mission bootstrapped");

        Ok(Arc::new(Mission { config, store, hub, tracker, bridge, writer, cancel }))
    }

    /// Cancel every background task, rooted at this single token: shutdown
    /// propagates from one root signal to every spawned task at once.
    pub fn shutdown(&self) {
        info!("mission shutting down");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Initialize structured logging: `tracing_subscriber::fmt` with an
/// `EnvFilter` defaulting to `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_and_shutdown_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.mission_dir = dir.path().to_path_buf();
        let mission = Mission::bootstrap(config).unwrap();
        assert!(!mission.cancellation_token().is_cancelled());
        mission.shutdown();
        assert!(mission.cancellation_token().is_cancelled());
    }
}
