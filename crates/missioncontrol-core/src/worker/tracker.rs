//! Worker discovery, liveness polling, termination, and token accounting.
//!
//! Polling and heartbeat loops are `tokio::spawn`ed tasks owning an
//! `Arc<StateStore>` + `Arc<EventHub>`, each selecting on a shutdown signal
//! alongside its own tick.

use crate::config::Config;
use crate::events::{Event, EventHub, Topic};
use crate::model::{Worker, WorkerStatus};
use crate::state::{Change, StateStore, StoreError};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session_key must not be empty")]
    EmptySessionKey,
    #[error("task_id must not be empty")]
    EmptyTaskId,
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed workers.json at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Debug, Clone)]
struct PendingStart {
    started_at: chrono::DateTime<Utc>,
}

/// Tracks worker subprocesses: registration, liveness, termination, tokens.
pub struct WorkerTracker {
    store: Arc<StateStore>,
    hub: Arc<EventHub>,
    config: Config,
    /// Session keys with a lifecycle `start` seen before registration
    /// arrived; replayed once `register` lands.
    pending_starts: Mutex<HashMap<String, PendingStart>>,
    /// `(session_key, phase)` already processed, for idempotent replay.
    processed_phases: Mutex<HashSet<(String, &'static str)>>,
    session_to_worker: Mutex<HashMap<String, String>>,
}

impl WorkerTracker {
    pub fn new(store: Arc<StateStore>, hub: Arc<EventHub>, config: Config) -> Arc<Self> {
        Arc::new(WorkerTracker {
            store,
            hub,
            config,
            pending_starts: Mutex::new(HashMap::new()),
            processed_phases: Mutex::new(HashSet::new()),
            session_to_worker: Mutex::new(HashMap::new()),
        })
    }

    /// `worker.register(session_key, label, task_id, persona, zone, model)`.
    /// Rejected if `session_key` or `task_id` is empty.
    pub async fn register(
        &self,
        session_key: &str,
        task_id: &str,
        persona: &str,
        zone: &str,
        model: &str,
    ) -> TrackerResult<String> {
        if session_key.is_empty() {
            return Err(TrackerError::EmptySessionKey);
        }
        if task_id.is_empty() {
            return Err(TrackerError::EmptyTaskId);
        }

        let worker_id = crate::id::worker_id(session_key);
        let started_at = {
            let pending = self.pending_starts.lock().await;
            pending.get(session_key).map(|p| p.started_at).unwrap_or_else(Utc::now)
        };

        let worker = Worker {
            worker_id: worker_id.clone(),
            persona: persona.to_string(),
            task_id: task_id.to_string(),
            zone: zone.to_string(),
            model: model.to_string(),
            pid: None,
            status: WorkerStatus::Running,
            started_at,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
        };

        let event = self.store.apply(Change::UpsertWorker(worker))?;
        self.hub.publish(Event::from_change(&event)).await;

        self.session_to_worker
            .lock()
            .await
            .insert(session_key.to_string(), worker_id.clone());
        self.pending_starts.lock().await.remove(session_key);

        info!(worker_id = %worker_id, session_key, "worker registered");
        Ok(worker_id)
    }

    /// `agent.event(session_key, phase ∈ {start, end}, started_at)`. A
    /// `start` arriving before registration is buffered and replayed by
    /// [`register`]; repeated phases for the same session are no-ops.
    pub async fn handle_lifecycle(
        &self,
        session_key: &str,
        phase: &'static str,
        started_at: chrono::DateTime<Utc>,
    ) -> TrackerResult<()> {
        let mut processed = self.processed_phases.lock().await;
        let key = (session_key.to_string(), phase);
        if processed.contains(&key) {
            return Ok(());
        }
        processed.insert(key);
        drop(processed);

        let worker_id = self.session_to_worker.lock().await.get(session_key).cloned();
        match (phase, worker_id) {
            ("start", None) => {
                self.pending_starts
                    .lock()
                    .await
                    .insert(session_key.to_string(), PendingStart { started_at });
            }
            ("end", Some(id)) => {
                self.finish(&id, WorkerStatus::Complete).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn finish(&self, worker_id: &str, status: WorkerStatus) -> TrackerResult<()> {
        let event = self.store.apply(Change::WorkerStatus {
            worker_id: worker_id.to_string(),
            status,
        })?;
        self.hub.publish(Event::from_change(&event)).await;
        Ok(())
    }

    /// `update_tokens`: accumulates monotonically and recomputes cost from
    /// cumulative totals (never by summing deltas, to avoid rounding drift).
    pub async fn update_tokens(
        &self,
        worker_id: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> TrackerResult<()> {
        let event = self.store.apply(Change::WorkerTokens {
            worker_id: worker_id.to_string(),
            input_tokens,
            output_tokens,
        })?;
        self.hub.publish(Event::from_change(&event)).await;

        let snapshot = self.store.snapshot()?;
        if let Some(worker) = snapshot.workers.get(worker_id) {
            let rate = self.config.model_rate(&worker.model);
            let cost = rate.cost(worker.input_tokens, worker.output_tokens);
            let event = self.store.apply(Change::WorkerCost {
                worker_id: worker_id.to_string(),
                cost_usd: cost,
            })?;
            self.hub.publish(Event::from_change(&event)).await;
        }
        Ok(())
    }

    /// Graceful termination: signal, wait up to 5 seconds, force-kill if
    /// still alive. Idempotent on an already-dead process.
    pub async fn terminate(&self, worker_id: &str, pid: u32) -> TrackerResult<()> {
        send_signal(pid, "-TERM");
        let deadline = tokio::time::Instant::now() + TERMINATE_GRACE;
        while tokio::time::Instant::now() < deadline {
            if !is_process_alive(pid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        if is_process_alive(pid) {
            send_signal(pid, "-KILL");
        }
        self.finish(worker_id, WorkerStatus::Killed).await
    }

    /// Re-read `workers.json` and reconcile: create unknown entries, update
    /// changed statuses, and flip `running` entries whose pid has died to
    /// `error`.
    pub async fn reconcile_workers_file(&self, path: &Path) -> TrackerResult<()> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(TrackerError::Io { path: path.to_path_buf(), source }),
        };
        let entries: Vec<Worker> = serde_json::from_str(&raw)
            .map_err(|source| TrackerError::Parse { path: path.to_path_buf(), source })?;

        let snapshot = self.store.snapshot()?;
        for mut entry in entries {
            if entry.status == WorkerStatus::Running {
                if let Some(pid) = entry.pid {
                    if !is_process_alive(pid) {
                        entry.status = WorkerStatus::Error;
                    }
                }
            }
            let changed = snapshot
                .workers
                .get(&entry.worker_id)
                .map(|existing| existing != &entry)
                .unwrap_or(true);
            if changed {
                let event = self.store.apply(Change::UpsertWorker(entry))?;
                self.hub.publish(Event::from_change(&event)).await;
            }
        }
        Ok(())
    }

    /// Spawn the polling loop (re-reads `workers.json` every ~2s).
    pub fn spawn_poll_loop(self: Arc<Self>, workers_json: PathBuf, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.reconcile_workers_file(&workers_json).await {
                            warn!(error = %e, "worker reconciliation failed");
                        }
                    }
                }
            }
        });
    }

    /// Spawn the heartbeat loop (emits `worker.heartbeat` every ~5s for
    /// every currently-running worker).
    pub fn spawn_heartbeat_loop(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Ok(snapshot) = self.store.snapshot() {
                            for worker in snapshot.workers.values().filter(|w| w.status == WorkerStatus::Running) {
                                self.hub
                                    .publish(Event {
                                        topic: Topic::Worker,
                                        kind: "heartbeat",
                                        data: serde_json::json!({ "id": worker.worker_id }),
                                    })
                                    .await;
                            }
                        }
                    }
                }
            }
        });
    }
}

fn is_process_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn send_signal(pid: u32, flag: &str) {
    let _ = Command::new("kill").args([flag, &pid.to_string()]).status();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn new_tracker() -> Arc<WorkerTracker> {
        let store = Arc::new(StateStore::new(1000));
        let hub = EventHub::new(256, None);
        WorkerTracker::new(store, hub, Config::default())
    }

    #[tokio::test]
    async fn register_rejects_empty_session_key() {
        let tracker = new_tracker();
        let result = tracker.register("", "task-1", "developer", "z", "m").await;
        assert!(matches!(result, Err(TrackerError::EmptySessionKey)));
    }

    #[tokio::test]
    async fn out_of_order_registration_replays_exactly_once() {
        let tracker = new_tracker();
        tracker
            .handle_lifecycle("sess-1", "start", Utc::now())
            .await
            .unwrap();
        let worker_id = tracker
            .register("sess-1", "task-1", "developer", "z", "m")
            .await
            .unwrap();

        let snapshot = tracker.store.snapshot().unwrap();
        assert_eq!(snapshot.workers.len(), 1);
        assert!(snapshot.workers.contains_key(&worker_id));

        // A duplicate start afterward is a no-op: still one worker entry.
        tracker
            .handle_lifecycle("sess-1", "start", Utc::now())
            .await
            .unwrap();
        let snapshot = tracker.store.snapshot().unwrap();
        assert_eq!(snapshot.workers.len(), 1);
    }

    #[tokio::test]
    async fn token_update_recomputes_cost_from_cumulative_totals() {
        let tracker = new_tracker();
        let worker_id = tracker
            .register("sess-2", "task-2", "developer", "z", "gpt")
            .await
            .unwrap();
        tracker.update_tokens(&worker_id, 100, 50).await.unwrap();
        let snapshot = tracker.store.snapshot().unwrap();
        let worker = snapshot.workers.get(&worker_id).unwrap();
        assert!(worker.cost_usd > 0.0);
    }
}
