//! The watcher loop: debounce filesystem events, re-read the changed file,
//! diff it against the store, and publish the resulting event.
//!
//! A `notify::recommended_watcher` closure feeds an `mpsc` channel via
//! `blocking_send`, and a `tokio::select!` loop drains it alongside a
//! shutdown signal. Debounce uses a per-path last-seen `Instant` and a
//! single reprocessing tick rather than a timer per event, so a burst of
//! writes to one file collapses into a single re-read.

use crate::events::{Event as HubEvent, EventHub};
use crate::model::AuditEntry;
use crate::state::{Change, StateStore};
use crate::watcher::parse;
use notify::{Event as NotifyEvent, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEBOUNCE: Duration = Duration::from_millis(50);
const TICK: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to create filesystem watcher: {0}")]
    CreateWatcher(#[source] notify::Error),
    #[error("failed to watch path {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

pub type WatcherResult<T> = Result<T, WatcherError>;

/// Watches `.mission/state/`, `.mission/findings/`, `.mission/handoffs/`,
/// and `.mission/orchestrator/checkpoints/`, projecting changes into the
/// state store. `.mission/state/workers.json` is deliberately excluded:
/// the worker tracker owns its own 2-second poll loop over that file, so
/// the projector never races it.
pub struct Projector {
    store: Arc<StateStore>,
    hub: Arc<EventHub>,
    mission_dir: PathBuf,
}

impl Projector {
    pub fn new(store: Arc<StateStore>, hub: Arc<EventHub>, mission_dir: PathBuf) -> Arc<Self> {
        Arc::new(Projector { store, hub, mission_dir })
    }

    /// Start watching and spawn the debounce/reprocess loop. Returns once
    /// the watcher is registered; the loop itself runs until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> WatcherResult<()> {
        let (tx, mut rx) = mpsc::channel::<PathBuf>(256);

        let watched_dirs = [
            self.mission_dir.join("state"),
            self.mission_dir.join("findings"),
            self.mission_dir.join("handoffs"),
            self.mission_dir.join("orchestrator").join("checkpoints"),
        ];

        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| match res {
            Ok(event) => {
                for path in event.paths {
                    let _ = tx.blocking_send(path);
                }
            }
            Err(e) => warn!(error = %e, "filesystem watch error"),
        })
        .map_err(WatcherError::CreateWatcher)?;

        for dir in &watched_dirs {
            if dir.exists() {
                watcher
                    .watch(dir, RecursiveMode::NonRecursive)
                    .map_err(|source| WatcherError::Watch { path: dir.clone(), source })?;
            }
        }

        tokio::spawn(async move {
            // Keep the watcher alive for as long as this task runs; dropping
            // it would stop delivery of further filesystem events.
            let _watcher = watcher;
            let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
            let mut ticker = tokio::time::interval(TICK);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some(path) = rx.recv() => {
                        pending.insert(path, Instant::now());
                    }
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let ready: Vec<PathBuf> = pending
                            .iter()
                            .filter(|(_, seen)| now.duration_since(**seen) >= DEBOUNCE)
                            .map(|(p, _)| p.clone())
                            .collect();
                        for path in ready {
                            pending.remove(&path);
                            self.reprocess(&path).await;
                        }
                    }
                }
            }
            debug!("projector loop exiting");
        });

        Ok(())
    }

    async fn reprocess(&self, path: &Path) {
        let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
            return;
        };
        if file_name.starts_with(".temp") || file_name.starts_with(".tmp") {
            return; // mission writer's in-flight temp file; not a real change
        }
        if file_name == "workers.json" {
            return; // owned by the worker tracker's own poll loop
        }

        let result: Result<(), String> = if file_name == "stage.json" {
            self.reprocess_stage(path).await
        } else if file_name == "gates.json" {
            self.reprocess_gates(path).await
        } else if file_name == "tasks.jsonl" {
            self.reprocess_tasks(path).await
        } else if is_under(path, "findings") && path.extension().and_then(|e| e.to_str()) == Some("md") {
            self.reprocess_finding(path).await
        } else if is_under(path, "checkpoints") && path.extension().and_then(|e| e.to_str()) == Some("json") {
            self.reprocess_checkpoint(path).await
        } else {
            Ok(())
        };

        if let Err(reason) = result {
            self.emit_parse_error(path, &reason).await;
        }
    }

    async fn reprocess_stage(&self, path: &Path) -> Result<(), String> {
        let raw = read(path).await?;
        let stage = parse::parse_stage(&raw).map_err(|e| e.to_string())?;
        self.apply_and_publish(Change::SetStage(stage)).await.map_err(|e| e.to_string())
    }

    async fn reprocess_gates(&self, path: &Path) -> Result<(), String> {
        let raw = read(path).await?;
        let gates = parse::parse_gates(&raw).map_err(|e| e.to_string())?;
        for (stage, gate) in gates {
            if let Err(e) = self.apply_and_publish(Change::SetGate { stage, gate }).await {
                self.emit_parse_error(path, &format!("gate {}: {}", stage, e)).await;
            }
        }
        Ok(())
    }

    async fn reprocess_tasks(&self, path: &Path) -> Result<(), String> {
        let raw = read(path).await?;
        let tasks = parse::parse_tasks_jsonl(&raw).map_err(|e| e.to_string())?;
        for task in tasks {
            let id = task.id.clone();
            if let Err(e) = self.apply_and_publish(Change::UpsertTask(task)).await {
                self.emit_parse_error(path, &format!("task {}: {}", id, e)).await;
            }
        }
        Ok(())
    }

    async fn reprocess_finding(&self, path: &Path) -> Result<(), String> {
        let Some(task_id) = path.file_stem().and_then(|s| s.to_str()) else {
            return Err("findings file has no task id stem".to_string());
        };
        self.apply_and_publish(Change::FindingsAppeared { task_id: task_id.to_string() })
            .await
            .map_err(|e| e.to_string())
    }

    async fn reprocess_checkpoint(&self, path: &Path) -> Result<(), String> {
        let raw = read(path).await?;
        let checkpoint = parse::parse_checkpoint(&raw).map_err(|e| e.to_string())?;
        self.apply_and_publish(Change::CheckpointAdded(checkpoint))
            .await
            .map_err(|e| e.to_string())
    }

    async fn apply_and_publish(&self, change: Change) -> Result<(), crate::state::StoreError> {
        let event = self.store.apply(change)?;
        self.hub.publish(HubEvent::from_change(&event)).await;
        Ok(())
    }

    async fn emit_parse_error(&self, path: &Path, reason: &str) {
        warn!(path = %path.display(), reason, "watcher parse error");
        let entry = AuditEntry {
            ts: chrono::Utc::now(),
            actor: "watcher".to_string(),
            action: "parse_error".to_string(),
            subject_id: path.display().to_string(),
            details: serde_json::json!({ "reason": reason }),
        };
        if let Ok(event) = self.store.apply(Change::AuditAppend(entry)) {
            self.hub.publish(HubEvent::from_change(&event)).await;
        }
    }
}

fn is_under(path: &Path, dir_name: &str) -> bool {
    path.parent().map(|p| p.ends_with(dir_name)).unwrap_or(false)
}

async fn read(path: &Path) -> Result<String, String> {
    tokio::fs::read_to_string(path).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stage;

    fn new_projector(dir: &Path) -> Arc<Projector> {
        let store = Arc::new(StateStore::new(1000));
        let hub = EventHub::new(256, None);
        Projector::new(store, hub, dir.to_path_buf())
    }

    #[tokio::test]
    async fn reprocessing_stage_file_updates_store() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        tokio::fs::create_dir_all(&state_dir).await.unwrap();
        let stage_path = state_dir.join("stage.json");
        tokio::fs::write(&stage_path, r#"{"current":"discovery","updated_at":"2024-01-01T00:00:00Z"}"#)
            .await
            .unwrap();

        let projector = new_projector(dir.path());
        projector.reprocess(&stage_path).await;

        let snapshot = projector.store.snapshot().unwrap();
        assert_eq!(snapshot.stage, Some(Stage::Discovery));
    }

    #[tokio::test]
    async fn malformed_stage_file_emits_parse_error_without_mutating_store() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        tokio::fs::create_dir_all(&state_dir).await.unwrap();
        let stage_path = state_dir.join("stage.json");
        tokio::fs::write(&stage_path, "not json").await.unwrap();

        let projector = new_projector(dir.path());
        projector.reprocess(&stage_path).await;

        let snapshot = projector.store.snapshot().unwrap();
        assert_eq!(snapshot.stage, None);
        assert_eq!(snapshot.audit_tail.len(), 1);
        assert_eq!(snapshot.audit_tail[0].action, "parse_error");
    }

    #[tokio::test]
    async fn findings_file_marks_task_done() {
        let dir = tempfile::tempdir().unwrap();
        let findings_dir = dir.path().join("findings");
        tokio::fs::create_dir_all(&findings_dir).await.unwrap();

        let projector = new_projector(dir.path());
        let task = crate::model::Task::new("t", Stage::Implement, "z", "developer", vec![], chrono::Utc::now());
        let id = task.id.clone();
        projector.store.apply(Change::UpsertTask(task)).unwrap();

        let finding_path = findings_dir.join(format!("{}.md", id));
        tokio::fs::write(&finding_path, "summary of work done").await.unwrap();
        projector.reprocess(&finding_path).await;

        let snapshot = projector.store.snapshot().unwrap();
        assert_eq!(snapshot.tasks.get(&id).unwrap().status, crate::model::TaskStatus::Done);
        assert!(snapshot.findings.contains(&id));
    }

    #[test]
    fn temp_files_are_ignored() {
        let path = Path::new("/mission/state/.tempabcd");
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with(".temp"));
    }
}
