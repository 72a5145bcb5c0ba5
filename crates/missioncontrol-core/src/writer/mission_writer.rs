//! Crash-atomic writes for `.mission/`.
//!
//! Every write goes through a temp-file + fsync + rename sequence rather
//! than a direct `std::fs::write`: `.mission/` is the system of record, so
//! a process killed mid-write must never leave a partially-written file
//! where a reader can observe it.

use crate::id::{checkpoint_id, task_id};
use crate::model::{AuditEntry, Checkpoint, Stage, Task};
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("id collision on {kind} {id}: treated as fatal")]
    IdCollision { kind: &'static str, id: String },
}

pub type WriterResult<T> = Result<T, WriterError>;

pub struct MissionWriter {
    mission_dir: PathBuf,
}

impl MissionWriter {
    pub fn new(mission_dir: impl Into<PathBuf>) -> Self {
        MissionWriter { mission_dir: mission_dir.into() }
    }

    fn state_dir(&self) -> PathBuf {
        self.mission_dir.join("state")
    }

    fn tasks_path(&self) -> PathBuf {
        self.state_dir().join("tasks.jsonl")
    }

    fn audit_path(&self) -> PathBuf {
        self.state_dir().join("audit.jsonl")
    }

    fn checkpoints_dir(&self) -> PathBuf {
        self.mission_dir.join("orchestrator").join("checkpoints")
    }

    /// Write `contents` to `path` crash-atomically: write to a sibling
    /// `.tempXXXX` file, fsync it, then rename over the target. On a
    /// partial write the temp file remains and the target is untouched;
    /// the watcher ignores `.temp*` files so it never observes the
    /// intermediate state.
    async fn atomic_write(&self, path: &Path, contents: &[u8]) -> WriterResult<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| WriterError::Io { path: dir.to_path_buf(), source })?;

        let temp_name = format!(".temp{}", uuid::Uuid::new_v4().simple());
        let temp_path = dir.join(temp_name);

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|source| WriterError::Io { path: temp_path.clone(), source })?;
        file.write_all(contents)
            .await
            .map_err(|source| WriterError::Io { path: temp_path.clone(), source })?;
        file.sync_all()
            .await
            .map_err(|source| WriterError::Io { path: temp_path.clone(), source })?;
        drop(file);

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|source| WriterError::Io { path: path.to_path_buf(), source })?;
        Ok(())
    }

    async fn read_to_string_or_empty(&self, path: &Path) -> WriterResult<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(WriterError::Io { path: path.to_path_buf(), source }),
        }
    }

    /// Mint a new task with a deterministic id and append it to
    /// `tasks.jsonl`. Every mutation emits an audit entry first.
    pub async fn create_task(
        &self,
        name: &str,
        stage: Stage,
        zone: &str,
        persona: &str,
        scope_paths: Vec<String>,
        actor: &str,
    ) -> WriterResult<Task> {
        let task = Task::new(name, stage, zone, persona, scope_paths, Utc::now());
        self.append_audit(actor, "task_created", &task.id, serde_json::json!({ "name": name }))
            .await?;
        self.append_task(&task).await?;
        Ok(task)
    }

    /// Append-or-replace `task` by id in `tasks.jsonl`: read existing,
    /// modify in memory, write to temp, fsync, rename over target.
    pub async fn append_task(&self, task: &Task) -> WriterResult<()> {
        let path = self.tasks_path();
        let raw = self.read_to_string_or_empty(&path).await?;
        let mut tasks: Vec<Task> = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let existing: Task =
                serde_json::from_str(line).map_err(|source| WriterError::Parse { path: path.clone(), source })?;
            if existing.id != task.id {
                tasks.push(existing);
            }
        }
        tasks.push(task.clone());

        let mut out = String::new();
        for t in &tasks {
            out.push_str(&serde_json::to_string(t).expect("Task serializes"));
            out.push('\n');
        }
        self.atomic_write(&path, out.as_bytes()).await
    }

    /// Append one audit record. Called before the corresponding data
    /// mutation is considered complete.
    pub async fn append_audit(
        &self,
        actor: &str,
        action: &str,
        subject_id: &str,
        details: serde_json::Value,
    ) -> WriterResult<()> {
        let entry = AuditEntry {
            ts: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            subject_id: subject_id.to_string(),
            details,
        };
        let path = self.audit_path();
        let mut existing = self.read_to_string_or_empty(&path).await?;
        existing.push_str(&serde_json::to_string(&entry).expect("AuditEntry serializes"));
        existing.push('\n');
        self.atomic_write(&path, existing.as_bytes()).await
    }

    /// Write a named checkpoint, rejecting a colliding id as fatal (an id
    /// collision here would mean two checkpoints minted with the same name
    /// in the same instant; extraordinarily rare).
    pub async fn write_checkpoint(
        &self,
        name: &str,
        stage: Stage,
        task_set_fingerprint: &str,
        auto: bool,
    ) -> WriterResult<Checkpoint> {
        let created_at = Utc::now();
        let id = checkpoint_id(name, &created_at.to_rfc3339());
        let path = self.checkpoints_dir().join(format!("{}.json", id));
        if path.exists() {
            return Err(WriterError::IdCollision { kind: "checkpoint", id });
        }
        let checkpoint = Checkpoint {
            id: id.clone(),
            name: name.to_string(),
            stage,
            task_set_fingerprint: task_set_fingerprint.to_string(),
            auto,
            created_at,
        };
        self.append_audit(
            "orchestrator",
            "checkpoint_created",
            &id,
            serde_json::json!({ "name": name, "stage": stage }),
        )
        .await?;
        let body = serde_json::to_string_pretty(&checkpoint).expect("Checkpoint serializes");
        self.atomic_write(&path, body.as_bytes()).await?;
        Ok(checkpoint)
    }
}

/// Re-derive a task id the same way [`Task::new`] does, for callers that
/// only have the creation parts (e.g. the CLI's `commit` path validating a
/// provenance trailer against a task that should exist).
pub fn rederive_task_id(name: &str, stage: Stage, zone: &str, persona: &str) -> String {
    task_id([name, stage.as_str(), zone, persona])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_task_then_append_task_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MissionWriter::new(dir.path());
        let task = writer
            .create_task("login", Stage::Implement, "z", "developer", vec!["cmd/login/".into()], "king")
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(writer.tasks_path()).await.unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 1);
        let round_tripped: Task = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(round_tripped, task);
    }

    #[tokio::test]
    async fn appending_existing_task_replaces_not_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MissionWriter::new(dir.path());
        let mut task = writer
            .create_task("login", Stage::Implement, "z", "developer", vec![], "king")
            .await
            .unwrap();
        task.status = crate::model::TaskStatus::Ready;
        writer.append_task(&task).await.unwrap();

        let raw = tokio::fs::read_to_string(writer.tasks_path()).await.unwrap();
        assert_eq!(raw.lines().count(), 1);
    }

    #[tokio::test]
    async fn audit_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MissionWriter::new(dir.path());
        writer.append_audit("king", "mission_started", "m1", serde_json::json!({})).await.unwrap();
        writer.append_audit("king", "stage_advanced", "m1", serde_json::json!({})).await.unwrap();
        let raw = tokio::fs::read_to_string(writer.audit_path()).await.unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[tokio::test]
    async fn no_temp_file_left_behind_after_successful_write() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MissionWriter::new(dir.path());
        writer
            .create_task("login", Stage::Implement, "z", "developer", vec![], "king")
            .await
            .unwrap();
        let mut entries = tokio::fs::read_dir(writer.state_dir()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name();
            assert!(!name.to_string_lossy().starts_with(".temp"));
        }
    }
}
