//! In-memory projection of `.mission/`, guarded by a single `RwLock`.
//!
//! Plain in-memory maps, not a secondary durable store: the filesystem
//! under `.mission/` is the canonical store, so there is nothing else to
//! keep in sync.

use crate::engine;
use crate::model::{AuditEntry, Checkpoint, Gate, GateStatus, Stage, Task, TaskStatus, Worker, WorkerStatus};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lock poisoned")]
    LockPoisoned,
    #[error("unknown task {0}")]
    UnknownTask(String),
    #[error("unknown worker {0}")]
    UnknownWorker(String),
    #[error("invalid stage transition from {from} to {to}")]
    InvalidStageTransition { from: Stage, to: Stage },
    #[error("invalid task status transition for {task_id}: {from:?} -> {to:?}")]
    InvalidTaskTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("worker {worker_id} is terminal; no further mutation permitted")]
    TerminalWorkerMutation { worker_id: String },
    #[error("non-monotonic token update for worker {worker_id}")]
    NonMonotonicTokenUpdate { worker_id: String },
    #[error("blocked task {task_id} requires a reason")]
    MissingBlockedReason { task_id: String },
    #[error("gate for stage {stage} is not approvable: unsatisfied criteria or missing approver")]
    GateNotApprovable { stage: Stage },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A deep, point-in-time copy of the store, sent whole to new subscribers
/// and passed by reference into the pure stage/gate engine.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub stage: Option<Stage>,
    pub gates: HashMap<Stage, Gate>,
    pub tasks: HashMap<String, Task>,
    pub workers: HashMap<String, Worker>,
    pub audit_tail: VecDeque<AuditEntry>,
    pub findings: HashSet<String>,
    pub checkpoints: HashSet<String>,
}

/// A validated mutation applied to the store.
#[derive(Debug, Clone)]
pub enum Change {
    SetStage(Stage),
    UpsertTask(Task),
    SetGate { stage: Stage, gate: Gate },
    UpsertWorker(Worker),
    WorkerTokens { worker_id: String, input_tokens: u64, output_tokens: u64 },
    WorkerCost { worker_id: String, cost_usd: f64 },
    WorkerStatus { worker_id: String, status: WorkerStatus },
    FindingsAppeared { task_id: String },
    AuditAppend(AuditEntry),
    CheckpointAdded(Checkpoint),
}

/// The typed description of what changed, published on the event hub.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    StageAdvanced { from: Option<Stage>, to: Stage },
    TaskCreated { id: String },
    TaskUpdated { id: String },
    GateStatusChanged { stage: Stage, status: GateStatus },
    WorkerAppeared { id: String },
    WorkerStatusChanged { id: String, status: WorkerStatus },
    WorkerTokensUpdated { id: String },
    FindingsReady { task_id: String },
    AuditAppended { subject_id: String },
    CheckpointAdded { id: String },
}

pub struct StateStore {
    inner: RwLock<StateSnapshot>,
    audit_ring_capacity: usize,
}

impl StateStore {
    pub fn new(audit_ring_capacity: usize) -> Self {
        StateStore {
            inner: RwLock::new(StateSnapshot::default()),
            audit_ring_capacity,
        }
    }

    /// A deep copy of the current state, suitable for a new subscriber's
    /// `sync.initial_state` frame.
    pub fn snapshot(&self) -> StoreResult<StateSnapshot> {
        let guard = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(guard.clone())
    }

    /// Apply one validated change, returning the typed event describing it.
    /// Rejects changes that would break an invariant; the store itself is
    /// left untouched on rejection.
    pub fn apply(&self, change: Change) -> StoreResult<ChangeEvent> {
        let mut guard = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        let event = Self::apply_locked(&mut guard, change, self.audit_ring_capacity)?;
        Self::recompute_gates(&mut guard);
        Ok(event)
    }

    fn apply_locked(
        state: &mut StateSnapshot,
        change: Change,
        audit_ring_capacity: usize,
    ) -> StoreResult<ChangeEvent> {
        match change {
            Change::SetStage(to) => {
                let from = state.stage;
                if let Some(from_stage) = from {
                    if from_stage != to && from_stage.next() != Some(to) {
                        return Err(StoreError::InvalidStageTransition { from: from_stage, to });
                    }
                }
                state.stage = Some(to);
                Ok(ChangeEvent::StageAdvanced { from, to })
            }
            Change::UpsertTask(task) => {
                if task.status == TaskStatus::Blocked && task.blocked_reason.is_none() {
                    return Err(StoreError::MissingBlockedReason { task_id: task.id });
                }
                let created = !state.tasks.contains_key(&task.id);
                if let Some(existing) = state.tasks.get(&task.id) {
                    if existing.status != task.status
                        && !crate::model::task_status_transition_allowed(existing.status, task.status)
                    {
                        return Err(StoreError::InvalidTaskTransition {
                            task_id: task.id,
                            from: existing.status,
                            to: task.status,
                        });
                    }
                }
                let id = task.id.clone();
                state.tasks.insert(id.clone(), task);
                Ok(if created {
                    ChangeEvent::TaskCreated { id }
                } else {
                    ChangeEvent::TaskUpdated { id }
                })
            }
            Change::SetGate { stage, gate } => {
                let wants_open = gate.status == GateStatus::Open;
                let previous = state.gates.insert(stage, gate.clone());
                if wants_open {
                    let blockers = engine::gate_blockers(state, stage);
                    if !blockers.is_empty() || gate.approved_by.is_none() {
                        // Reject: an open gate must have every criterion
                        // satisfied and a recorded approver at the moment
                        // of approval (invariant 3).
                        match previous {
                            Some(old) => {
                                state.gates.insert(stage, old);
                            }
                            None => {
                                state.gates.remove(&stage);
                            }
                        }
                        return Err(StoreError::GateNotApprovable { stage });
                    }
                }
                Ok(ChangeEvent::GateStatusChanged { stage, status: gate.status })
            }
            Change::UpsertWorker(worker) => {
                let id = worker.worker_id.clone();
                let is_new = !state.workers.contains_key(&id);
                let status = worker.status;
                state.workers.insert(id.clone(), worker);
                Ok(if is_new {
                    ChangeEvent::WorkerAppeared { id }
                } else {
                    ChangeEvent::WorkerStatusChanged { id, status }
                })
            }
            Change::WorkerTokens { worker_id, input_tokens, output_tokens } => {
                let worker = state
                    .workers
                    .get_mut(&worker_id)
                    .ok_or_else(|| StoreError::UnknownWorker(worker_id.clone()))?;
                if worker.status.is_terminal() {
                    return Err(StoreError::TerminalWorkerMutation { worker_id });
                }
                if input_tokens < worker.input_tokens || output_tokens < worker.output_tokens {
                    return Err(StoreError::NonMonotonicTokenUpdate { worker_id });
                }
                worker.input_tokens = input_tokens;
                worker.output_tokens = output_tokens;
                Ok(ChangeEvent::WorkerTokensUpdated { id: worker_id })
            }
            Change::WorkerCost { worker_id, cost_usd } => {
                let worker = state
                    .workers
                    .get_mut(&worker_id)
                    .ok_or_else(|| StoreError::UnknownWorker(worker_id.clone()))?;
                worker.cost_usd = cost_usd;
                Ok(ChangeEvent::WorkerTokensUpdated { id: worker_id })
            }
            Change::WorkerStatus { worker_id, status } => {
                let worker = state
                    .workers
                    .get_mut(&worker_id)
                    .ok_or_else(|| StoreError::UnknownWorker(worker_id.clone()))?;
                if worker.status.is_terminal() {
                    return Err(StoreError::TerminalWorkerMutation { worker_id });
                }
                worker.status = status;
                Ok(ChangeEvent::WorkerStatusChanged { id: worker_id, status })
            }
            Change::FindingsAppeared { task_id } => {
                state.findings.insert(task_id.clone());
                if let Some(task) = state.tasks.get_mut(&task_id) {
                    if !task.status.is_terminal() {
                        task.status = TaskStatus::Done;
                        task.updated_at = chrono::Utc::now();
                    }
                } else {
                    return Err(StoreError::UnknownTask(task_id));
                }
                // Unlike writer-driven mutations, a findings file is written by an
                // external worker directly to disk, so no audit entry for it exists
                // until the store records one here.
                state.audit_tail.push_back(AuditEntry {
                    ts: chrono::Utc::now(),
                    actor: "system".to_string(),
                    action: "findings_written".to_string(),
                    subject_id: task_id.clone(),
                    details: serde_json::Value::Null,
                });
                while state.audit_tail.len() > audit_ring_capacity {
                    state.audit_tail.pop_front();
                }
                Ok(ChangeEvent::FindingsReady { task_id })
            }
            Change::AuditAppend(entry) => {
                let subject_id = entry.subject_id.clone();
                state.audit_tail.push_back(entry);
                while state.audit_tail.len() > audit_ring_capacity {
                    state.audit_tail.pop_front();
                }
                Ok(ChangeEvent::AuditAppended { subject_id })
            }
            Change::CheckpointAdded(checkpoint) => {
                let id = checkpoint.id.clone();
                state.checkpoints.insert(id.clone());
                Ok(ChangeEvent::CheckpointAdded { id })
            }
        }
    }

    /// Pure recomputation: rather than maintaining back-pointers between
    /// tasks and gates, the store simply asks the engine to recompute every
    /// gate's status from the current snapshot after any change.
    fn recompute_gates(state: &mut StateSnapshot) {
        let stages: Vec<Stage> = state.gates.keys().copied().collect();
        for stage in stages {
            let status = engine::gate_status(state, stage);
            if let Some(gate) = state.gates.get_mut(&stage) {
                gate.status = status;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Gate, GateCriterion, Task};
    use chrono::Utc;

    #[test]
    fn stage_advance_must_be_adjacent() {
        let store = StateStore::new(10);
        store.apply(Change::SetStage(Stage::Discovery)).unwrap();
        let err = store.apply(Change::SetStage(Stage::Requirements)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidStageTransition { .. }));
    }

    #[test]
    fn findings_appearance_auto_transitions_task_to_done() {
        let store = StateStore::new(10);
        let task = Task::new("t", Stage::Implement, "z", "developer", vec![], Utc::now());
        let id = task.id.clone();
        store.apply(Change::UpsertTask(task)).unwrap();
        store.apply(Change::FindingsAppeared { task_id: id.clone() }).unwrap();
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.tasks.get(&id).unwrap().status, TaskStatus::Done);
        assert!(snapshot.findings.contains(&id));
        let last = snapshot.audit_tail.back().unwrap();
        assert_eq!(last.action, "findings_written");
        assert_eq!(last.subject_id, id);
    }

    #[test]
    fn verify_gate_cannot_open_without_persona_coverage() {
        let store = StateStore::new(10);
        let gate = Gate::closed(vec![GateCriterion { description: "c".into(), satisfied: true }]);
        let mut open_gate = gate.clone();
        open_gate.status = GateStatus::Open;
        open_gate.approved_by = Some("alice".into());
        let err = store
            .apply(Change::SetGate { stage: Stage::Verify, gate: open_gate })
            .unwrap_err();
        assert!(matches!(err, StoreError::GateNotApprovable { .. }));
    }

    #[test]
    fn verify_gate_opens_once_all_three_personas_done() {
        let store = StateStore::new(10);
        let now = Utc::now();
        for persona in ["reviewer", "security", "tester"] {
            let mut task = Task::new("t", Stage::Verify, "z", persona, vec![], now);
            task.status = TaskStatus::Ready;
            store.apply(Change::UpsertTask(task.clone())).unwrap();
            task.status = TaskStatus::InProgress;
            store.apply(Change::UpsertTask(task.clone())).unwrap();
            task.status = TaskStatus::Done;
            store.apply(Change::UpsertTask(task)).unwrap();
        }
        let mut open_gate = Gate::closed(vec![]);
        open_gate.status = GateStatus::Open;
        open_gate.approved_by = Some("alice".into());
        store
            .apply(Change::SetGate { stage: Stage::Verify, gate: open_gate })
            .unwrap();
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.gates.get(&Stage::Verify).unwrap().status, GateStatus::Open);
    }

    #[test]
    fn terminal_worker_rejects_further_token_updates() {
        use crate::model::{Worker, WorkerStatus};
        let store = StateStore::new(10);
        let worker = Worker {
            worker_id: "w1".into(),
            persona: "developer".into(),
            task_id: "t1".into(),
            zone: "z".into(),
            model: "m".into(),
            pid: None,
            status: WorkerStatus::Complete,
            started_at: Utc::now(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
        };
        store.apply(Change::UpsertWorker(worker)).unwrap();
        let err = store
            .apply(Change::WorkerTokens { worker_id: "w1".into(), input_tokens: 10, output_tokens: 5 })
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalWorkerMutation { .. }));
    }

    #[test]
    fn token_updates_must_be_monotonic() {
        use crate::model::{Worker, WorkerStatus};
        let store = StateStore::new(10);
        let worker = Worker {
            worker_id: "w2".into(),
            persona: "developer".into(),
            task_id: "t1".into(),
            zone: "z".into(),
            model: "m".into(),
            pid: None,
            status: WorkerStatus::Running,
            started_at: Utc::now(),
            input_tokens: 100,
            output_tokens: 50,
            cost_usd: 0.0,
        };
        store.apply(Change::UpsertWorker(worker)).unwrap();
        let err = store
            .apply(Change::WorkerTokens { worker_id: "w2".into(), input_tokens: 50, output_tokens: 50 })
            .unwrap_err();
        assert!(matches!(err, StoreError::NonMonotonicTokenUpdate { .. }));
    }
}
