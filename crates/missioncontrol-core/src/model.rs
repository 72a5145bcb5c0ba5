//! The mission data model: stages, tasks, gates, workers, findings,
//! briefings, audit entries, and checkpoints. These types mirror the
//! on-disk JSON layout in `.mission/` byte-for-byte (field names and shapes
//! are a compatibility contract, not just an in-memory convenience).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The ten ordered stages of a mission. Advance is monotonic: a mission may
/// only ever move to the immediate successor of its current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Goal,
    Requirements,
    Planning,
    Design,
    Implement,
    Verify,
    Validate,
    Document,
    Release,
}

pub const STAGE_ORDER: [Stage; 10] = [
    Stage::Discovery,
    Stage::Goal,
    Stage::Requirements,
    Stage::Planning,
    Stage::Design,
    Stage::Implement,
    Stage::Verify,
    Stage::Validate,
    Stage::Document,
    Stage::Release,
];

impl Stage {
    pub fn index(self) -> usize {
        STAGE_ORDER.iter().position(|s| *s == self).expect("exhaustive")
    }

    /// The stage immediately after this one, or `None` at `release`.
    pub fn next(self) -> Option<Stage> {
        STAGE_ORDER.get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Goal => "goal",
            Stage::Requirements => "requirements",
            Stage::Planning => "planning",
            Stage::Design => "design",
            Stage::Implement => "implement",
            Stage::Verify => "verify",
            Stage::Validate => "validate",
            Stage::Document => "document",
            Stage::Release => "release",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a task. Transitions: `pending -> ready -> in_progress ->
/// {blocked <-> in_progress, done}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    InProgress,
    Blocked,
    Done,
}

impl TaskStatus {
    /// `true` once no further transitions are expected from external input
    /// without an explicit re-open (only `done` is terminal).
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

fn valid_task_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Pending, Ready)
            | (Ready, InProgress)
            | (InProgress, Blocked)
            | (Blocked, InProgress)
            | (InProgress, Done)
            | (Blocked, Done)
    )
}

pub fn task_status_transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    valid_task_transition(from, to)
}

/// A unit of scoped work. Identity (`id`) is a pure function of its creation
/// parts and never changes; every other field may mutate over the task's
/// lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub stage: Stage,
    pub zone: String,
    pub persona: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub scope_paths: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Reason a blocked task is blocked. Required by invariant whenever
    /// `status == Blocked`; absent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

impl Task {
    /// Build a new task, deriving its id from the parts that define its
    /// identity: name, stage, zone, and persona, in that order.
    pub fn new(
        name: impl Into<String>,
        stage: Stage,
        zone: impl Into<String>,
        persona: impl Into<String>,
        scope_paths: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        let zone = zone.into();
        let persona = persona.into();
        let id = crate::id::task_id([name.as_str(), stage.as_str(), zone.as_str(), persona.as_str()]);
        Task {
            id,
            name,
            stage,
            zone,
            persona,
            status: TaskStatus::Pending,
            depends_on: Vec::new(),
            worker_id: None,
            scope_paths,
            created_at: now,
            updated_at: now,
            blocked_reason: None,
        }
    }
}

/// Status of a stage's gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Closed,
    AwaitingApproval,
    Open,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateCriterion {
    pub description: String,
    pub satisfied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub status: GateStatus,
    pub criteria: Vec<GateCriterion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

impl Gate {
    pub fn closed(criteria: Vec<GateCriterion>) -> Self {
        Gate {
            status: GateStatus::Closed,
            criteria,
            approved_by: None,
            approved_at: None,
        }
    }

    pub fn all_criteria_satisfied(&self) -> bool {
        self.criteria.iter().all(|c| c.satisfied)
    }
}

/// Wrapper matching the on-disk `gates.json` shape, which may be bare
/// (`{<stage>: gate}`) or wrapped (`{"gates": {<stage>: gate}}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatesFile {
    pub gates: BTreeMap<String, Gate>,
}

/// Status of a worker subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Running,
    Complete,
    Error,
    Killed,
}

impl WorkerStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkerStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub persona: String,
    pub task_id: String,
    pub zone: String,
    pub model: String,
    #[serde(default)]
    pub pid: Option<u32>,
    pub status: WorkerStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

impl Worker {
    pub fn token_count(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Per-model USD rates used to derive `cost_usd` from cumulative token
/// counts. Never summed from deltas: recomputed from totals every time, so
/// rounding error cannot accumulate across many small updates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelRates {
    pub input_per_token: f64,
    pub output_per_token: f64,
}

impl ModelRates {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 * self.input_per_token + output_tokens as f64 * self.output_per_token
    }
}

/// A finding emitted by a worker at `findings/{task_id}.md`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub task_id: String,
    pub summary: String,
    #[serde(default)]
    pub changes: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Budget constraints attached to a briefing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefingBudget {
    pub max_tokens: u64,
    pub timeout_secs: u64,
    pub max_files_modified: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedOutput {
    pub findings_path: String,
    pub branch_name: String,
    #[serde(default)]
    pub tests_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefingContext {
    #[serde(default)]
    pub files_to_read: Vec<String>,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub prior_findings: Vec<String>,
}

/// Pre-spawn briefing for a worker, written at
/// `handoffs/{task_id}-briefing.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Briefing {
    pub task_id: String,
    pub objective: String,
    pub context: BriefingContext,
    pub budget: BriefingBudget,
    pub expected_output: ExpectedOutput,
}

/// One append-only record in `audit.jsonl`. Never rewritten, never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub subject_id: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// A named snapshot of mission state used to resume or branch a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub name: String,
    pub stage: Stage,
    pub task_set_fingerprint: String,
    #[serde(default)]
    pub auto: bool,
    pub created_at: DateTime<Utc>,
}
