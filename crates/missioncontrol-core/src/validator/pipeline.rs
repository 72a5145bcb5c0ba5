//! The validation pipeline itself.
//!
//! A named list of checks, each producing a result. The pipeline always
//! runs every check and returns the full failure set rather than stopping
//! at the first one, with the single exception of a missing stage, where
//! nothing else is meaningful to check.

use crate::model::{Stage, Task, TaskStatus, STAGE_ORDER};
use std::collections::HashMap;

pub const MIN_FINDINGS_BYTES: u64 = 200;
const VERIFY_REQUIRED_PERSONAS: [&str; 3] = ["reviewer", "security", "tester"];
const REQUIRED_TRAILERS: [&str; 6] = ["MC-Task", "MC-Persona", "MC-Session", "MC-Agent", "MC-Stage", "MC-Scope"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    MissionNotInitialized,
    StageMissingTasks { stage: Stage },
    IncompleteFindings { task_id: String, bytes: u64 },
    MissingFindingsFile { task_id: String },
    MissingPersonaCoverage { persona: &'static str },
    MissingIntegrator,
    OutOfScope { path: String },
    MissingProvenanceTrailer { field: &'static str },
    ProvenanceTaskNotDone { task_id: String },
    ProvenancePersonaMismatch { expected: String, actual: String },
}

impl ValidationFailure {
    pub fn severity(&self) -> Severity {
        match self {
            ValidationFailure::MissionNotInitialized => Severity::Error,
            ValidationFailure::StageMissingTasks { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationFailure::MissionNotInitialized => write!(f, "mission is not initialized (no current stage)"),
            ValidationFailure::StageMissingTasks { stage } => write!(f, "stage '{}' has no tasks", stage),
            ValidationFailure::IncompleteFindings { task_id, bytes } => {
                write!(f, "task {} findings file is only {} bytes (minimum {})", task_id, bytes, MIN_FINDINGS_BYTES)
            }
            ValidationFailure::MissingFindingsFile { task_id } => write!(f, "done task {} has no findings file", task_id),
            ValidationFailure::MissingPersonaCoverage { persona } => {
                write!(f, "missing done task with persona '{}'", persona)
            }
            ValidationFailure::MissingIntegrator => write!(f, "implement stage has multiple tasks but no done integrator"),
            ValidationFailure::OutOfScope { path } => write!(f, "{} is out of scope for all done tasks", path),
            ValidationFailure::MissingProvenanceTrailer { field } => write!(f, "missing provenance trailer {}", field),
            ValidationFailure::ProvenanceTaskNotDone { task_id } => {
                write!(f, "provenance references task {} which is not done", task_id)
            }
            ValidationFailure::ProvenancePersonaMismatch { expected, actual } => {
                write!(f, "provenance persona '{}' does not match referenced task's persona '{}'", expected, actual)
            }
        }
    }
}

/// Parsed `MC-*` commit trailers.
#[derive(Debug, Clone)]
pub struct ProvenanceTrailers {
    pub task: Option<String>,
    pub persona: Option<String>,
    pub session: Option<String>,
    pub agent: Option<String>,
    pub stage: Option<String>,
    pub scope: Option<String>,
}

impl ProvenanceTrailers {
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "MC-Task" => self.task.as_deref(),
            "MC-Persona" => self.persona.as_deref(),
            "MC-Session" => self.session.as_deref(),
            "MC-Agent" => self.agent.as_deref(),
            "MC-Stage" => self.stage.as_deref(),
            "MC-Scope" => self.scope.as_deref(),
            _ => None,
        }
    }

    /// Parse trailers out of a commit message's trailing `Key: value` lines.
    pub fn parse(message: &str) -> Option<ProvenanceTrailers> {
        let mut fields: HashMap<&str, String> = HashMap::new();
        for line in message.lines() {
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                if REQUIRED_TRAILERS.contains(&key) {
                    fields.insert(key, value.trim().to_string());
                }
            }
        }
        if fields.is_empty() {
            return None;
        }
        Some(ProvenanceTrailers {
            task: fields.get("MC-Task").cloned(),
            persona: fields.get("MC-Persona").cloned(),
            session: fields.get("MC-Session").cloned(),
            agent: fields.get("MC-Agent").cloned(),
            stage: fields.get("MC-Stage").cloned(),
            scope: fields.get("MC-Scope").cloned(),
        })
    }
}

/// Inputs to one validator run. `finding_sizes` maps task id to the byte
/// length of its findings file (the caller stats the filesystem; the
/// pipeline itself performs no I/O).
#[derive(Debug, Clone)]
pub struct ValidationInput {
    pub stage: Option<Stage>,
    pub tasks: Vec<Task>,
    pub diff_paths: Vec<String>,
    pub provenance: Option<ProvenanceTrailers>,
    pub finding_sizes: HashMap<String, u64>,
    pub scope_exemptions: Vec<String>,
    pub strict: bool,
}

pub struct CommitValidator;

impl CommitValidator {
    /// Run every check unconditionally and return the full set of
    /// failures. An empty `Vec` means pass.
    pub fn run(input: &ValidationInput) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();

        let Some(stage) = input.stage else {
            failures.push(ValidationFailure::MissionNotInitialized);
            return failures; // nothing else is meaningful without a stage
        };

        Self::check_stage_has_tasks(input, stage, &mut failures);
        Self::check_completeness(input, &mut failures);
        Self::check_persona_coverage(input, stage, &mut failures);
        Self::check_integrator_rule(input, stage, &mut failures);
        Self::check_scope(input, &mut failures);
        Self::check_provenance(input, &mut failures);

        failures
    }

    /// Whether the run passes, honoring `strict` (warnings count as
    /// failures in strict mode; there is no force flag in the strict path).
    pub fn passes(failures: &[ValidationFailure], strict: bool) -> bool {
        !failures
            .iter()
            .any(|f| f.severity() == Severity::Error || (strict && f.severity() == Severity::Warning))
    }

    fn check_stage_has_tasks(input: &ValidationInput, current: Stage, out: &mut Vec<ValidationFailure>) {
        for stage in STAGE_ORDER.iter().take_while(|s| **s <= current) {
            let has_task = input.tasks.iter().any(|t| t.stage == *stage);
            if !has_task {
                out.push(ValidationFailure::StageMissingTasks { stage: *stage });
            }
        }
    }

    fn check_completeness(input: &ValidationInput, out: &mut Vec<ValidationFailure>) {
        for task in input.tasks.iter().filter(|t| t.status == TaskStatus::Done) {
            match input.finding_sizes.get(&task.id) {
                None => out.push(ValidationFailure::MissingFindingsFile { task_id: task.id.clone() }),
                Some(bytes) if *bytes < MIN_FINDINGS_BYTES => {
                    out.push(ValidationFailure::IncompleteFindings { task_id: task.id.clone(), bytes: *bytes })
                }
                Some(_) => {}
            }
        }
    }

    fn check_persona_coverage(input: &ValidationInput, stage: Stage, out: &mut Vec<ValidationFailure>) {
        if stage != Stage::Verify {
            return;
        }
        for persona in VERIFY_REQUIRED_PERSONAS {
            let has_done = input.tasks.iter().any(|t| t.persona == persona && t.status == TaskStatus::Done);
            if !has_done {
                out.push(ValidationFailure::MissingPersonaCoverage { persona });
            }
        }
    }

    fn check_integrator_rule(input: &ValidationInput, stage: Stage, out: &mut Vec<ValidationFailure>) {
        if stage != Stage::Implement {
            return;
        }
        let implement_tasks: Vec<_> = input.tasks.iter().filter(|t| t.stage == Stage::Implement).collect();
        if implement_tasks.len() > 1 {
            let has_integrator = implement_tasks.iter().any(|t| t.persona == "integrator" && t.status == TaskStatus::Done);
            if !has_integrator {
                out.push(ValidationFailure::MissingIntegrator);
            }
        }
    }

    fn check_scope(input: &ValidationInput, out: &mut Vec<ValidationFailure>) {
        let done_scopes: Vec<&str> = input
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .flat_map(|t| t.scope_paths.iter().map(|s| s.as_str()))
            .collect();

        for path in &input.diff_paths {
            let covered = done_scopes.iter().any(|scope| path_covered_by(path, scope))
                || input.scope_exemptions.iter().any(|ex| path_covered_by(path, ex));
            if !covered {
                out.push(ValidationFailure::OutOfScope { path: path.clone() });
            }
        }
    }

    fn check_provenance(input: &ValidationInput, out: &mut Vec<ValidationFailure>) {
        if input.diff_paths.iter().all(|p| is_exempt(p, &input.scope_exemptions)) {
            return; // nothing non-exempt was touched; no trailers required
        }

        let Some(provenance) = &input.provenance else {
            for field in REQUIRED_TRAILERS {
                out.push(ValidationFailure::MissingProvenanceTrailer { field });
            }
            return;
        };

        for field in REQUIRED_TRAILERS {
            if provenance.field(field).is_none() {
                out.push(ValidationFailure::MissingProvenanceTrailer { field });
            }
        }

        if let Some(task_id) = &provenance.task {
            match input.tasks.iter().find(|t| &t.id == task_id) {
                Some(task) if task.status == TaskStatus::Done => {
                    if let Some(persona) = &provenance.persona {
                        if persona != &task.persona {
                            out.push(ValidationFailure::ProvenancePersonaMismatch {
                                expected: task.persona.clone(),
                                actual: persona.clone(),
                            });
                        }
                    }
                }
                _ => out.push(ValidationFailure::ProvenanceTaskNotDone { task_id: task_id.clone() }),
            }
        }
    }
}

fn is_exempt(path: &str, exemptions: &[String]) -> bool {
    exemptions.iter().any(|ex| path_covered_by(path, ex))
}

/// A scope entry covers `path` if it names the path exactly or is a
/// directory prefix of it.
fn path_covered_by(path: &str, scope: &str) -> bool {
    if scope.ends_with('/') {
        path.starts_with(scope)
    } else {
        path == scope || path.starts_with(&format!("{}/", scope))
    }
}
