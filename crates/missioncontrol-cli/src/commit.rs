//! `commit`: run the validator pipeline against the current `.mission/`
//! state and a proposed commit, then (unless `--validate-only`) stage the
//! referenced task's scope and commit with provenance trailers.
//!
//! Shells out to the `git` binary rather than linking a git library: this
//! CLI only ever needs a handful of plumbing commands.

use missioncontrol_core::model::{Stage, Task, TaskStatus};
use missioncontrol_core::validator::{CommitValidator, ProvenanceTrailers, ValidationInput};
use missioncontrol_core::watcher::parse::{parse_stage, parse_tasks_jsonl};
use missioncontrol_core::Config;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct CommitArgs {
    pub task: String,
    pub message: String,
    pub validate_only: bool,
    pub strict: bool,
    pub validate_provenance: bool,
    pub validate_scope: bool,
    pub diff_base: Option<String>,
    pub mission_dir: PathBuf,
}

/// Returns the process exit code: 0 success, 1 validation failure, 2 usage
/// error.
pub fn run(args: CommitArgs) -> anyhow::Result<i32> {
    let config = Config::load(&args.mission_dir)?;

    let tasks = load_tasks(&args.mission_dir)?;
    let stage = load_stage(&args.mission_dir)?;

    let Some(task) = tasks.iter().find(|t| t.id == args.task) else {
        eprintln!("no task with id {} in {}", args.task, args.mission_dir.join("state/tasks.jsonl").display());
        return Ok(2);
    };

    let diff_paths = if args.validate_scope {
        let diff_base = args.diff_base.as_deref().expect("checked by caller");
        run_git(&["diff", "--name-only", diff_base])?
            .lines()
            .map(str::to_string)
            .collect()
    } else {
        Vec::new()
    };

    let provenance = if args.validate_provenance {
        ProvenanceTrailers::parse(&args.message)
    } else {
        build_trailers(task, &stage)
    };

    let finding_sizes = load_finding_sizes(&args.mission_dir, &tasks);

    let input = ValidationInput {
        stage,
        tasks: tasks.clone(),
        diff_paths,
        provenance,
        finding_sizes,
        scope_exemptions: config.scope_exemptions.clone(),
        strict: args.strict,
    };

    let failures = CommitValidator::run(&input);
    for failure in &failures {
        println!("{}", failure);
    }

    if !CommitValidator::passes(&failures, args.strict) {
        return Ok(1);
    }

    if args.validate_only {
        return Ok(0);
    }

    stage_and_commit(task, &stage, &args.message)?;
    Ok(0)
}

fn load_tasks(mission_dir: &Path) -> anyhow::Result<Vec<Task>> {
    let path = mission_dir.join("state").join("tasks.jsonl");
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(parse_tasks_jsonl(&raw)?)
}

fn load_stage(mission_dir: &Path) -> anyhow::Result<Option<Stage>> {
    let path = mission_dir.join("state").join("stage.json");
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(parse_stage(&raw)?))
}

fn load_finding_sizes(mission_dir: &Path, tasks: &[Task]) -> HashMap<String, u64> {
    let mut sizes = HashMap::new();
    for task in tasks.iter().filter(|t| t.status == TaskStatus::Done) {
        let path = mission_dir.join("findings").join(format!("{}.md", task.id));
        if let Ok(metadata) = std::fs::metadata(&path) {
            sizes.insert(task.id.clone(), metadata.len());
        }
    }
    sizes
}

/// Build the trailer set this commit *would* carry from the task it
/// references, for a non-`--validate-provenance` run where the caller
/// hasn't composed trailers by hand yet.
fn build_trailers(task: &Task, stage: &Option<Stage>) -> Option<ProvenanceTrailers> {
    stage.map(|stage| ProvenanceTrailers {
        task: Some(task.id.clone()),
        persona: Some(task.persona.clone()),
        session: task.worker_id.clone(),
        agent: task.worker_id.clone(),
        stage: Some(stage.as_str().to_string()),
        scope: Some(task.scope_paths.join(",")),
    })
}

fn stage_and_commit(task: &Task, stage: &Option<Stage>, message: &str) -> anyhow::Result<()> {
    for path in &task.scope_paths {
        run_git(&["add", path])?;
    }

    let stage_str = stage.map(|s| s.as_str().to_string()).unwrap_or_default();
    let full_message = format!(
        "{}\n\nMC-Task: {}\nMC-Persona: {}\nMC-Session: {}\nMC-Agent: {}\nMC-Stage: {}\nMC-Scope: {}\n",
        message,
        task.id,
        task.persona,
        task.worker_id.as_deref().unwrap_or(""),
        task.worker_id.as_deref().unwrap_or(""),
        stage_str,
        task.scope_paths.join(","),
    );
    run_git(&["commit", "-m", &full_message])?;
    Ok(())
}

fn run_git(args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new("git").args(args).output()?;
    if !output.status.success() {
        anyhow::bail!("git {} failed: {}", args.join(" "), String::from_utf8_lossy(&output.stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
