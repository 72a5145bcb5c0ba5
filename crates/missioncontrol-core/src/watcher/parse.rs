//! Pure parsing for each file kind under `.mission/`. No I/O: callers read
//! the file and hand these functions the bytes.

use crate::model::{Checkpoint, Gate, GatesFile, Stage, Task};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct StageFile {
    pub current: Stage,
    #[allow(dead_code)]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub fn parse_stage(raw: &str) -> Result<Stage, serde_json::Error> {
    let parsed: StageFile = serde_json::from_str(raw)?;
    Ok(parsed.current)
}

/// `gates.json` may be wrapped (`{"gates": {...}}`) or bare
/// (`{<stage>: gate}`); accept both.
pub fn parse_gates(raw: &str) -> Result<BTreeMap<Stage, Gate>, serde_json::Error> {
    if let Ok(wrapped) = serde_json::from_str::<GatesFile>(raw) {
        return stringly_to_stage_map(wrapped.gates);
    }
    let bare: BTreeMap<String, Gate> = serde_json::from_str(raw)?;
    stringly_to_stage_map(bare)
}

fn stringly_to_stage_map(map: BTreeMap<String, Gate>) -> Result<BTreeMap<Stage, Gate>, serde_json::Error> {
    let mut out = BTreeMap::new();
    for (k, v) in map {
        let stage: Stage = serde_json::from_value(serde_json::Value::String(k))?;
        out.insert(stage, v);
    }
    Ok(out)
}

/// Parse every line of `tasks.jsonl`, skipping blank lines. One malformed
/// line fails the whole re-scan (the caller emits a single parse-error
/// event and leaves the store untouched — a parse failure never mutates
/// the store).
pub fn parse_tasks_jsonl(raw: &str) -> Result<Vec<Task>, serde_json::Error> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

pub fn parse_checkpoint(raw: &str) -> Result<Checkpoint, serde_json::Error> {
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_gates_file() {
        let raw = r#"{"discovery": {"status": "closed", "criteria": []}}"#;
        let gates = parse_gates(raw).unwrap();
        assert!(gates.contains_key(&Stage::Discovery));
    }

    #[test]
    fn parses_wrapped_gates_file() {
        let raw = r#"{"gates": {"goal": {"status": "open", "criteria": []}}}"#;
        let gates = parse_gates(raw).unwrap();
        assert!(gates.contains_key(&Stage::Goal));
    }

    #[test]
    fn tasks_jsonl_skips_blank_lines() {
        let raw = "\n\n";
        let tasks = parse_tasks_jsonl(raw).unwrap();
        assert!(tasks.is_empty());
    }
}
