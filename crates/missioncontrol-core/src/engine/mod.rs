//! Stage/gate engine: pure functions over a [`StateSnapshot`]. No I/O, no
//! interior mutability — gate status and advance eligibility are computed
//! fresh from state on every call rather than incrementally maintained.

use crate::model::{GateStatus, Stage, TaskStatus};
use crate::state::StateSnapshot;

const VERIFY_REQUIRED_PERSONAS: [&str; 3] = ["reviewer", "security", "tester"];

/// Whether `stage`'s gate is closed, awaiting approval, or open, given the
/// current snapshot. `open` is sticky once approved: this function reports
/// what *would* be approvable, but the store only flips a gate to `open`
/// when approval is actually recorded (see [`gate_blockers`]).
pub fn gate_status(state: &StateSnapshot, stage: Stage) -> GateStatus {
    let Some(gate) = state.gates.get(&stage) else {
        return GateStatus::Closed;
    };
    if gate.status == GateStatus::Open {
        // Approval already recorded; stays open even if new criteria are
        // added later (invariant 3 only binds at the moment of approval).
        return GateStatus::Open;
    }
    if gate_blockers(state, stage).is_empty() {
        GateStatus::AwaitingApproval
    } else {
        GateStatus::Closed
    }
}

/// Human-readable reasons `stage`'s gate is not yet approvable.
pub fn gate_blockers(state: &StateSnapshot, stage: Stage) -> Vec<String> {
    let mut blockers = Vec::new();

    if let Some(gate) = state.gates.get(&stage) {
        for criterion in &gate.criteria {
            if !criterion.satisfied {
                blockers.push(format!("unsatisfied criterion: {}", criterion.description));
            }
        }
    }

    if stage == Stage::Verify {
        for persona in VERIFY_REQUIRED_PERSONAS {
            let has_done = state
                .tasks
                .values()
                .any(|t| t.persona == persona && t.status == TaskStatus::Done);
            if !has_done {
                blockers.push(format!("missing done task with persona '{}'", persona));
            }
        }
    }

    if stage == Stage::Implement {
        let implement_tasks: Vec<_> = state.tasks.values().filter(|t| t.stage == Stage::Implement).collect();
        if implement_tasks.len() > 1 {
            let has_integrator = implement_tasks.iter().any(|t| t.persona == "integrator" && t.status == TaskStatus::Done);
            if !has_integrator {
                blockers.push("missing done task with persona 'integrator'".to_string());
            }
        }
    }

    blockers
}

/// Whether the mission may advance from `from` to `to`: `to` must be the
/// immediate successor of `from`, and `from`'s gate must already be open.
pub fn can_advance(state: &StateSnapshot, from: Stage, to: Stage) -> bool {
    from.next() == Some(to) && gate_status(state, from) == GateStatus::Open
}

/// The stage immediately after `current`, if any.
pub fn next_stage(current: Stage) -> Option<Stage> {
    current.next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Gate, GateCriterion, Task};
    use chrono::Utc;

    fn snapshot_with_gate(stage: Stage, criteria_satisfied: bool) -> StateSnapshot {
        let mut state = StateSnapshot::default();
        state.gates.insert(
            stage,
            Gate::closed(vec![GateCriterion {
                description: "tests pass".into(),
                satisfied: criteria_satisfied,
            }]),
        );
        state
    }

    #[test]
    fn verify_gate_blocked_without_all_three_personas() {
        let mut state = snapshot_with_gate(Stage::Verify, true);
        let now = Utc::now();
        for persona in ["reviewer", "security"] {
            let mut task = Task::new("t", Stage::Verify, "z", persona, vec![], now);
            task.status = TaskStatus::Done;
            state.tasks.insert(task.id.clone(), task);
        }
        let blockers = gate_blockers(&state, Stage::Verify);
        assert!(blockers.iter().any(|b| b.contains("tester")));
        assert!(!blockers.iter().any(|b| b.contains("reviewer")));
    }

    #[test]
    fn verify_gate_open_with_all_three_personas() {
        let mut state = snapshot_with_gate(Stage::Verify, true);
        let now = Utc::now();
        for persona in VERIFY_REQUIRED_PERSONAS {
            let mut task = Task::new("t", Stage::Verify, "z", persona, vec![], now);
            task.status = TaskStatus::Done;
            state.tasks.insert(task.id.clone(), task);
        }
        assert!(gate_blockers(&state, Stage::Verify).is_empty());
        assert_eq!(gate_status(&state, Stage::Verify), GateStatus::AwaitingApproval);
    }

    #[test]
    fn can_advance_requires_open_gate_and_adjacency() {
        let mut state = snapshot_with_gate(Stage::Discovery, true);
        assert!(!can_advance(&state, Stage::Discovery, Stage::Goal));
        state.gates.get_mut(&Stage::Discovery).unwrap().status = GateStatus::Open;
        assert!(can_advance(&state, Stage::Discovery, Stage::Goal));
        assert!(!can_advance(&state, Stage::Discovery, Stage::Requirements));
    }

    #[test]
    fn next_stage_is_none_at_release() {
        assert_eq!(next_stage(Stage::Release), None);
        assert_eq!(next_stage(Stage::Discovery), Some(Stage::Goal));
    }
}
