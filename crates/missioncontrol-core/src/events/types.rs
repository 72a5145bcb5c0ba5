//! Event and topic types carried by the event hub.

use crate::state::{ChangeEvent, StateSnapshot};
use serde::Serialize;

/// Short strings the hub uses to filter events for subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Stage,
    Task,
    Gate,
    Worker,
    Checkpoint,
    Findings,
    Audit,
    /// Only ever used for the synthetic `sync.initial_state` frame.
    Sync,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Stage => "stage",
            Topic::Task => "task",
            Topic::Gate => "gate",
            Topic::Worker => "worker",
            Topic::Checkpoint => "checkpoint",
            Topic::Findings => "findings",
            Topic::Audit => "audit",
            Topic::Sync => "sync",
        }
    }
}

/// A single frame delivered to subscribers: `(topic, type, data)`.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub topic: Topic,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: serde_json::Value,
}

impl Event {
    pub fn initial_state(snapshot: &StateSnapshot) -> Event {
        Event {
            topic: Topic::Sync,
            kind: "initial_state",
            data: serde_json::json!({
                "stage": snapshot.stage,
                "gates": snapshot.gates,
                "tasks": snapshot.tasks,
                "workers": snapshot.workers,
                "findings": snapshot.findings,
                "checkpoints": snapshot.checkpoints,
            }),
        }
    }

    /// Map an internal [`ChangeEvent`] to the topic-scoped wire shape.
    pub fn from_change(change: &ChangeEvent) -> Event {
        match change {
            ChangeEvent::StageAdvanced { from, to } => Event {
                topic: Topic::Stage,
                kind: "advanced",
                data: serde_json::json!({ "from": from, "to": to }),
            },
            ChangeEvent::TaskCreated { id } => Event {
                topic: Topic::Task,
                kind: "created",
                data: serde_json::json!({ "id": id }),
            },
            ChangeEvent::TaskUpdated { id } => Event {
                topic: Topic::Task,
                kind: "updated",
                data: serde_json::json!({ "id": id }),
            },
            ChangeEvent::GateStatusChanged { stage, status } => Event {
                topic: Topic::Gate,
                kind: "status_changed",
                data: serde_json::json!({ "stage": stage, "status": status }),
            },
            ChangeEvent::WorkerAppeared { id } => Event {
                topic: Topic::Worker,
                kind: "spawned",
                data: serde_json::json!({ "id": id }),
            },
            ChangeEvent::WorkerStatusChanged { id, status } => Event {
                topic: Topic::Worker,
                kind: "status_changed",
                data: serde_json::json!({ "id": id, "status": status }),
            },
            ChangeEvent::WorkerTokensUpdated { id } => Event {
                topic: Topic::Worker,
                kind: "tokens_updated",
                data: serde_json::json!({ "id": id }),
            },
            ChangeEvent::FindingsReady { task_id } => Event {
                topic: Topic::Findings,
                kind: "ready",
                data: serde_json::json!({ "task_id": task_id }),
            },
            ChangeEvent::AuditAppended { subject_id } => Event {
                topic: Topic::Audit,
                kind: "appended",
                data: serde_json::json!({ "subject_id": subject_id }),
            },
            ChangeEvent::CheckpointAdded { id } => Event {
                topic: Topic::Checkpoint,
                kind: "added",
                data: serde_json::json!({ "id": id }),
            },
        }
    }
}

/// Topic filter a subscriber registers at subscribe time. Empty = all
/// topics.
#[derive(Debug, Clone, Default)]
pub struct TopicFilter(pub Vec<Topic>);

impl TopicFilter {
    pub fn all() -> Self {
        TopicFilter(Vec::new())
    }

    pub fn matches(&self, topic: Topic) -> bool {
        self.0.is_empty() || self.0.contains(&topic)
    }
}
