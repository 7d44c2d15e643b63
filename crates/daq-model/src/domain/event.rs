use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{TaskId, TaskStatus};

/// Which agent/executor/task a device event came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEventOrigin {
    pub agent_id: String,
    pub executor_id: String,
    pub task_id: TaskId,
}

/// Payload of the event emitted when a basic or hook process ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicTaskTerminated {
    /// `-1` when the process was ended by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub voluntary_termination: bool,
    pub final_state: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceEventKind {
    EndOfStream,
    BasicTaskTerminated(BasicTaskTerminated),
    TaskInternalError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub origin: DeviceEventOrigin,
    #[serde(flatten)]
    pub kind: DeviceEventKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl DeviceEvent {
    pub fn new(origin: DeviceEventOrigin, kind: DeviceEventKind) -> Self {
        Self {
            origin,
            kind,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> DeviceEventOrigin {
        DeviceEventOrigin {
            agent_id: "agent".into(),
            executor_id: "exec".into(),
            task_id: TaskId::from("t-1"),
        }
    }

    #[test]
    fn terminated_event_flattens_payload() {
        let ev = DeviceEvent::new(
            origin(),
            DeviceEventKind::BasicTaskTerminated(BasicTaskTerminated {
                exit_code: 0,
                stdout: "hello\n".into(),
                stderr: String::new(),
                voluntary_termination: true,
                final_state: TaskStatus::Finished,
            }),
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "BASIC_TASK_TERMINATED");
        assert_eq!(json["exitCode"], 0);
        assert_eq!(json["finalState"], "FINISHED");
        assert_eq!(json["voluntaryTermination"], true);
        assert_eq!(json["origin"]["taskId"], "t-1");
        assert!(json.get("labels").is_none());
    }

    #[test]
    fn unit_event_carries_only_type() {
        let ev = DeviceEvent::new(origin(), DeviceEventKind::EndOfStream).with_label("k", "v");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "END_OF_STREAM");
        assert_eq!(json["labels"]["k"], "v");
    }
}
