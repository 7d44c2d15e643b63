use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TaskId;

/// Task state as reported to the cluster manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Running,
    Finished,
    Failed,
    Killed,
    Dropped,
    Gone,
    Lost,
}

impl TaskStatus {
    /// Returns `true` if the task will not report again after this status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// One status update, identified by its acknowledgement token.
///
/// Retries of the same update keep the same `uuid`, so acknowledgement is idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub state: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub uuid: Uuid,
    /// Seconds since the unix epoch.
    pub timestamp: f64,
    pub executor_id: String,
}

impl StatusUpdate {
    /// New update with a fresh acknowledgement token.
    pub fn new(
        task_id: TaskId,
        state: TaskStatus,
        message: Option<String>,
        executor_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            state,
            message: message.filter(|m| !m.is_empty()),
            uuid: Uuid::new_v4(),
            timestamp: now_secs(),
            executor_id: executor_id.into(),
        }
    }

    /// Refresh the send timestamp; the token is kept.
    pub fn touch(&mut self) {
        self.timestamp = now_secs();
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_is_not_terminal() {
        assert!(!TaskStatus::Running.is_terminal());
        for s in [
            TaskStatus::Finished,
            TaskStatus::Failed,
            TaskStatus::Killed,
            TaskStatus::Dropped,
            TaskStatus::Gone,
            TaskStatus::Lost,
        ] {
            assert!(s.is_terminal(), "{s:?}");
        }
    }

    #[test]
    fn every_update_gets_a_fresh_token() {
        let a = StatusUpdate::new(TaskId::from("t"), TaskStatus::Running, None, "ex");
        let b = StatusUpdate::new(TaskId::from("t"), TaskStatus::Running, None, "ex");
        assert_ne!(a.uuid, b.uuid);
    }

    #[test]
    fn touch_keeps_token() {
        let mut a = StatusUpdate::new(TaskId::from("t"), TaskStatus::Failed, None, "ex");
        let uuid = a.uuid;
        a.touch();
        assert_eq!(a.uuid, uuid);
    }

    #[test]
    fn empty_message_is_dropped() {
        let a = StatusUpdate::new(TaskId::from("t"), TaskStatus::Failed, Some(String::new()), "ex");
        assert!(a.message.is_none());
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["state"], "FAILED");
        assert_eq!(json["taskId"], "t");
        assert!(json.get("message").is_none());
    }
}
