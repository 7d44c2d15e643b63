use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{StatusUpdate, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedInfo {
    pub agent_id: String,
    pub executor_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchInfo {
    pub task_id: TaskId,
    #[serde(default)]
    pub name: String,
    /// Opaque task descriptor payload.
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillInfo {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckInfo {
    pub task_id: TaskId,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
}

/// Events delivered by the cluster manager transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundEvent {
    Subscribed(SubscribedInfo),
    Launch(LaunchInfo),
    Kill(KillInfo),
    Acknowledged(AckInfo),
    Message(MessageInfo),
    Shutdown,
    Error(ErrorInfo),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Subscribed(_) => "SUBSCRIBED",
            InboundEvent::Launch(_) => "LAUNCH",
            InboundEvent::Kill(_) => "KILL",
            InboundEvent::Acknowledged(_) => "ACKNOWLEDGED",
            InboundEvent::Message(_) => "MESSAGE",
            InboundEvent::Shutdown => "SHUTDOWN",
            InboundEvent::Error(_) => "ERROR",
        }
    }
}

/// Frames sent back to the cluster manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundFrame {
    Update { status: StatusUpdate },
    Message { data: Value },
}
