use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DeviceEvent, GenericState, ModelError, TaskId};

/// Control-plane commands the executor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    TriggerHook,
    Transition,
}

impl CommandName {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "TriggerHook" => Some(CommandName::TriggerHook),
            "Transition" => Some(CommandName::Transition),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTarget {
    pub task_id: TaskId,
}

/// The routing part of any control-plane message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandHeader {
    pub name: String,
    #[serde(default)]
    pub target_list: Vec<CommandTarget>,
}

impl CommandHeader {
    pub fn decode(data: &Value) -> Result<Self, ModelError> {
        Self::deserialize(data).map_err(|e| ModelError::MalformedMessage(e.to_string()))
    }

    /// The single addressed task; any other target count is an error.
    pub fn single_target(&self) -> Result<&TaskId, ModelError> {
        match self.target_list.as_slice() {
            [only] => Ok(&only.task_id),
            other => Err(ModelError::MalformedMessage(format!(
                "cannot apply command with {}!=1 target task ids",
                other.len()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionCommand {
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub environment_id: String,
    pub source: GenericState,
    pub event: String,
    pub destination: GenericState,
    #[serde(default)]
    pub arguments: HashMap<String, String>,
    #[serde(default)]
    pub target_list: Vec<CommandTarget>,
}

impl TransitionCommand {
    pub fn decode(data: &Value) -> Result<Self, ModelError> {
        Self::deserialize(data).map_err(|e| ModelError::MalformedMessage(e.to_string()))
    }

    pub fn request(&self) -> TransitionRequest {
        TransitionRequest {
            event: self.event.clone(),
            source: self.source.clone(),
            destination: self.destination.clone(),
            arguments: self.arguments.clone(),
        }
    }

    pub fn respond(
        &self,
        error: Option<String>,
        current_state: GenericState,
        task_id: TaskId,
    ) -> TransitionResponse {
        TransitionResponse {
            name: self.name.clone(),
            id: self.id.clone(),
            error: error.unwrap_or_default(),
            current_state,
            task_id,
        }
    }
}

/// A generic lifecycle request against one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub event: String,
    pub source: GenericState,
    pub destination: GenericState,
    pub arguments: HashMap<String, String>,
}

impl TransitionRequest {
    pub fn new(event: impl Into<String>, source: GenericState, destination: GenericState) -> Self {
        Self {
            event: event.into(),
            source,
            destination,
            arguments: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub name: String,
    pub id: String,
    /// Empty on success.
    pub error: String,
    pub current_state: GenericState,
    pub task_id: TaskId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerHookCommand {
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub target_list: Vec<CommandTarget>,
}

impl TriggerHookCommand {
    pub fn decode(data: &Value) -> Result<Self, ModelError> {
        Self::deserialize(data).map_err(|e| ModelError::MalformedMessage(e.to_string()))
    }

    pub fn respond(&self, error: Option<String>, task_id: TaskId) -> TriggerHookResponse {
        TriggerHookResponse {
            name: self.name.clone(),
            id: self.id.clone(),
            error: error.unwrap_or_default(),
            task_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerHookResponse {
    pub name: String,
    pub id: String,
    pub error: String,
    pub task_id: TaskId,
}

/// Announces the pid of a controlled process once it is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPid {
    pub task_id: TaskId,
    pub pid: i32,
}

/// Everything that leaves the executor over the message channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutboundMessage {
    DeviceEvent(DeviceEvent),
    TaskPid(TaskPid),
    TransitionResponse(TransitionResponse),
    TriggerHookResponse(TriggerHookResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_requires_exactly_one_target() {
        let h = CommandHeader::decode(&json!({"name": "Transition", "targetList": []})).unwrap();
        assert!(h.single_target().is_err());

        let h = CommandHeader::decode(&json!({
            "name": "Transition",
            "targetList": [{"taskId": "a"}, {"taskId": "b"}]
        }))
        .unwrap();
        let err = h.single_target().unwrap_err();
        assert!(err.to_string().contains("2!=1"));

        let h = CommandHeader::decode(&json!({
            "name": "TriggerHook",
            "targetList": [{"taskId": "a"}]
        }))
        .unwrap();
        assert_eq!(h.single_target().unwrap().as_str(), "a");
    }

    #[test]
    fn command_names() {
        assert_eq!(CommandName::parse("Transition"), Some(CommandName::Transition));
        assert_eq!(CommandName::parse("TriggerHook"), Some(CommandName::TriggerHook));
        assert_eq!(CommandName::parse("Launch"), None);
    }

    #[test]
    fn transition_command_builds_request_and_response() {
        let cmd = TransitionCommand::decode(&json!({
            "name": "Transition",
            "id": "c-9",
            "source": "STANDBY",
            "event": "CONFIGURE",
            "destination": "CONFIGURED",
            "arguments": {"chans.data.0.address": "tcp://*:5555"},
            "targetList": [{"taskId": "t-1"}]
        }))
        .unwrap();

        let req = cmd.request();
        assert_eq!(req.event, "CONFIGURE");
        assert_eq!(req.source, GenericState::STANDBY);
        assert_eq!(req.destination, GenericState::CONFIGURED);
        assert_eq!(req.arguments.len(), 1);

        let resp = cmd.respond(None, GenericState::CONFIGURED, TaskId::from("t-1"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["name"], "Transition");
        assert_eq!(json["id"], "c-9");
        assert_eq!(json["error"], "");
        assert_eq!(json["currentState"], "CONFIGURED");
        assert_eq!(json["taskId"], "t-1");
    }

    #[test]
    fn outbound_message_is_tagged() {
        let msg = OutboundMessage::TaskPid(TaskPid {
            task_id: TaskId::from("t"),
            pid: 42,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "taskPid");
        assert_eq!(json["pid"], 42);
    }
}
