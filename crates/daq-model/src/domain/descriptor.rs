use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ControlMode, ModelError, TaskId};

/// Where the captured output of a stream goes besides the in-memory buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputRouting {
    /// Buffer only.
    #[default]
    None,
    /// Buffer, plus debug-level log lines.
    Stdout,
    /// Buffer, plus info-level log lines.
    All,
}

/// The process a task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Program path, or the whole command line when `shell` is set.
    pub value: String,
    pub arguments: Vec<String>,
    /// `KEY=VALUE` overrides appended to the inherited environment.
    pub env: Vec<String>,
    pub shell: bool,
    /// Run-as user name; `None` keeps the executor's identity.
    pub user: Option<String>,
    pub stdout: OutputRouting,
    pub stderr: OutputRouting,
}

impl Command {
    /// Command line as a single string, for logging.
    pub fn display_line(&self) -> String {
        std::iter::once(self.value.as_str())
            .chain(self.arguments.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Environment overrides split into key/value pairs.
    ///
    /// Entries without `=` are returned in the second vector.
    pub fn env_pairs(&self) -> (Vec<(String, String)>, Vec<String>) {
        let mut pairs = Vec::with_capacity(self.env.len());
        let mut rejected = Vec::new();
        for entry in &self.env {
            match entry.split_once('=') {
                Some((k, v)) if !k.is_empty() => pairs.push((k.to_string(), v.to_string())),
                _ => rejected.push(entry.clone()),
            }
        }
        (pairs, rejected)
    }
}

/// Immutable description of a task, received once with the LAUNCH event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub name: String,
    pub command: Command,
    pub control_mode: ControlMode,
    /// Loopback control port, meaningful for DIRECT/FAIRMQ only.
    pub control_port: u16,
    pub timeout: Option<Duration>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommandInfo {
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    shell: bool,
    value: Option<String>,
    #[serde(default)]
    arguments: Vec<String>,
    user: Option<String>,
    #[serde(default)]
    control_mode: ControlMode,
    #[serde(default)]
    control_port: u16,
    timeout: Option<RawTimeout>,
    #[serde(default)]
    stdout: OutputRouting,
    #[serde(default)]
    stderr: OutputRouting,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimeout {
    Nanos(u64),
    Text(String),
}

impl TaskDescriptor {
    /// Decode the opaque payload of a placement event.
    ///
    /// The payload is either a JSON object or a JSON string holding one.
    /// A missing payload or a missing `value` is [`ModelError::MissingCommand`].
    pub fn from_payload(
        id: TaskId,
        name: impl Into<String>,
        data: Option<&Value>,
    ) -> Result<Self, ModelError> {
        let raw: RawCommandInfo = match data {
            None | Some(Value::Null) => return Err(ModelError::MissingCommand),
            Some(Value::String(s)) => serde_json::from_str(s)
                .map_err(|e| ModelError::InvalidCommand(e.to_string()))?,
            Some(v) => RawCommandInfo::deserialize(v)
                .map_err(|e| ModelError::InvalidCommand(e.to_string()))?,
        };

        let value = raw
            .value
            .filter(|v| !v.trim().is_empty())
            .ok_or(ModelError::MissingCommand)?;
        let timeout = match raw.timeout {
            Some(t) => parse_timeout(t)?,
            None => None,
        };

        Ok(Self {
            id,
            name: name.into(),
            command: Command {
                value,
                arguments: raw.arguments,
                env: raw.env,
                shell: raw.shell,
                user: raw.user.filter(|u| !u.is_empty()),
                stdout: raw.stdout,
                stderr: raw.stderr,
            },
            control_mode: raw.control_mode,
            control_port: raw.control_port,
            timeout,
        })
    }
}

fn parse_timeout(raw: RawTimeout) -> Result<Option<Duration>, ModelError> {
    let d = match raw {
        RawTimeout::Nanos(ns) => Duration::from_nanos(ns),
        RawTimeout::Text(s) => parse_duration_text(&s)?,
    };
    Ok((!d.is_zero()).then_some(d))
}

fn parse_duration_text(s: &str) -> Result<Duration, ModelError> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let invalid = || ModelError::InvalidTimeout(s.to_string());
    let n: u64 = num.parse().map_err(|_| invalid())?;
    let d = match unit.trim() {
        "ns" => Duration::from_nanos(n),
        "us" | "µs" => Duration::from_micros(n),
        "ms" => Duration::from_millis(n),
        "" | "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n.checked_mul(60).ok_or_else(invalid)?),
        "h" => Duration::from_secs(n.checked_mul(3600).ok_or_else(invalid)?),
        _ => return Err(invalid()),
    };
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(v: Value) -> Result<TaskDescriptor, ModelError> {
        TaskDescriptor::from_payload(TaskId::from("t-1"), "readout", Some(&v))
    }

    #[test]
    fn basic_descriptor_decodes() {
        let d = decode(json!({
            "value": "/bin/sleep",
            "arguments": ["5"],
            "shell": false,
            "controlMode": "basic"
        }))
        .unwrap();

        assert_eq!(d.command.value, "/bin/sleep");
        assert_eq!(d.command.arguments, vec!["5"]);
        assert!(!d.command.shell);
        assert_eq!(d.control_mode, ControlMode::Basic);
        assert_eq!(d.control_port, 0);
        assert!(d.timeout.is_none());
        assert_eq!(d.command.stdout, OutputRouting::None);
    }

    #[test]
    fn missing_payload_is_nil_command() {
        let err = TaskDescriptor::from_payload(TaskId::from("t"), "n", None).unwrap_err();
        assert_eq!(err.to_string(), "command data is nil");

        let err = decode(Value::Null).unwrap_err();
        assert_eq!(err, ModelError::MissingCommand);
    }

    #[test]
    fn missing_value_is_nil_command() {
        let err = decode(json!({"arguments": ["x"], "controlMode": "direct"})).unwrap_err();
        assert_eq!(err, ModelError::MissingCommand);
    }

    #[test]
    fn string_payload_is_decoded_as_json() {
        let payload = json!(r#"{"value":"exit 1","shell":true,"controlMode":"basic"}"#);
        let d = decode(payload).unwrap();
        assert!(d.command.shell);
        assert_eq!(d.command.value, "exit 1");
    }

    #[test]
    fn malformed_payload_is_invalid() {
        let err = decode(json!({"value": 12})).unwrap_err();
        assert!(matches!(err, ModelError::InvalidCommand(_)));
    }

    #[test]
    fn timeout_accepts_nanos_and_text() {
        let d = decode(json!({"value": "a", "timeout": 2_000_000_000u64})).unwrap();
        assert_eq!(d.timeout, Some(Duration::from_secs(2)));

        let d = decode(json!({"value": "a", "timeout": "250ms"})).unwrap();
        assert_eq!(d.timeout, Some(Duration::from_millis(250)));

        let d = decode(json!({"value": "a", "timeout": "2m"})).unwrap();
        assert_eq!(d.timeout, Some(Duration::from_secs(120)));

        let d = decode(json!({"value": "a", "timeout": 0})).unwrap();
        assert!(d.timeout.is_none());
    }

    #[test]
    fn timeout_rejects_unknown_unit() {
        let err = decode(json!({"value": "a", "timeout": "3 fortnights"})).unwrap_err();
        assert!(matches!(err, ModelError::InvalidTimeout(_)));
    }

    #[test]
    fn timeout_overflow_is_invalid() {
        for t in ["9999999999999999999h", "9999999999999999999m", "99999999999999999999s"] {
            let err = decode(json!({"value": "true", "timeout": t})).unwrap_err();
            assert_eq!(err, ModelError::InvalidTimeout(t.to_string()));
        }
    }

    #[test]
    fn env_pairs_split_on_first_equals() {
        let d = decode(json!({
            "value": "a",
            "env": ["A=1", "B=x=y", "BROKEN", "=nokey"]
        }))
        .unwrap();
        let (pairs, rejected) = d.command.env_pairs();
        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "x=y".to_string())
            ]
        );
        assert_eq!(rejected, vec!["BROKEN", "=nokey"]);
    }

    #[test]
    fn display_line_joins_arguments() {
        let d = decode(json!({"value": "/bin/echo", "arguments": ["a", "b"]})).unwrap();
        assert_eq!(d.command.display_line(), "/bin/echo a b");
    }

    #[test]
    fn empty_user_means_no_user() {
        let d = decode(json!({"value": "a", "user": ""})).unwrap();
        assert!(d.command.user.is_none());
    }
}
