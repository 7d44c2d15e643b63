use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Policy governing how a task's lifecycle is driven.
///
/// Decoding is lenient: the comparison is case-insensitive and any unknown
/// value falls back to [`ControlMode::Direct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ControlMode {
    /// RPC-controlled, device states equal generic states.
    #[default]
    Direct,
    /// RPC-controlled FairMQ device.
    Fairmq,
    /// Process presence only.
    Basic,
    /// One-shot command fired by a trigger message.
    Hook,
}

impl ControlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMode::Direct => "direct",
            ControlMode::Fairmq => "fairmq",
            ControlMode::Basic => "basic",
            ControlMode::Hook => "hook",
        }
    }
}

impl From<&str> for ControlMode {
    fn from(s: &str) -> Self {
        match s.trim().trim_matches('"').to_ascii_lowercase().as_str() {
            "fairmq" => ControlMode::Fairmq,
            "basic" => ControlMode::Basic,
            "hook" => ControlMode::Hook,
            _ => ControlMode::Direct,
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ControlMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ControlMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ControlMode::from(raw.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_is_case_insensitive() {
        let mode: ControlMode = serde_json::from_str(r#""FairMQ""#).unwrap();
        assert_eq!(mode, ControlMode::Fairmq);
        let mode: ControlMode = serde_json::from_str(r#""Hook""#).unwrap();
        assert_eq!(mode, ControlMode::Hook);
    }

    #[test]
    fn unknown_mode_falls_back_to_direct() {
        let mode: ControlMode = serde_json::from_str(r#""kubernetes""#).unwrap();
        assert_eq!(mode, ControlMode::Direct);
    }

    #[test]
    fn encodes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ControlMode::Fairmq).unwrap(),
            r#""fairmq""#
        );
    }
}
