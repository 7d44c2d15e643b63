use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};

macro_rules! state_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Cow<'static, str>);

        impl $name {
            pub const fn from_static(s: &'static str) -> Self {
                Self(Cow::Borrowed(s))
            }

            pub fn new(s: impl Into<String>) -> Self {
                Self(Cow::Owned(s.into()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }
    };
}

state_newtype!(
    /// State in the framework-defined machine the cluster manager speaks.
    GenericState
);

state_newtype!(
    /// State as reported by the controlled process itself.
    ///
    /// Only a transitioner converts between this and [`GenericState`].
    DeviceState
);

impl GenericState {
    pub const STANDBY: GenericState = GenericState::from_static("STANDBY");
    pub const CONFIGURED: GenericState = GenericState::from_static("CONFIGURED");
    pub const RUNNING: GenericState = GenericState::from_static("RUNNING");
    pub const ERROR: GenericState = GenericState::from_static("ERROR");
    pub const DONE: GenericState = GenericState::from_static("DONE");
    /// A device state with no generic counterpart.
    pub const UNKNOWN: GenericState = GenericState::from_static("UNKNOWN");

    /// `true` for the states a freshly launched device must never report.
    pub fn is_startup_failure(&self) -> bool {
        *self == Self::DONE || *self == Self::ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_and_static_compare_equal() {
        assert_eq!(GenericState::new("RUNNING"), GenericState::RUNNING);
        assert_eq!(GenericState::from("DONE"), GenericState::DONE);
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&GenericState::STANDBY).unwrap();
        assert_eq!(json, r#""STANDBY""#);
        let back: DeviceState = serde_json::from_str(r#""DEVICE READY""#).unwrap();
        assert_eq!(back.as_str(), "DEVICE READY");
    }

    #[test]
    fn startup_failure_states() {
        assert!(GenericState::DONE.is_startup_failure());
        assert!(GenericState::ERROR.is_startup_failure());
        assert!(!GenericState::STANDBY.is_startup_failure());
        assert!(!GenericState::RUNNING.is_startup_failure());
    }
}
