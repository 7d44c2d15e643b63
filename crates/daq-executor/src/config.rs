use std::time::Duration;

use daq_core::RouterConfig;
use daq_observe::{LoggerConfig, LoggerError};

const DEFAULT_EXECUTOR_ID: &str = "daq-executor";

/// Executor settings, read from `DAQ_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub log_format: String,
    pub log_level: String,
    pub agent_id: String,
    pub executor_id: String,
    pub housekeeping_ms: u64,
    pub status_buffer: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            log_level: "info".to_string(),
            agent_id: daq_core::agent_id().to_string(),
            executor_id: DEFAULT_EXECUTOR_ID.to_string(),
            housekeeping_ms: 1000,
            status_buffer: 100,
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by every non-blank value `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("DAQ_LOG_FORMAT") {
            cfg.log_format = v;
        }
        if let Some(v) = get("DAQ_LOG_LEVEL") {
            cfg.log_level = v;
        }
        if let Some(v) = get("DAQ_AGENT_ID") {
            cfg.agent_id = v;
        }
        if let Some(v) = get("DAQ_EXECUTOR_ID") {
            cfg.executor_id = v;
        }
        if let Some(v) = get("DAQ_HOUSEKEEPING_MS") {
            cfg.housekeeping_ms = v
                .parse()
                .map_err(|e| format!("DAQ_HOUSEKEEPING_MS={v}: {e}"))?;
        }
        if let Some(v) = get("DAQ_STATUS_BUFFER") {
            cfg.status_buffer = v
                .parse()
                .map_err(|e| format!("DAQ_STATUS_BUFFER={v}: {e}"))?;
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.housekeeping_ms == 0 {
            return Err("housekeeping interval must be > 0".into());
        }
        if self.status_buffer == 0 {
            return Err("status buffer must be > 0".into());
        }
        if self.executor_id.is_empty() {
            return Err("executor id must not be empty".into());
        }
        Ok(())
    }

    pub fn logger(&self) -> Result<LoggerConfig, LoggerError> {
        LoggerConfig::parse(&self.log_format, &self.log_level)
    }

    pub fn router(&self) -> RouterConfig {
        RouterConfig {
            agent_id: self.agent_id.clone(),
            executor_id: self.executor_id.clone(),
            housekeeping: Duration::from_millis(self.housekeeping_ms),
            status_buffer: self.status_buffer,
            ..RouterConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(pairs: &[(&str, &str)]) -> Result<ExecutorConfig, String> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ExecutorConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_env() {
        let cfg = from(&[]).unwrap();
        assert_eq!(cfg.log_format, "text");
        assert_eq!(cfg.executor_id, "daq-executor");
        assert_eq!(cfg.housekeeping_ms, 1000);
        assert!(!cfg.agent_id.is_empty());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_defaults() {
        let cfg = from(&[
            ("DAQ_LOG_FORMAT", "json"),
            ("DAQ_AGENT_ID", "flp-001"),
            ("DAQ_HOUSEKEEPING_MS", "250"),
            ("DAQ_EXECUTOR_ID", "  "),
        ])
        .unwrap();
        assert_eq!(cfg.log_format, "json");
        assert_eq!(cfg.agent_id, "flp-001");
        assert_eq!(cfg.executor_id, "daq-executor");

        let router = cfg.router();
        assert_eq!(router.housekeeping, Duration::from_millis(250));
        assert_eq!(router.agent_id, "flp-001");
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = from(&[("DAQ_STATUS_BUFFER", "many")]).unwrap_err();
        assert!(err.starts_with("DAQ_STATUS_BUFFER=many"));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let cfg = ExecutorConfig {
            housekeeping_ms: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn logger_config_follows_env() {
        let cfg = from(&[("DAQ_LOG_FORMAT", "JSON"), ("DAQ_LOG_LEVEL", "debug")]).unwrap();
        let logger = cfg.logger().unwrap();
        assert_eq!(logger.level, "debug");
        assert!(from(&[("DAQ_LOG_FORMAT", "xml")]).unwrap().logger().is_err());
    }
}
