use std::time::Duration;

/// Timing of the task control path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on connecting to a task's control port.
    pub dial: Duration,
    /// Total readiness polling budget after launch.
    pub readiness: Duration,
    /// Interval between readiness polls.
    pub poll: Duration,
    /// Bound on each step of the controllable kill walk.
    pub kill_step: Duration,
    /// Pause after the kill walk reached DONE, before signaling.
    pub done_linger: Duration,
    /// Upper bound on how long a kill waits for a running hook.
    pub hook_grace_cap: Duration,
    /// Delay before a basic or hook task reports RUNNING.
    pub running_delay: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dial: Duration::from_secs(20),
            readiness: Duration::from_secs(30),
            poll: Duration::from_millis(500),
            kill_step: Duration::from_secs(5),
            done_linger: Duration::from_secs(1),
            hook_grace_cap: Duration::from_secs(10),
            running_delay: Duration::from_millis(200),
        }
    }
}

impl Timeouts {
    /// Hook grace window: the task timeout, capped.
    pub fn hook_grace(&self, task_timeout: Option<Duration>) -> Duration {
        task_timeout.map_or(self.hook_grace_cap, |t| t.min(self.hook_grace_cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_grace_is_capped() {
        let t = Timeouts::default();
        assert_eq!(t.hook_grace(None), Duration::from_secs(10));
        assert_eq!(t.hook_grace(Some(Duration::from_secs(3))), Duration::from_secs(3));
        assert_eq!(t.hook_grace(Some(Duration::from_secs(60))), Duration::from_secs(10));
    }
}
