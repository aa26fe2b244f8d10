//! Domain types shared by the sampler, evaluator and controller.

use std::fmt;
use std::time::Duration;
use std::time::SystemTime;

/// One active login, as reported by a session source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Login name of the session owner.
    pub user: String,

    /// Controlling terminal, relative to the device directory (e.g. `pts/0`).
    pub tty: String,
}

impl Session {
    /// Create a new session.
    pub fn new(user: impl Into<String>, tty: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            tty: tty.into(),
        }
    }
}

/// Idle measurement for one terminal device, valid only for the tick that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleSample {
    pub user: String,
    pub tty: String,

    /// Device timestamp used as a proxy for last input.
    pub last_activity: SystemTime,

    /// `now - last_activity`, clamped at zero.
    pub idle: Duration,
}

impl IdleSample {
    /// Build a sample for `session` against the tick's snapshot time.
    pub fn new(session: Session, last_activity: SystemTime, now: SystemTime) -> Self {
        Self {
            user: session.user,
            tty: session.tty,
            last_activity,
            idle: now.duration_since(last_activity).unwrap_or_default(),
        }
    }
}

/// Whole-machine idle verdict for a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleVerdict {
    /// Nobody has touched a terminal for at least the threshold.
    Idle,
    /// At least one session is active.
    Busy,
}

impl fmt::Display for IdleVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Busy => f.write_str("busy"),
        }
    }
}

/// Observed run state of the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// One or more live processes carry the worker's name.
    Running { pids: Vec<u32> },
    Stopped,
}

impl WorkerState {
    /// Build the state from the pids found by a process lookup.
    pub fn from_pids(pids: Vec<u32>) -> Self {
        if pids.is_empty() {
            Self::Stopped
        } else {
            Self::Running { pids }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_idle_duration() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
        let last = now - Duration::from_secs(300);
        let sample = IdleSample::new(Session::new("alice", "pts/0"), last, now);

        assert_eq!(sample.idle, Duration::from_secs(300));
        assert_eq!(sample.user, "alice");
        assert_eq!(sample.tty, "pts/0");
    }

    #[test]
    fn test_sample_future_timestamp_is_zero_idle() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
        let last = now + Duration::from_secs(5);
        let sample = IdleSample::new(Session::new("alice", "tty1"), last, now);

        assert_eq!(sample.idle, Duration::ZERO);
    }

    #[test]
    fn test_worker_state_from_pids() {
        assert_eq!(WorkerState::from_pids(vec![]), WorkerState::Stopped);
        assert!(!WorkerState::from_pids(vec![]).is_running());
        assert!(WorkerState::from_pids(vec![42]).is_running());
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(IdleVerdict::Idle.to_string(), "idle");
        assert_eq!(IdleVerdict::Busy.to_string(), "busy");
    }
}
