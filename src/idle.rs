//! Machine idle evaluation.
//!
//! The machine is idle only when every sampled session has been idle for at
//! least the threshold. No sessions at all counts as idle.

use std::time::Duration;

use tracing::debug;

use crate::domain::{IdleSample, IdleVerdict};

/// Reduces a tick's samples to a single verdict.
#[derive(Debug, Clone, Copy)]
pub struct IdleEvaluator {
    threshold: Duration,
}

impl IdleEvaluator {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Evaluate the samples of one tick.
    ///
    /// A sample whose idle duration equals the threshold counts as idle.
    pub fn evaluate(&self, samples: &[IdleSample]) -> IdleVerdict {
        let mut busy = 0;
        for sample in samples.iter().filter(|s| s.idle < self.threshold) {
            debug!(
                "Active session: {}\t{}\t{}s",
                sample.user,
                sample.tty,
                sample.idle.as_secs()
            );
            busy += 1;
        }

        if busy == 0 {
            IdleVerdict::Idle
        } else {
            IdleVerdict::Busy
        }
    }
}
