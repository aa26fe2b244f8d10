//! Session sampling: pair each active session with an idle duration.
//!
//! The idle duration of a session is the age of its terminal device's timestamp
//! relative to a snapshot time shared by the whole tick.

use std::collections::HashSet;
use std::fs::Metadata;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::config::ActivityTimestamp;
use crate::domain::{IdleSample, Session};
use crate::session::{SessionError, SessionSource};

/// Samples idle durations of active sessions.
pub struct SessionSampler<S> {
    source: S,
    dev_dir: PathBuf,
    timestamp: ActivityTimestamp,
}

impl<S: SessionSource> SessionSampler<S> {
    pub fn new(source: S, dev_dir: impl Into<PathBuf>, timestamp: ActivityTimestamp) -> Self {
        Self {
            source,
            dev_dir: dev_dir.into(),
            timestamp,
        }
    }

    /// Enumerate sessions and compute their idle durations at `now`.
    ///
    /// Only the enumeration itself can fail. Devices that vanished or cannot be
    /// stat'ed are left out of the result.
    pub async fn sample(&self, now: SystemTime) -> Result<Vec<IdleSample>, SessionError> {
        let sessions = self.source.sessions().await?;
        Ok(self.measure(sessions, now))
    }

    fn measure(&self, sessions: Vec<Session>, now: SystemTime) -> Vec<IdleSample> {
        let mut seen = HashSet::new();
        let mut samples = Vec::with_capacity(sessions.len());

        for session in sessions {
            if !seen.insert(session.tty.clone()) {
                trace!("Terminal {} already sampled", session.tty);
                continue;
            }

            let device = self.dev_dir.join(&session.tty);
            match std::fs::metadata(&device).and_then(|m| self.read_timestamp(&m)) {
                Ok(last_activity) => {
                    let sample = IdleSample::new(session, last_activity, now);
                    trace!(
                        "{} on {}: idle {}s",
                        sample.user,
                        sample.tty,
                        sample.idle.as_secs()
                    );
                    samples.push(sample);
                }
                Err(e) => {
                    debug!(
                        "Skipping session {} on {}: {}",
                        session.user,
                        device.display(),
                        e
                    );
                }
            }
        }

        samples
    }

    fn read_timestamp(&self, metadata: &Metadata) -> io::Result<SystemTime> {
        match self.timestamp {
            ActivityTimestamp::Modified => metadata.modified(),
            ActivityTimestamp::Accessed => metadata.accessed(),
        }
    }
}
