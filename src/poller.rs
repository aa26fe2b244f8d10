//! Tick driver.
//!
//! Runs sampler, evaluator and controller once per interval. Ticks never
//! overlap and share nothing: every tick re-samples sessions and re-observes
//! the worker.

use std::future::Future;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::controller::{DaemonController, Outcome};
use crate::domain::{IdleSample, IdleVerdict};
use crate::idle::IdleEvaluator;
use crate::sampler::SessionSampler;
use crate::session::{SessionError, SessionSource};
use crate::worker::{ControlError, ProcessControl};

/// Anything that can go wrong inside a single tick.
#[derive(Error, Debug)]
pub enum TickError {
    #[error("Session sampling failed: {0}")]
    Sample(#[from] SessionError),

    #[error("Worker control failed: {0}")]
    Control(#[from] ControlError),
}

/// What one tick saw and did.
#[derive(Debug)]
pub struct TickReport {
    pub samples: Vec<IdleSample>,
    pub verdict: IdleVerdict,
    pub outcome: Outcome,
}

/// Drives ticks on a fixed cadence.
pub struct Poller<S, P> {
    sampler: SessionSampler<S>,
    evaluator: IdleEvaluator,
    controller: DaemonController<P>,
    interval: Duration,
    print_samples: bool,
}

impl<S: SessionSource, P: ProcessControl> Poller<S, P> {
    pub fn new(
        sampler: SessionSampler<S>,
        evaluator: IdleEvaluator,
        controller: DaemonController<P>,
        interval: Duration,
    ) -> Self {
        Self {
            sampler,
            evaluator,
            controller,
            interval,
            print_samples: false,
        }
    }

    /// Print every tick's samples and verdict to stdout.
    #[must_use]
    pub fn with_print_samples(mut self, print_samples: bool) -> Self {
        self.print_samples = print_samples;
        self
    }

    /// Run one tick against the current time.
    pub async fn tick(&mut self) -> Result<TickReport, TickError> {
        self.tick_at(SystemTime::now()).await
    }

    /// Run one tick with `now` as the snapshot time for every sample.
    ///
    /// If sessions cannot be enumerated the tick takes no action.
    pub async fn tick_at(&mut self, now: SystemTime) -> Result<TickReport, TickError> {
        let samples = self.sampler.sample(now).await?;
        let verdict = self.evaluator.evaluate(&samples);
        debug!("{} session(s) sampled, machine {}", samples.len(), verdict);

        if self.print_samples {
            print_report(&samples, verdict, self.evaluator.threshold());
        }

        let outcome = self.controller.apply(verdict)?;
        Ok(TickReport {
            samples,
            verdict,
            outcome,
        })
    }

    /// Tick forever until `shutdown` resolves.
    ///
    /// A failed tick is logged and the next one runs on schedule.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "Poller started, checking every {:?} (idle threshold {:?})",
            self.interval,
            self.evaluator.threshold()
        );

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, leaving worker as-is");
                    break;
                }
                _ = timer.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("Tick failed: {}", e);
                    }
                }
            }
        }
    }
}

fn print_report(samples: &[IdleSample], verdict: IdleVerdict, threshold: Duration) {
    for sample in samples {
        let marker = if sample.idle < threshold { "active" } else { "idle" };
        println!(
            "[SESSION] | user={} tty={} idle={}s {}",
            sample.user,
            sample.tty,
            sample.idle.as_secs(),
            marker
        );
    }
    println!("[VERDICT] | {verdict}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActivityTimestamp;
    use crate::controller::tests::{FakeProcesses, test_spec};
    use crate::domain::{Session, WorkerState};
    use async_trait::async_trait;
    use std::fs::{File, FileTimes};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Session list a test can swap between ticks.
    #[derive(Clone, Default)]
    struct ScriptedSessions {
        sessions: Arc<Mutex<Option<Vec<Session>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedSessions {
        fn set(&self, sessions: Option<Vec<Session>>) {
            *self.sessions.lock().unwrap() = sessions;
        }
    }

    #[async_trait]
    impl SessionSource for ScriptedSessions {
        async fn sessions(&self) -> Result<Vec<Session>, SessionError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.sessions
                .lock()
                .unwrap()
                .clone()
                .ok_or(SessionError::CommandFailed(Some(1)))
        }
    }

    fn epoch(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn touch(dev: &Path, tty: &str, modified: SystemTime) {
        let path = dev.join(tty);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        file.set_times(FileTimes::new().set_modified(modified)).unwrap();
    }

    fn poller(
        dev: &Path,
        sessions: ScriptedSessions,
        fake: FakeProcesses,
    ) -> Poller<ScriptedSessions, FakeProcesses> {
        Poller::new(
            SessionSampler::new(sessions, dev, ActivityTimestamp::Modified),
            IdleEvaluator::new(Duration::from_secs(600)),
            DaemonController::new(fake, test_spec(), false),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_recent_session_keeps_worker_stopped() {
        let dev = tempfile::tempdir().unwrap();
        touch(dev.path(), "pts/0", epoch(9_700));
        let sessions = ScriptedSessions::default();
        sessions.set(Some(vec![Session::new("alice", "pts/0")]));
        let fake = FakeProcesses::default();
        let mut poller = poller(dev.path(), sessions, fake.clone());

        let report = poller.tick_at(epoch(10_000)).await.unwrap();
        assert_eq!(report.verdict, IdleVerdict::Busy);
        assert_eq!(report.outcome, Outcome::Unchanged(WorkerState::Stopped));
        assert_eq!(fake.starts(), 0);
    }

    #[tokio::test]
    async fn test_nobody_logged_in_starts_worker() {
        let dev = tempfile::tempdir().unwrap();
        let sessions = ScriptedSessions::default();
        sessions.set(Some(vec![]));
        let fake = FakeProcesses::default();
        let mut poller = poller(dev.path(), sessions, fake.clone());

        let report = poller.tick_at(epoch(10_000)).await.unwrap();
        assert_eq!(report.verdict, IdleVerdict::Idle);
        assert!(matches!(report.outcome, Outcome::Started { .. }));
        assert_eq!(fake.running().len(), 1);
    }

    #[tokio::test]
    async fn test_exact_threshold_counts_as_idle() {
        let dev = tempfile::tempdir().unwrap();
        touch(dev.path(), "pts/0", epoch(9_400));
        let sessions = ScriptedSessions::default();
        sessions.set(Some(vec![Session::new("alice", "pts/0")]));
        let mut poller = poller(dev.path(), sessions, FakeProcesses::default());

        let report = poller.tick_at(epoch(10_000)).await.unwrap();
        assert_eq!(report.samples[0].idle, Duration::from_secs(600));
        assert_eq!(report.verdict, IdleVerdict::Idle);
    }

    #[tokio::test]
    async fn test_verdict_flips_act_in_the_same_tick() {
        let dev = tempfile::tempdir().unwrap();
        touch(dev.path(), "pts/0", epoch(1_000));
        let sessions = ScriptedSessions::default();
        sessions.set(Some(vec![Session::new("alice", "pts/0")]));
        let fake = FakeProcesses::default();
        let mut poller = poller(dev.path(), sessions, fake.clone());

        // idle: start
        let report = poller.tick_at(epoch(10_000)).await.unwrap();
        assert!(matches!(report.outcome, Outcome::Started { .. }));

        // still idle: no second instance
        let report = poller.tick_at(epoch(10_060)).await.unwrap();
        assert!(matches!(report.outcome, Outcome::Unchanged(_)));
        assert_eq!(fake.starts(), 1);

        // alice types: stop
        touch(dev.path(), "pts/0", epoch(10_100));
        let report = poller.tick_at(epoch(10_120)).await.unwrap();
        assert_eq!(report.verdict, IdleVerdict::Busy);
        assert_eq!(report.outcome, Outcome::Stopped { signaled: 1 });
        assert!(fake.running().is_empty());

        // idle again: start
        let report = poller.tick_at(epoch(10_800)).await.unwrap();
        assert_eq!(report.verdict, IdleVerdict::Idle);
        assert!(matches!(report.outcome, Outcome::Started { .. }));
        assert_eq!(fake.starts(), 2);
    }

    #[tokio::test]
    async fn test_enumeration_failure_takes_no_action() {
        let dev = tempfile::tempdir().unwrap();
        let sessions = ScriptedSessions::default();
        sessions.set(None);
        let fake = FakeProcesses::default();
        fake.inner.lock().unwrap().running.push(77);
        let mut poller = poller(dev.path(), sessions, fake.clone());

        let result = poller.tick_at(epoch(10_000)).await;
        assert!(matches!(result, Err(TickError::Sample(_))));
        assert_eq!(fake.running(), vec![77]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_on_interval_until_shutdown() {
        let dev = tempfile::tempdir().unwrap();
        let sessions = ScriptedSessions::default();
        // Every tick fails to sample; the loop must keep going regardless.
        sessions.set(None);
        let calls = sessions.calls.clone();
        let mut poller = poller(dev.path(), sessions, FakeProcesses::default());

        poller
            .run(tokio::time::sleep(Duration::from_secs(150)))
            .await;

        // Ticks at 0s, 60s and 120s.
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }
}
