//! Worker lifecycle state machine.
//!
//! Each tick crosses the idle verdict with the freshly observed worker state:
//! - idle and stopped: start the worker
//! - busy and running: stop every instance
//! - otherwise: leave things alone

use tracing::{debug, error, info};

use crate::config::WorkerSpec;
use crate::domain::{IdleVerdict, WorkerState};
use crate::worker::{ControlError, ProcessControl};

/// What the controller decided to do in a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    None,
}

impl Action {
    /// Decide the action for a verdict and an observed worker state.
    pub fn decide(verdict: IdleVerdict, state: &WorkerState) -> Self {
        match (verdict, state.is_running()) {
            (IdleVerdict::Idle, false) => Self::Start,
            (IdleVerdict::Busy, true) => Self::Stop,
            (IdleVerdict::Idle, true) | (IdleVerdict::Busy, false) => Self::None,
        }
    }
}

/// Result of applying a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Worker was started with this pid.
    Started { pid: u32 },
    /// This many worker processes were signaled.
    Stopped { signaled: usize },
    /// Nothing needed doing.
    Unchanged(WorkerState),
    /// Dry run: the action that would have been taken.
    Skipped(Action),
}

/// Starts and stops the worker according to each tick's verdict.
pub struct DaemonController<P> {
    processes: P,
    spec: WorkerSpec,
    dry_run: bool,
}

impl<P: ProcessControl> DaemonController<P> {
    pub fn new(processes: P, spec: WorkerSpec, dry_run: bool) -> Self {
        Self {
            processes,
            spec,
            dry_run,
        }
    }

    /// Observe the worker by name.
    pub fn observe(&mut self) -> Result<WorkerState, ControlError> {
        let pids = self.processes.find(&self.spec.process_name)?;
        Ok(WorkerState::from_pids(pids))
    }

    /// Observe the worker and act on `verdict`.
    ///
    /// The observation happens right before the action, in the same call, so a
    /// worker started by an earlier tick (or an earlier daemon) is never duplicated.
    pub fn apply(&mut self, verdict: IdleVerdict) -> Result<Outcome, ControlError> {
        let state = self.observe()?;
        let action = Action::decide(verdict, &state);
        debug!("Verdict {}, worker {:?}: {:?}", verdict, state, action);

        if self.dry_run && action != Action::None {
            info!(
                "[DRY RUN] Would {} {}",
                if action == Action::Start { "start" } else { "stop" },
                self.spec.process_name
            );
            return Ok(Outcome::Skipped(action));
        }

        match action {
            Action::Start => self.start(),
            Action::Stop => self.stop(),
            Action::None => Ok(Outcome::Unchanged(state)),
        }
    }

    fn start(&mut self) -> Result<Outcome, ControlError> {
        match self.processes.start(&self.spec) {
            Ok(pid) => {
                info!(
                    "Machine idle, started {} (pid {}) in {}",
                    self.spec.process_name,
                    pid,
                    self.spec.working_dir.display()
                );
                Ok(Outcome::Started { pid })
            }
            Err(e) => {
                error!("Failed to start {}: {}", self.spec.process_name, e);
                Err(e)
            }
        }
    }

    /// Stop every instance of the worker. Stopping a stopped worker is a no-op.
    pub fn stop(&mut self) -> Result<Outcome, ControlError> {
        let signaled = self.processes.terminate(&self.spec.process_name)?;
        if signaled > 0 {
            info!(
                "Machine in use, stopped {} ({} process(es))",
                self.spec.process_name, signaled
            );
        }
        Ok(Outcome::Stopped { signaled })
    }
}
