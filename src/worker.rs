//! Worker process control.
//!
//! The worker is never tracked through a handle. Running instances are found by
//! process name every time, so a fresh invocation of the daemon sees the
//! same state as the one that started the worker.

use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use sysinfo::{
    Pid, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System, UpdateKind,
};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, trace, warn};

use crate::config::WorkerSpec;

/// Longest process name the kernel keeps in `comm` (`TASK_COMM_LEN` - 1).
const COMM_MAX_LEN: usize = 15;

/// Process table operations the controller needs.
pub trait ProcessControl: Send {
    /// Pids of live processes named exactly `name`.
    fn find(&mut self, name: &str) -> Result<Vec<u32>, ControlError>;

    /// Start the worker detached from the caller. Returns its pid.
    fn start(&mut self, spec: &WorkerSpec) -> Result<u32, ControlError>;

    /// Send a termination signal to every process named `name`.
    ///
    /// Returns how many processes were signaled. Nothing to signal is not an error.
    fn terminate(&mut self, name: &str) -> Result<usize, ControlError>;
}

/// Errors from starting, finding or stopping the worker.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Worker binary not found: {0}")]
    BinaryNotFound(PathBuf),

    #[error("Worker working directory not found: {0}")]
    WorkingDirNotFound(PathBuf),

    #[error("Failed to open worker log {path}: {source}")]
    LogFile { path: PathBuf, source: io::Error },

    #[error("Failed to spawn worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("Failed to signal worker process {0}")]
    Terminate(u32),

    #[error("Process signaling is not supported on this platform")]
    Unsupported,
}

/// Process control against the real process table.
pub struct SystemProcesses {
    system: System,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Live (non-zombie) processes carrying `name`.
    ///
    /// Names longer than `comm` can hold are matched on the truncated `comm`
    /// first, then confirmed against the executable path or command line.
    fn live_pids(&mut self, name: &str) -> Vec<Pid> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );

        let comm = truncate_comm(name);
        let candidates: Vec<Pid> = self
            .system
            .processes()
            .values()
            .filter(|p| p.name().as_bytes() == comm)
            .filter(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .map(Process::pid)
            .collect();

        if name.len() < COMM_MAX_LEN || candidates.is_empty() {
            return candidates;
        }

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&candidates),
            true,
            ProcessRefreshKind::nothing()
                .with_exe(UpdateKind::Always)
                .with_cmd(UpdateKind::Always),
        );

        candidates
            .into_iter()
            .filter(|pid| {
                self.system.process(*pid).is_some_and(|p| {
                    let matched = full_name_matches(name, p.exe(), p.cmd());
                    trace!("{:?} (pid {}) matches {}: {}", p.name(), pid, name, matched);
                    matched
                })
            })
            .collect()
    }

    /// Whether `pid` is gone (or only a zombie) after a fresh look.
    fn has_exited(&mut self, pid: Pid) -> bool {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        self.system
            .process(pid)
            .is_none_or(|p| matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for SystemProcesses {
    fn find(&mut self, name: &str) -> Result<Vec<u32>, ControlError> {
        Ok(self.live_pids(name).into_iter().map(Pid::as_u32).collect())
    }

    fn start(&mut self, spec: &WorkerSpec) -> Result<u32, ControlError> {
        if !spec.binary.is_file() {
            return Err(ControlError::BinaryNotFound(spec.binary.clone()));
        }
        if !spec.working_dir.is_dir() {
            return Err(ControlError::WorkingDirNotFound(spec.working_dir.clone()));
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_file)
            .map_err(|source| ControlError::LogFile {
                path: spec.log_file.clone(),
                source,
            })?;
        let log_err = log.try_clone().map_err(|source| ControlError::LogFile {
            path: spec.log_file.clone(),
            source,
        })?;

        let mut child = Command::new(&spec.binary)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            // Own process group: terminal hangups and Ctrl-C aimed at us do not reach it.
            .process_group(0)
            .kill_on_drop(false)
            .spawn()
            .map_err(ControlError::Spawn)?;

        let pid = child.id().unwrap_or_default();
        let name = spec.process_name.clone();

        // Reap the worker when it exits so it never shows up as a zombie.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!("Worker {} (pid {}) exited: {}", name, pid, status),
                Err(e) => warn!("Failed to wait for worker {} (pid {}): {}", name, pid, e),
            }
        });

        Ok(pid)
    }

    fn terminate(&mut self, name: &str) -> Result<usize, ControlError> {
        let pids = self.live_pids(name);

        let mut signaled = 0;
        for pid in pids {
            let sent = self
                .system
                .process(pid)
                .map(|p| p.kill_with(Signal::Term).ok_or(ControlError::Unsupported))
                .transpose()?;

            match sent {
                Some(true) => {
                    debug!("Sent SIGTERM to {} (pid {})", name, pid);
                    signaled += 1;
                }
                // Exited between the lookup and the signal.
                None => {}
                Some(false) if self.has_exited(pid) => {
                    debug!("{} (pid {}) exited before it was signaled", name, pid);
                }
                Some(false) => return Err(ControlError::Terminate(pid.as_u32())),
            }
        }

        Ok(signaled)
    }
}

/// The `comm` the kernel records for an executable called `name`.
fn truncate_comm(name: &str) -> &[u8] {
    let bytes = name.as_bytes();
    &bytes[..bytes.len().min(COMM_MAX_LEN)]
}

/// Whether a process whose `comm` is the truncated `name` really is `name`.
///
/// Checks the executable's file name, then the first two command line words
/// (an interpreter runs scripts as `sh /path/to/script`).
fn full_name_matches(name: &str, exe: Option<&Path>, cmd: &[std::ffi::OsString]) -> bool {
    let is_name = |path: &Path| path.file_name() == Some(OsStr::new(name));

    exe.is_some_and(is_name) || cmd.iter().take(2).any(|arg| is_name(Path::new(arg)))
}
