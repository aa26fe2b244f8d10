//! Session enumeration via the `who` utility.
//!
//! Reads utmp through `who -s`, keeping the first two columns (user and line).

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{trace, warn};

use super::{SessionError, SessionSource};
use crate::domain::Session;

/// Session source backed by `who`.
#[derive(Debug)]
pub struct WhoSource {
    program: String,
}

impl WhoSource {
    pub fn new() -> Self {
        Self {
            program: "who".to_string(),
        }
    }
}

impl Default for WhoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionSource for WhoSource {
    async fn sessions(&self) -> Result<Vec<Session>, SessionError> {
        let output = Command::new(&self.program)
            .arg("-s")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            warn!(
                "who failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(SessionError::CommandFailed(output.status.code()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let sessions = parse_who_output(&stdout);
        trace!("who reported {} sessions", sessions.len());
        Ok(sessions)
    }
}

/// Parse `who -s` output into sessions.
///
/// Lines look like `alice    pts/0        2026-10-16 09:12 (10.0.0.4)`.
fn parse_who_output(output: &str) -> Vec<Session> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let user = fields.next()?;
            let tty = fields.next()?;
            Some(Session::new(user, tty))
        })
        .collect()
}
