//! Session sources.
//!
//! A session source enumerates the currently active logins together with their
//! controlling terminal device. Sources are re-queried on every tick.

mod logind;
mod who;

use async_trait::async_trait;
pub use logind::LogindSource;
use thiserror::Error;
pub use who::WhoSource;

use crate::config::SessionSourceKind;
use crate::domain::Session;

/// Trait for session enumeration backends.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// List active sessions. An empty list means nobody is logged in.
    async fn sessions(&self) -> Result<Vec<Session>, SessionError>;
}

/// Errors that can occur while enumerating sessions.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("DBus request failed: {0}")]
    Bus(#[from] zbus::Error),

    #[error("Unexpected DBus reply: {0}")]
    Reply(String),

    #[error("Failed to run `who`: {0}")]
    Command(#[from] std::io::Error),

    #[error("`who` exited with code {0:?}")]
    CommandFailed(Option<i32>),
}

/// Build the configured session source.
pub fn from_kind(kind: SessionSourceKind) -> Box<dyn SessionSource> {
    match kind {
        SessionSourceKind::Logind => Box::new(LogindSource::new()),
        SessionSourceKind::Who => Box::new(WhoSource::new()),
    }
}

#[async_trait]
impl<S: SessionSource + ?Sized> SessionSource for Box<S> {
    async fn sessions(&self) -> Result<Vec<Session>, SessionError> {
        (**self).sessions().await
    }
}
