//! Session enumeration via the systemd-logind `DBus` interface.
//!
//! Lists sessions with `Manager.ListSessions` and reads each session's `TTY` property.

use async_trait::async_trait;
use tracing::{debug, trace};
use zbus::Connection;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

use super::{SessionError, SessionSource};
use crate::domain::Session;

/// `DBus` service and paths for login1.
const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";
const SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Reply row of `ListSessions`: id, uid, user name, seat, object path.
type SessionRow = (String, u32, String, String, OwnedObjectPath);

/// Session source backed by systemd-logind.
#[derive(Debug, Default)]
pub struct LogindSource;

impl LogindSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionSource for LogindSource {
    async fn sessions(&self) -> Result<Vec<Session>, SessionError> {
        let conn = Connection::system().await?;
        let rows = list_sessions(&conn).await?;
        trace!("logind reported {} sessions", rows.len());

        let mut replies = Vec::with_capacity(rows.len());
        for (id, _uid, user, _seat, path) in rows {
            let tty = get_tty(&conn, path.as_str()).await;
            replies.push(TtyReply { id, user, tty });
        }

        Ok(sessions_with_terminal(replies))
    }
}

/// A `ListSessions` row paired with the outcome of reading its `TTY`.
struct TtyReply {
    id: String,
    user: String,
    tty: Result<String, SessionError>,
}

/// Keep the sessions that have a controlling terminal.
///
/// A failed property read means the session ended after it was listed.
fn sessions_with_terminal(replies: Vec<TtyReply>) -> Vec<Session> {
    replies
        .into_iter()
        .filter_map(|reply| match reply.tty {
            Ok(tty) if tty.is_empty() => {
                trace!("Session {} ({}) has no terminal", reply.id, reply.user);
                None
            }
            Ok(tty) => Some(Session::new(reply.user, tty)),
            Err(e) => {
                debug!("Skipping session {}: {}", reply.id, e);
                None
            }
        })
        .collect()
}

/// Call `Manager.ListSessions`.
async fn list_sessions(conn: &Connection) -> Result<Vec<SessionRow>, SessionError> {
    let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE).await?;
    let rows: Vec<SessionRow> = proxy.call("ListSessions", &()).await?;
    Ok(rows)
}

/// Get the `TTY` property of a session.
async fn get_tty(conn: &Connection, session_path: &str) -> Result<String, SessionError> {
    let proxy =
        zbus::Proxy::new(conn, LOGIND_SERVICE, session_path, PROPERTIES_INTERFACE).await?;

    let value: OwnedValue = proxy.call("Get", &(SESSION_INTERFACE, "TTY")).await?;

    String::try_from(value).map_err(|e| SessionError::Reply(format!("TTY is not a string: {e}")))
}
