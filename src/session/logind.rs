//! Session enumeration via systemd-logind DBus interface.
//!
//! Queries the login1 Manager for user sessions and per-session idle hints,
//! and watches PrepareForSleep for resume notifications.

use super::{SessionEntry, SessionError, SessionSource};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use zbus::Connection;
use zbus::zvariant::OwnedObjectPath;

/// DBus interfaces for login1.
const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";
const SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Row shape of Manager.ListSessions: (id, uid, user, seat, object path).
type SessionRow = (String, u32, String, String, OwnedObjectPath);

/// Session snapshot source backed by systemd-logind.
pub struct LogindSource {
    conn: Connection,
}

impl LogindSource {
    /// Connect to the system bus.
    pub async fn connect() -> Result<Self, SessionError> {
        let conn = Connection::system()
            .await
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    async fn session_entry(&self, row: &SessionRow) -> Result<Option<SessionEntry>, SessionError> {
        let (id, uid, user, _seat, path) = row;

        // Only numeric ids are real user sessions; greeters get ids like "c1".
        let Ok(session_id) = id.parse::<u32>() else {
            trace!("Skipping non-numeric session id: {}", id);
            return Ok(None);
        };

        let class: String = get_property(&self.conn, path.as_str(), "Class").await?;
        if class != "user" {
            trace!("Skipping session {} with class {}", session_id, class);
            return Ok(None);
        }

        let state: String = get_property(&self.conn, path.as_str(), "State").await?;

        // Idle failures degrade the entry, they don't drop the session.
        let idle = match self.query_idle(path.as_str()).await {
            Ok(idle) => idle,
            Err(e) => {
                debug!("Failed to query idle state for session {}: {}", session_id, e);
                None
            }
        };

        Ok(Some(SessionEntry {
            session_id,
            uid: *uid,
            username: user.clone(),
            connected: is_connected(&state),
            idle,
        }))
    }

    /// Read IdleHint/IdleSinceHint for a session object path.
    ///
    /// IdleSinceHint is a CLOCK_REALTIME timestamp in microseconds; zero
    /// means logind has no idle information for the session.
    async fn query_idle(&self, path: &str) -> Result<Option<Duration>, SessionError> {
        let idle_hint: bool = get_bool_property(&self.conn, path, "IdleHint").await?;
        if !idle_hint {
            return Ok(Some(Duration::ZERO));
        }

        let since_usec: u64 = get_u64_property(&self.conn, path, "IdleSinceHint").await?;
        if since_usec == 0 {
            return Ok(None);
        }

        let now_usec = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SessionError::QueryFailed(e.to_string()))?
            .as_micros() as u64;

        Ok(Some(Duration::from_micros(now_usec.saturating_sub(since_usec))))
    }

    async fn session_path(&self, session_id: u32) -> Result<OwnedObjectPath, SessionError> {
        let proxy = manager_proxy(&self.conn).await?;
        proxy
            .call("GetSession", &(session_id.to_string(),))
            .await
            .map_err(|_| SessionError::NotFound(session_id))
    }
}

#[async_trait]
impl SessionSource for LogindSource {
    async fn list_sessions(&self) -> Result<Vec<SessionEntry>, SessionError> {
        let proxy = manager_proxy(&self.conn).await?;

        let rows: Vec<SessionRow> = proxy
            .call("ListSessions", &())
            .await
            .map_err(|e| SessionError::QueryFailed(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.session_entry(row).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => {
                    // One bad session must not hide the others.
                    debug!("Skipping session {}: {}", row.0, e);
                }
            }
        }

        Ok(entries)
    }

    async fn session_idle(&self, session_id: u32) -> Result<Duration, SessionError> {
        let path = self.session_path(session_id).await?;
        self.query_idle(path.as_str())
            .await?
            .ok_or(SessionError::NotFound(session_id))
    }

    async fn system_uptime(&self) -> Result<Duration, SessionError> {
        let content = std::fs::read_to_string("/proc/uptime")
            .map_err(|e| SessionError::UptimeUnavailable(e.to_string()))?;
        parse_uptime(&content)
    }
}

/// Watch logind's PrepareForSleep signal and report resumes on `tx`.
///
/// The signal fires with `true` when the machine is about to suspend and
/// `false` once it has woken up again; only the wake edge is forwarded.
pub async fn watch_resume(tx: mpsc::Sender<()>) -> Result<(), SessionError> {
    let conn = Connection::system()
        .await
        .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

    let proxy = manager_proxy(&conn).await?;
    let mut stream = proxy
        .receive_signal("PrepareForSleep")
        .await
        .map_err(|e| SessionError::QueryFailed(e.to_string()))?;

    debug!("Watching PrepareForSleep for resume events");

    while let Some(msg) = stream.next().await {
        let entering_sleep: bool = match msg.body().deserialize() {
            Ok(v) => v,
            Err(e) => {
                warn!("Malformed PrepareForSleep signal: {}", e);
                continue;
            }
        };

        if !entering_sleep && tx.send(()).await.is_err() {
            // Receiver dropped, daemon is shutting down.
            return Ok(());
        }
    }

    Ok(())
}

async fn manager_proxy(conn: &Connection) -> Result<zbus::Proxy<'static>, SessionError> {
    zbus::Proxy::new(conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE)
        .await
        .map_err(|e| SessionError::ConnectionFailed(e.to_string()))
}

/// Get a session property as a String.
async fn get_property(conn: &Connection, path: &str, name: &str) -> Result<String, SessionError> {
    let value = get_raw_property(conn, path, name).await?;
    String::try_from(value).map_err(|_| SessionError::QueryFailed(format!("{name} is not a string")))
}

async fn get_bool_property(conn: &Connection, path: &str, name: &str) -> Result<bool, SessionError> {
    let value = get_raw_property(conn, path, name).await?;
    value
        .downcast_ref::<bool>()
        .map_err(|_| SessionError::QueryFailed(format!("{name} is not a boolean")))
}

async fn get_u64_property(conn: &Connection, path: &str, name: &str) -> Result<u64, SessionError> {
    let value = get_raw_property(conn, path, name).await?;
    u64::try_from(value).map_err(|_| SessionError::QueryFailed(format!("{name} is not a u64")))
}

async fn get_raw_property(
    conn: &Connection,
    path: &str,
    name: &str,
) -> Result<zbus::zvariant::OwnedValue, SessionError> {
    let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, path, PROPERTIES_INTERFACE)
        .await
        .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

    proxy
        .call("Get", &(SESSION_INTERFACE, name))
        .await
        .map_err(|e| SessionError::QueryFailed(e.to_string()))
}

/// Map a logind session State string to a connection flag.
///
/// "active" sessions have an attached display; "online" sessions are logged
/// in with no foreground attachment, which is the disconnected case.
fn is_connected(state: &str) -> bool {
    state == "active"
}

/// Parse the first field of /proc/uptime (seconds since boot).
fn parse_uptime(content: &str) -> Result<Duration, SessionError> {
    let seconds = content
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| SessionError::UptimeUnavailable(format!("unparseable: {content:?}")))?;

    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uptime() {
        let d = parse_uptime("12345.67 98765.43\n").unwrap();
        assert_eq!(d.as_secs(), 12345);
    }

    #[test]
    fn test_parse_uptime_rejects_garbage() {
        assert!(parse_uptime("").is_err());
        assert!(parse_uptime("not-a-number\n").is_err());
    }

    #[test]
    fn test_is_connected_mapping() {
        assert!(is_connected("active"));
        assert!(!is_connected("online"));
        assert!(!is_connected("closing"));
    }
}
