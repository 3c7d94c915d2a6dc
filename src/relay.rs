//! Relay process management and message delivery.
//!
//! The privileged daemon cannot draw UI inside user desktop sessions, so it
//! keeps one unprivileged relay process per session and talks to it over a
//! session-scoped Unix socket, one command/response exchange per
//! notification.

use crate::protocol::{self, NotifyCommand, NotifyResponse, ResponseStatus};
use crate::session::SessionEntry;
use crate::throttle::{ThrottleDecision, WarningThrottle};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How long to keep retrying a connect to a relay endpoint that is not yet
/// bound or is busy with another exchange.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the endpoint.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for the single response line of an exchange.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Info message announced once when monitoring begins.
const STARTUP_MESSAGE: &str = "Hibernation monitoring started for this machine";

/// Message-passing interface the orchestrator drives.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Deliver a hibernation warning to connected sessions (throttled).
    async fn send_warning(
        &self,
        sessions: &[SessionEntry],
        reason: &str,
        time_remaining: Duration,
    ) -> Result<()>;

    /// Tell connected sessions the pending hibernation was canceled.
    async fn send_cancellation(&self, sessions: &[SessionEntry]) -> Result<()>;

    /// Deliver an informational message to connected sessions.
    async fn send_info(&self, sessions: &[SessionEntry], message: &str) -> Result<()>;

    /// Best-effort retraction of a visible warning; no response awaited.
    async fn dismiss_warning(&self) -> Result<()>;

    /// Forget warning delivery history (warning mode exited).
    async fn reset_warning_throttle(&self);

    /// Terminate every relay process and release resources.
    async fn shutdown(&self);
}

/// One running relay process.
struct RelayProcess {
    username: String,
    child: Child,
    connected: bool,
}

/// Owns the per-session relay registry and the warning throttle.
pub struct RelayManager {
    relays: Mutex<HashMap<u32, RelayProcess>>,
    relay_path: PathBuf,
    throttle: Mutex<WarningThrottle>,
    startup_notice_sent: AtomicBool,
}

impl RelayManager {
    /// Create a manager using the given relay executable.
    ///
    /// A missing executable is reported but not fatal: every spawn will fail
    /// and be logged, and hibernation decisions proceed without
    /// notifications.
    pub fn new(relay_path: Option<PathBuf>) -> Result<Self> {
        let relay_path = match relay_path {
            Some(path) => path,
            None => {
                let exe = std::env::current_exe().context("Failed to get executable path")?;
                exe.with_file_name("hibernatord-relay")
            }
        };

        if !relay_path.exists() {
            warn!(
                "Relay executable not found at {}; notifications will not be delivered",
                relay_path.display()
            );
        }

        Ok(Self {
            relays: Mutex::new(HashMap::new()),
            relay_path,
            throttle: Mutex::new(WarningThrottle::default()),
            startup_notice_sent: AtomicBool::new(false),
        })
    }

    /// Bring the relay registry in line with the current snapshot: spawn
    /// missing relays, restart dead ones, refresh connection flags, and tear
    /// down relays for sessions that disappeared.
    async fn ensure_relays(&self, sessions: &[SessionEntry]) {
        let mut relays = self.relays.lock().await;
        let mut connected_spawned = false;
        let mut spawned: Vec<u32> = Vec::new();

        for session in sessions {
            if let Some(relay) = relays.get_mut(&session.session_id) {
                relay.connected = session.connected;

                match relay.child.try_wait() {
                    Ok(None) => continue,
                    Ok(Some(status)) => {
                        info!(
                            "Relay for session {} exited ({}), restarting",
                            session.session_id, status
                        );
                    }
                    Err(e) => {
                        warn!(
                            "Failed to check relay for session {}: {}",
                            session.session_id, e
                        );
                    }
                }
                relays.remove(&session.session_id);
            }

            match self.spawn_relay(session) {
                Ok(relay) => {
                    if session.connected {
                        connected_spawned = true;
                    }
                    spawned.push(session.session_id);
                    relays.insert(session.session_id, relay);
                }
                Err(e) => {
                    warn!(
                        "Failed to start relay for session {}: {}",
                        session.session_id, e
                    );
                }
            }
        }

        let active: HashSet<u32> = sessions.iter().map(|s| s.session_id).collect();
        let gone: Vec<u32> = relays
            .keys()
            .filter(|id| !active.contains(id))
            .copied()
            .collect();
        for session_id in gone {
            if let Some(relay) = relays.remove(&session_id) {
                info!(
                    "Session {} ({}) is gone, stopping its relay",
                    session_id, relay.username
                );
                stop_relay(session_id, relay).await;
            }
        }
        drop(relays);

        self.probe_relays(&spawned).await;

        // Announce monitoring exactly once per process lifetime; the flag is
        // set even if delivery fails and never resets.
        if connected_spawned && !self.startup_notice_sent.swap(true, Ordering::SeqCst) {
            if let Err(e) = self
                .deliver_connected(&NotifyCommand::info(STARTUP_MESSAGE), "startup notice")
                .await
            {
                warn!("Failed to send startup notice: {}", e);
            }
        }
    }

    /// Launch a relay inside the session's security context.
    fn spawn_relay(&self, session: &SessionEntry) -> Result<RelayProcess> {
        info!(
            "Starting relay for session {} ({})",
            session.session_id, session.username
        );

        let socket = protocol::socket_path(session.session_id);
        std::fs::create_dir_all(protocol::socket_dir())
            .context("Failed to create runtime directory")?;
        // A previous relay may have died without unlinking its socket.
        let _ = std::fs::remove_file(&socket);

        let child = Command::new(&self.relay_path)
            .arg("--session")
            .arg(session.session_id.to_string())
            .env(protocol::RUNTIME_DIR_ENV, protocol::socket_dir())
            .uid(session.uid)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn relay process")?;

        info!(
            "Relay started for session {} (pid {:?})",
            session.session_id, child.id()
        );

        Ok(RelayProcess {
            username: session.username.clone(),
            child,
            connected: session.connected,
        })
    }

    /// Liveness-probe freshly spawned relays. Failure is logged, not fatal.
    async fn probe_relays(&self, session_ids: &[u32]) {
        for &session_id in session_ids {
            match exchange(session_id, &NotifyCommand::ping()).await {
                Ok(response) if response.status == ResponseStatus::Pong => {
                    debug!("Relay for session {} is responding", session_id);
                }
                Ok(response) => {
                    warn!(
                        "Relay for session {} answered ping with {:?}",
                        session_id, response.status
                    );
                }
                Err(e) => {
                    warn!("Failed to ping relay for session {}: {}", session_id, e);
                }
            }
        }
    }

    /// Deliver one command to every connected relay.
    ///
    /// Failures are isolated per session; the last error is reported after
    /// every delivery has been attempted.
    async fn deliver_connected(&self, cmd: &NotifyCommand, what: &str) -> Result<()> {
        let relays = self.relays.lock().await;
        if relays.is_empty() {
            debug!("No relays to deliver {} to", what);
            return Ok(());
        }

        let targets: Vec<(u32, bool)> = relays
            .iter()
            .map(|(id, relay)| (*id, relay.connected))
            .collect();
        // Exchanges don't touch the registry; don't hold its lock for them.
        drop(relays);

        let mut success_count = 0usize;
        let mut last_err = None;

        for (session_id, connected) in targets {
            if !connected {
                debug!("Skipping {} to disconnected session {}", what, session_id);
                continue;
            }

            match exchange(session_id, cmd).await {
                Ok(_) => success_count += 1,
                Err(e) => {
                    warn!("Failed to send {} to session {}: {}", what, session_id, e);
                    last_err = Some(e);
                }
            }
        }

        if success_count > 0 {
            info!("{} sent to {} connected session(s)", what, success_count);
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NotifyChannel for RelayManager {
    async fn send_warning(
        &self,
        sessions: &[SessionEntry],
        reason: &str,
        time_remaining: Duration,
    ) -> Result<()> {
        self.ensure_relays(sessions).await;

        let now = Instant::now();
        let decision = self.throttle.lock().await.should_send(now);
        if decision == ThrottleDecision::Skip {
            debug!("Warning already in flight, skipping delivery this cycle");
            return Ok(());
        }

        let cmd = NotifyCommand::warning(reason, time_remaining);
        let result = self.deliver_connected(&cmd, "warning").await;
        if result.is_ok() {
            self.throttle.lock().await.record_sent(now);
        }
        result
    }

    async fn send_cancellation(&self, sessions: &[SessionEntry]) -> Result<()> {
        self.ensure_relays(sessions).await;
        self.deliver_connected(&NotifyCommand::cancel(), "cancellation")
            .await
    }

    async fn send_info(&self, sessions: &[SessionEntry], message: &str) -> Result<()> {
        self.ensure_relays(sessions).await;
        self.deliver_connected(&NotifyCommand::info(message), "info notification")
            .await
    }

    async fn dismiss_warning(&self) -> Result<()> {
        let relays = self.relays.lock().await;
        let targets: Vec<u32> = relays
            .iter()
            .filter(|(_, relay)| relay.connected)
            .map(|(id, _)| *id)
            .collect();
        drop(relays);

        let cmd = NotifyCommand::dismiss();
        for session_id in targets {
            if let Err(e) = send_no_wait(session_id, &cmd).await {
                debug!("Failed to send dismiss to session {}: {}", session_id, e);
            }
        }
        Ok(())
    }

    async fn reset_warning_throttle(&self) {
        self.throttle.lock().await.reset();
    }

    async fn shutdown(&self) {
        let mut relays = self.relays.lock().await;
        for (session_id, relay) in relays.drain() {
            info!("Stopping relay for session {}", session_id);
            stop_relay(session_id, relay).await;
        }
    }
}

/// Terminate a relay process and unlink its socket.
async fn stop_relay(session_id: u32, mut relay: RelayProcess) {
    if let Err(e) = relay.child.kill().await {
        debug!("Failed to kill relay for session {}: {}", session_id, e);
    }
    let _ = std::fs::remove_file(protocol::socket_path(session_id));
}

/// One synchronous request/reply exchange with a session's relay.
pub async fn exchange(session_id: u32, cmd: &NotifyCommand) -> Result<NotifyResponse> {
    exchange_at(&protocol::socket_path(session_id), cmd).await
}

/// Exchange against an explicit socket path.
pub async fn exchange_at(path: &Path, cmd: &NotifyCommand) -> Result<NotifyResponse> {
    let stream = connect_with_retry(path, CONNECT_TIMEOUT).await?;
    let (read_half, mut write_half) = stream.into_split();

    let mut payload = serde_json::to_vec(cmd).context("Failed to encode command")?;
    payload.push(b'\n');
    write_half
        .write_all(&payload)
        .await
        .context("Failed to write command")?;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let read = tokio::time::timeout(RESPONSE_TIMEOUT, reader.read_line(&mut line))
        .await
        .context("Timed out waiting for relay response")?
        .context("Failed to read relay response")?;

    if read == 0 {
        anyhow::bail!("relay closed the connection without responding");
    }

    let response: NotifyResponse =
        serde_json::from_str(line.trim_end()).context("Malformed relay response")?;

    if response.status == ResponseStatus::Error {
        anyhow::bail!(
            "relay error: {}",
            response.error.as_deref().unwrap_or("unknown")
        );
    }

    Ok(response)
}

/// Write a command without waiting for a response.
async fn send_no_wait(session_id: u32, cmd: &NotifyCommand) -> Result<()> {
    let path = protocol::socket_path(session_id);
    let mut stream = connect_with_retry(&path, CONNECT_TIMEOUT).await?;

    let mut payload = serde_json::to_vec(cmd).context("Failed to encode command")?;
    payload.push(b'\n');
    stream
        .write_all(&payload)
        .await
        .context("Failed to write command")?;
    Ok(())
}

/// Connect to a relay endpoint, polling until it is ready or the timeout
/// elapses. Covers both "socket not yet bound" and "relay busy with another
/// exchange".
async fn connect_with_retry(path: &Path, timeout: Duration) -> Result<UnixStream> {
    let deadline = Instant::now() + timeout;

    loop {
        match UnixStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                if Instant::now() >= deadline {
                    anyhow::bail!("relay endpoint not available: {}", path.display());
                }
                tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to connect to {}", path.display()));
            }
        }
    }
}
