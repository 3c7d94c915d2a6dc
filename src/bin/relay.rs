//! hibernatord-relay - per-session notification helper.
//!
//! Runs unprivileged inside a user's desktop session, listens on that
//! session's notification socket, and surfaces daemon messages as desktop
//! notifications. One connection carries exactly one command and one
//! response.

use anyhow::{Context, Result};
use clap::Parser;
use hibernatord::protocol::{self, CommandType, NotifyCommand, NotifyResponse, ResponseStatus};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Command;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Notification id used for warnings so a later warning (or a dismiss)
/// replaces the toast instead of stacking a new one.
const WARNING_NOTIFICATION_ID: &str = "9041";

/// Per-session notification relay for hibernatord.
#[derive(Parser, Debug)]
#[command(name = "hibernatord-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session this relay serves.
    #[arg(long)]
    session: u32,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("hibernatord-relay starting for session {}", args.session);

    let socket = protocol::socket_path(args.session);
    // The daemon unlinks stale sockets before spawning us, but a manual
    // restart may leave one behind.
    let _ = std::fs::remove_file(&socket);
    let listener = UnixListener::bind(&socket)
        .with_context(|| format!("Failed to bind {}", socket.display()))?;

    info!("Listening on {}", socket.display());

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install signal handler")?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        if let Err(e) = handle_connection(stream, args.session).await {
                            error!("Error handling connection: {}", e);
                        }
                    }
                    Err(e) => error!("Error accepting connection: {}", e),
                }
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
        }
    }

    info!("Shutting down relay");
    let _ = std::fs::remove_file(&socket);
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("hibernatord_relay={level},hibernatord={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    Ok(())
}

/// Read one command, act on it, write one response.
async fn handle_connection(stream: UnixStream, session_id: u32) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read command")?;
    if read == 0 {
        anyhow::bail!("no data received");
    }

    let response = match serde_json::from_str::<NotifyCommand>(line.trim_end()) {
        Ok(cmd) => {
            debug!("Received command: {:?}", cmd.command);
            handle_command(&cmd, session_id).await
        }
        Err(e) => {
            warn!("Malformed command: {}", e);
            NotifyResponse::error(session_id, format!("malformed command: {e}"))
        }
    };

    let mut payload = serde_json::to_vec(&response).context("Failed to encode response")?;
    payload.push(b'\n');
    write_half
        .write_all(&payload)
        .await
        .context("Failed to write response")?;

    Ok(())
}

async fn handle_command(cmd: &NotifyCommand, session_id: u32) -> NotifyResponse {
    match cmd.command {
        CommandType::Ping => NotifyResponse::new(ResponseStatus::Pong, session_id),
        CommandType::Dismiss => {
            // Best-effort retraction; the daemon never reads this response.
            if let Err(e) = retract_warning().await {
                debug!("Failed to retract warning toast: {}", e);
            }
            NotifyResponse::new(ResponseStatus::Displayed, session_id)
        }
        CommandType::Warning => {
            let body = cmd.message.as_deref().unwrap_or("This machine is about to hibernate.");
            match show_notification("Hibernation warning", body, true).await {
                Ok(()) => NotifyResponse::new(ResponseStatus::Displayed, session_id),
                Err(e) => NotifyResponse::error(session_id, e.to_string()),
            }
        }
        CommandType::Cancel | CommandType::Info => {
            let body = cmd.message.as_deref().unwrap_or_default();
            match show_notification("Hibernation monitor", body, false).await {
                Ok(()) => NotifyResponse::new(ResponseStatus::Displayed, session_id),
                Err(e) => NotifyResponse::error(session_id, e.to_string()),
            }
        }
    }
}

/// Render a desktop notification via notify-send.
async fn show_notification(summary: &str, body: &str, urgent: bool) -> Result<()> {
    let mut command = Command::new("notify-send");
    if urgent {
        // Warnings replace each other and stay until acted on.
        command
            .arg("--urgency=critical")
            .arg("--print-id")
            .arg("--replace-id")
            .arg(WARNING_NOTIFICATION_ID);
    }
    command.arg(summary).arg(body);

    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("Failed to spawn notify-send")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "notify-send exited with {:?}: {}",
            output.status.code(),
            stderr.trim()
        );
    }

    Ok(())
}

/// Replace the standing warning toast with an immediately-expiring blank.
async fn retract_warning() -> Result<()> {
    let status = Command::new("notify-send")
        .arg("--replace-id")
        .arg(WARNING_NOTIFICATION_ID)
        .arg("--expire-time=1")
        .arg("--urgency=low")
        .arg(" ")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .context("Failed to spawn notify-send")?;

    if !status.success() {
        anyhow::bail!("notify-send exited with {:?}", status.code());
    }
    Ok(())
}
