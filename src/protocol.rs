//! Notification channel wire protocol.
//!
//! One JSON object per exchange, newline-terminated, over a session-scoped
//! Unix socket. The daemon writes a single command and reads a single
//! response; the relay does the reverse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the socket directory (used by tests and
/// unprivileged runs).
pub const RUNTIME_DIR_ENV: &str = "HIBERNATORD_RUNTIME_DIR";

/// Default socket directory for the privileged daemon.
const DEFAULT_RUNTIME_DIR: &str = "/run/hibernatord";

/// Command sent from the daemon to a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Warning,
    Cancel,
    Dismiss,
    Ping,
    Info,
}

/// Status reported back by a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Displayed,
    UserCancel,
    Error,
    Pong,
}

/// Command payload written by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyCommand {
    #[serde(rename = "type")]
    pub command: CommandType,

    /// Seconds until hibernation, for warning commands.
    #[serde(rename = "timeRemaining", skip_serializing_if = "Option::is_none", default)]
    pub time_remaining: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,

    pub timestamp: DateTime<Utc>,
}

/// Response payload written by a relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub status: ResponseStatus,

    #[serde(rename = "sessionId")]
    pub session_id: u32,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl NotifyCommand {
    pub fn warning(reason: &str, time_remaining: Duration) -> Self {
        Self {
            command: CommandType::Warning,
            time_remaining: Some(time_remaining.as_secs()),
            reason: Some(reason.to_string()),
            message: Some(format_warning_message(reason, time_remaining)),
            timestamp: Utc::now(),
        }
    }

    pub fn cancel() -> Self {
        Self {
            command: CommandType::Cancel,
            time_remaining: None,
            reason: None,
            message: Some(format_cancellation_message().to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn dismiss() -> Self {
        Self {
            command: CommandType::Dismiss,
            time_remaining: None,
            reason: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn ping() -> Self {
        Self {
            command: CommandType::Ping,
            time_remaining: None,
            reason: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: &str) -> Self {
        Self {
            command: CommandType::Info,
            time_remaining: None,
            reason: None,
            message: Some(message.to_string()),
            timestamp: Utc::now(),
        }
    }
}

impl NotifyResponse {
    pub fn new(status: ResponseStatus, session_id: u32) -> Self {
        Self {
            status,
            session_id,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(session_id: u32, error: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            session_id,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Directory holding the per-session notification sockets.
pub fn socket_dir() -> PathBuf {
    env::var_os(RUNTIME_DIR_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_RUNTIME_DIR), PathBuf::from)
}

/// Socket path for a given session.
///
/// Derived from the session id so concurrent sessions never collide.
pub fn socket_path(session_id: u32) -> PathBuf {
    socket_dir().join(format!("notify-{session_id}.sock"))
}

/// Build the body text of a hibernation warning.
pub fn format_warning_message(reason: &str, time_remaining: Duration) -> String {
    format!(
        "This VM will hibernate in {}.\n\n{}\n\nMove your mouse or press a key to cancel.",
        format_time_remaining(time_remaining),
        reason
    )
}

/// Body text of the cancellation notice.
pub fn format_cancellation_message() -> &'static str {
    "Hibernation canceled due to user activity."
}

/// Format a countdown into a friendly string rounded to the nearest
/// 30 seconds.
pub fn format_time_remaining(d: Duration) -> String {
    let total_seconds = d.as_secs();

    if total_seconds == 0 {
        return "immediately".to_string();
    }

    let rounded = ((total_seconds + 15) / 30) * 30;
    if rounded < 30 {
        return "less than 30 seconds".to_string();
    }

    let minutes = rounded / 60;
    let seconds = rounded % 60;

    if minutes > 0 && seconds > 0 {
        let min_word = if minutes > 1 { "minutes" } else { "minute" };
        format!("{minutes} {min_word} {seconds} seconds")
    } else if minutes > 0 {
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        }
    } else {
        "30 seconds".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time_remaining_rounding() {
        let cases: &[(u64, &str)] = &[
            (0, "immediately"),
            (10, "less than 30 seconds"),
            (15, "30 seconds"),
            (29, "30 seconds"),
            (30, "30 seconds"),
            (44, "30 seconds"),
            (45, "1 minute"),
            (60, "1 minute"),
            (89, "1 minute 30 seconds"),
            (90, "1 minute 30 seconds"),
            (120, "2 minutes"),
            (150, "2 minutes 30 seconds"),
            (300, "5 minutes"),
        ];

        for (secs, want) in cases {
            assert_eq!(
                format_time_remaining(Duration::from_secs(*secs)),
                *want,
                "for {secs}s"
            );
        }
    }

    #[test]
    fn test_format_warning_message_structure() {
        let msg = format_warning_message("No activity detected", Duration::from_secs(300));
        assert!(msg.contains("hibernate in 5 minutes"));
        assert!(msg.contains("No activity detected"));
        assert!(msg.contains("Move your mouse or press a key"));
    }

    #[test]
    fn test_socket_path_is_per_session() {
        let a = socket_path(3);
        let b = socket_path(4);
        assert_ne!(a, b);
        assert!(a.to_string_lossy().ends_with("notify-3.sock"));
    }

    #[test]
    fn test_command_wire_shape() {
        let cmd = NotifyCommand::warning("Idle too long", Duration::from_secs(120));
        let json = serde_json::to_string(&cmd).unwrap();

        assert!(json.contains(r#""type":"warning""#));
        assert!(json.contains(r#""timeRemaining":120"#));
        assert!(json.contains(r#""reason":"Idle too long""#));
        assert!(json.contains(r#""timestamp""#));

        let parsed: NotifyCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.command, CommandType::Warning);
        assert_eq!(parsed.time_remaining, Some(120));
    }

    #[test]
    fn test_command_omits_empty_fields() {
        let json = serde_json::to_string(&NotifyCommand::ping()).unwrap();
        assert!(!json.contains("timeRemaining"));
        assert!(!json.contains("reason"));
        assert!(!json.contains("message"));
    }

    #[test]
    fn test_response_wire_shape() {
        let json =
            serde_json::to_string(&NotifyResponse::new(ResponseStatus::UserCancel, 7)).unwrap();
        assert!(json.contains(r#""status":"user_cancel""#));
        assert!(json.contains(r#""sessionId":7"#));
        assert!(!json.contains("error"));

        let err = serde_json::to_string(&NotifyResponse::error(7, "toast failed")).unwrap();
        assert!(err.contains(r#""status":"error""#));
        assert!(err.contains(r#""error":"toast failed""#));
    }
}
