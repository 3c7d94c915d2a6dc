//! User session snapshot sources.
//!
//! This module provides a generic abstraction for enumerating interactive
//! user sessions and their input-idle state, independent of the session
//! manager backing them.

mod logind;

use async_trait::async_trait;
pub use logind::{LogindSource, watch_resume};
use std::time::Duration;
use thiserror::Error;

/// A single user session as seen at one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    /// Numeric session identifier.
    pub session_id: u32,

    /// Uid of the session owner; relay processes run under this identity.
    pub uid: u32,

    /// Display username of the session owner.
    pub username: String,

    /// Whether the session currently has an attached display/connection.
    pub connected: bool,

    /// Time since last input in this session, when the backend can tell.
    pub idle: Option<Duration>,
}

impl SessionEntry {
    pub fn is_disconnected(&self) -> bool {
        !self.connected
    }
}

/// Trait for session snapshot sources.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Enumerate current user sessions.
    ///
    /// Entries whose idle state cannot be queried carry `idle: None` and are
    /// skipped by activity-based checks; a failure for one session must not
    /// drop the others.
    async fn list_sessions(&self) -> Result<Vec<SessionEntry>, SessionError>;

    /// Input-idle duration for a single session.
    async fn session_idle(&self, session_id: u32) -> Result<Duration, SessionError>;

    /// Time since the machine booted.
    async fn system_uptime(&self) -> Result<Duration, SessionError>;
}

/// Errors that can occur when querying sessions.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("DBus connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Session {0} not found")]
    NotFound(u32),

    #[error("Session query failed: {0}")]
    QueryFailed(String),

    #[error("Uptime unavailable: {0}")]
    UptimeUnavailable(String),
}
