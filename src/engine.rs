//! Idle decision engine.
//!
//! Evaluates a session snapshot against three independently-timed idle
//! conditions (no users, all disconnected, inactive user) and drives the
//! warning state machine that gates hibernation.

use crate::config::Config;
use crate::session::SessionEntry;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Input within this window of an evaluation counts as recent activity and
/// cancels an active hibernation warning.
const RECENT_ACTIVITY_THRESHOLD: Duration = Duration::from_secs(30);

/// The idle condition that triggered, if any.
///
/// Conditions are evaluated in declaration order and earlier conditions
/// suppress later ones, so at most one is active per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdleCondition {
    #[default]
    None,
    NoUsers,
    AllDisconnected,
    InactiveUser,
}

impl IdleCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::NoUsers => "no-users",
            Self::AllDisconnected => "all-disconnected",
            Self::InactiveUser => "inactive-user",
        }
    }
}

/// Warning state machine.
///
/// `Active` always carries an issue timestamp and reason in the engine
/// state. `Canceled` is transient: cancellation clears straight back to
/// `None` within the same evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarningState {
    #[default]
    None,
    Active,
    Canceled,
}

/// Outcome of one evaluation cycle.
#[derive(Debug, Clone, Default)]
pub struct CheckResult {
    pub condition: IdleCondition,
    pub should_warn: bool,
    pub should_hibernate: bool,
    pub reason: String,
    pub time_remaining: Duration,
}

#[derive(Debug, Clone, PartialEq)]
struct EngineState {
    no_users_since: Option<Instant>,
    all_disconnected_since: Option<Instant>,
    last_activity: Instant,
    current_sessions: Vec<SessionEntry>,
    idle_condition: IdleCondition,
    warning_issued_at: Option<Instant>,
    warning_reason: String,
    warning_state: WarningState,
}

impl EngineState {
    fn new(now: Instant) -> Self {
        Self {
            no_users_since: None,
            all_disconnected_since: None,
            last_activity: now,
            current_sessions: Vec::new(),
            idle_condition: IdleCondition::None,
            warning_issued_at: None,
            warning_reason: String::new(),
            warning_state: WarningState::None,
        }
    }
}

/// Finite-state evaluator over idle conditions.
///
/// Owns its condition timers across calls; everything else about
/// `evaluate` is a pure function of the snapshot and clock it is handed.
pub struct IdleEngine {
    state: EngineState,
    no_users_threshold: Duration,
    all_disconnected_threshold: Duration,
    inactive_user_threshold: Duration,
    warning_period: Duration,
    minimum_uptime_threshold: Duration,
    resume_at: Instant,
}

impl IdleEngine {
    pub fn from_config(config: &Config, now: Instant) -> Self {
        Self {
            state: EngineState::new(now),
            no_users_threshold: config.no_users_threshold(),
            all_disconnected_threshold: config.all_disconnected_threshold(),
            inactive_user_threshold: config.inactive_user_threshold(),
            warning_period: config.warning_period(),
            minimum_uptime_threshold: config.minimum_uptime(),
            resume_at: now,
        }
    }

    /// Record a resume-from-suspend event.
    ///
    /// Participates in the minimum-uptime gate so a freshly resumed machine
    /// is not immediately re-hibernated.
    pub fn set_resume_time(&mut self, now: Instant) {
        self.resume_at = now;
    }

    pub fn warning_state(&self) -> WarningState {
        self.state.warning_state
    }

    pub fn idle_condition(&self) -> IdleCondition {
        self.state.idle_condition
    }

    /// Evaluate all idle conditions against a fresh session snapshot.
    pub fn evaluate(
        &mut self,
        sessions: &[SessionEntry],
        uptime: Option<Duration>,
        now: Instant,
    ) -> CheckResult {
        self.state.current_sessions = sessions.to_vec();

        debug!("Session check: {} session(s) found", sessions.len());
        for session in sessions {
            debug!(
                "  Session {}: user={}, connected={}, idle={:?}",
                session.session_id, session.username, session.connected, session.idle
            );
        }

        // Minimum-uptime gate: suppress every check until the machine has
        // been up (and awake) long enough. The boundary is inclusive.
        if self.minimum_uptime_threshold > Duration::ZERO {
            if let Some(system_uptime) = uptime {
                let since_resume = now.duration_since(self.resume_at);
                let effective = system_uptime.min(since_resume);

                if effective <= self.minimum_uptime_threshold {
                    let remaining = self.minimum_uptime_threshold - effective;
                    debug!(
                        "Effective uptime {:?} has not exceeded minimum {:?} (remaining {:?}), skipping idle checks",
                        effective, self.minimum_uptime_threshold, remaining
                    );
                    return CheckResult {
                        time_remaining: remaining,
                        ..CheckResult::default()
                    };
                }
                debug!(
                    "Effective uptime {:?} (system {:?}, since resume {:?})",
                    effective, system_uptime, since_resume
                );
            } else {
                debug!("System uptime unavailable, skipping minimum-uptime gate");
            }
        }

        let has_users = !sessions.is_empty();
        let all_disconnected = sessions.iter().all(SessionEntry::is_disconnected);

        debug!(
            "Session summary: has_users={}, all_disconnected={}",
            has_users, all_disconnected
        );

        if self.should_cancel_warning(sessions, has_users, all_disconnected) {
            info!("User activity detected, canceling hibernation warning");
            self.state.warning_state = WarningState::Canceled;
            self.reset_warning();
        }

        let mut condition = IdleCondition::None;
        let mut reason = String::new();

        // Condition 1: no users logged in for the threshold duration.
        if self.no_users_threshold > Duration::ZERO {
            if has_users {
                self.state.no_users_since = None;
            } else if let Some(since) = self.state.no_users_since {
                let idle_for = now.duration_since(since);
                if idle_for >= self.no_users_threshold {
                    condition = IdleCondition::NoUsers;
                    reason = format!(
                        "No users logged in for over {} minutes",
                        self.no_users_threshold.as_secs() / 60
                    );
                    debug!("Idle threshold met: {}", reason);
                } else {
                    info!(
                        "No users logged in for {:?} (threshold {:?})",
                        idle_for, self.no_users_threshold
                    );
                }
            } else {
                self.state.no_users_since = Some(now);
                info!("No users logged in, starting idle timer");
            }
        }

        // Condition 2: every session disconnected for the threshold duration.
        if self.all_disconnected_threshold > Duration::ZERO {
            if condition == IdleCondition::None && has_users && all_disconnected {
                if let Some(since) = self.state.all_disconnected_since {
                    let idle_for = now.duration_since(since);
                    if idle_for >= self.all_disconnected_threshold {
                        condition = IdleCondition::AllDisconnected;
                        reason = format!(
                            "All users disconnected for over {} minutes",
                            self.all_disconnected_threshold.as_secs() / 60
                        );
                        debug!("Idle threshold met: {}", reason);
                    } else {
                        info!(
                            "All users disconnected for {:?} (threshold {:?})",
                            idle_for, self.all_disconnected_threshold
                        );
                    }
                } else {
                    self.state.all_disconnected_since = Some(now);
                    info!("All users disconnected, starting idle timer");
                }
            } else if !all_disconnected {
                if self.state.all_disconnected_since.is_some() {
                    debug!("User reconnected, clearing all-disconnected timer");
                }
                self.state.all_disconnected_since = None;
            } else if condition != IdleCondition::None {
                debug!(
                    "Skipping all-disconnected check: condition already {}",
                    condition.as_str()
                );
            }
        }

        // Condition 3: connected users present but none of them active.
        // The minimum idle time across connected sessions governs, so the
        // most recently active session wins.
        let has_connected = has_users && !all_disconnected;
        if self.inactive_user_threshold > Duration::ZERO
            && condition == IdleCondition::None
            && has_connected
        {
            let mut min_idle: Option<Duration> = None;
            for session in sessions.iter().filter(|s| s.connected) {
                let Some(idle) = session.idle else {
                    debug!(
                        "No idle information for session {} ({})",
                        session.session_id, session.username
                    );
                    continue;
                };
                debug!(
                    "Session {} ({}): idle for {:?}",
                    session.session_id, session.username, idle
                );
                min_idle = Some(min_idle.map_or(idle, |m| m.min(idle)));
            }

            if let Some(min_idle) = min_idle {
                self.state.last_activity = now.checked_sub(min_idle).unwrap_or(now);
                debug!(
                    "User input activity: idle for {:?} (threshold {:?})",
                    min_idle, self.inactive_user_threshold
                );

                if min_idle >= self.inactive_user_threshold {
                    condition = IdleCondition::InactiveUser;
                    reason = format!(
                        "No activity detected for over {} minutes",
                        self.inactive_user_threshold.as_secs() / 60
                    );
                    debug!("Idle condition met: {}", reason);
                } else {
                    info!(
                        "User idle for {:?} (threshold {:?})",
                        min_idle, self.inactive_user_threshold
                    );
                }
            } else {
                debug!("No connected sessions with idle information");
            }
        }

        if condition == IdleCondition::None {
            // Active -> None: the underlying idle condition cleared.
            if self.state.warning_issued_at.is_some() {
                info!("Idle condition no longer met, resetting warning state");
                self.reset_warning();
            }
            return CheckResult::default();
        }

        self.state.idle_condition = condition;
        debug!("Idle condition triggered: {} ({})", reason, condition.as_str());

        // Only an inactive user gets a warning countdown; an empty or fully
        // disconnected machine has no one to warn and hibernates at once.
        if condition == IdleCondition::InactiveUser && self.warning_period > Duration::ZERO {
            if let Some(issued_at) = self.state.warning_issued_at {
                let warned_for = now.duration_since(issued_at);
                debug!(
                    "Warning period elapsed: {:?} / {:?}",
                    warned_for, self.warning_period
                );

                if warned_for >= self.warning_period {
                    debug!("Warning period expired, proceeding with hibernation");
                    CheckResult {
                        condition,
                        should_hibernate: true,
                        reason,
                        ..CheckResult::default()
                    }
                } else {
                    let remaining = self.warning_period - warned_for;
                    debug!("Still in warning period, {:?} remaining", remaining);
                    CheckResult {
                        condition,
                        should_warn: true,
                        reason,
                        time_remaining: remaining,
                        ..CheckResult::default()
                    }
                }
            } else {
                // None -> Active.
                debug!("Starting warning period ({:?})", self.warning_period);
                self.state.warning_issued_at = Some(now);
                self.state.warning_reason = reason.clone();
                self.state.warning_state = WarningState::Active;
                CheckResult {
                    condition,
                    should_warn: true,
                    reason,
                    time_remaining: self.warning_period,
                    ..CheckResult::default()
                }
            }
        } else {
            debug!(
                "No connected users to warn, hibernating immediately ({})",
                condition.as_str()
            );
            CheckResult {
                condition,
                should_hibernate: true,
                reason,
                ..CheckResult::default()
            }
        }
    }

    /// Whether current system state should cancel an active warning.
    fn should_cancel_warning(
        &self,
        sessions: &[SessionEntry],
        has_users: bool,
        all_disconnected: bool,
    ) -> bool {
        if self.state.warning_state != WarningState::Active {
            return false;
        }

        match self.state.idle_condition {
            IdleCondition::NoUsers => {
                // No-users normally hibernates without warning, but handle a
                // login during a warning anyway.
                if has_users {
                    debug!("Users logged in after warning was issued");
                    return true;
                }
                false
            }
            IdleCondition::AllDisconnected => {
                if !all_disconnected {
                    debug!("User reconnected after warning was issued");
                    return true;
                }
                false
            }
            IdleCondition::InactiveUser => {
                if has_users && !all_disconnected {
                    for session in sessions.iter().filter(|s| s.connected) {
                        let Some(idle) = session.idle else { continue };
                        if idle < RECENT_ACTIVITY_THRESHOLD {
                            debug!(
                                "Recent activity detected in session {} (idle {:?}), canceling warning",
                                session.session_id, idle
                            );
                            return true;
                        }
                    }
                }
                false
            }
            IdleCondition::None => false,
        }
    }

    /// Clear warning state and condition timers, keeping activity tracking.
    fn reset_warning(&mut self) {
        self.state.idle_condition = IdleCondition::None;
        self.state.warning_issued_at = None;
        self.state.warning_reason.clear();
        self.state.warning_state = WarningState::None;
        self.state.no_users_since = None;
        self.state.all_disconnected_since = None;
    }

    /// Fully reset the engine.
    ///
    /// Invoked around hibernation so resumed execution starts clean instead
    /// of instantly re-triggering on stale timers.
    pub fn reset(&mut self, now: Instant) {
        self.reset_warning();
        self.state.last_activity = now;
        self.state.current_sessions.clear();
    }

    /// Minimum time until any running condition timer reaches its threshold,
    /// clamped to zero. Zero when no timer is running; the caller falls back
    /// to a default poll interval.
    pub fn time_until_next_threshold(&self, now: Instant) -> Duration {
        let mut min_until: Option<Duration> = None;

        let mut consider = |until: Duration| {
            min_until = Some(min_until.map_or(until, |m| m.min(until)));
        };

        if self.no_users_threshold > Duration::ZERO
            && let Some(since) = self.state.no_users_since
        {
            consider(
                self.no_users_threshold
                    .saturating_sub(now.duration_since(since)),
            );
        }

        if self.all_disconnected_threshold > Duration::ZERO
            && let Some(since) = self.state.all_disconnected_since
        {
            consider(
                self.all_disconnected_threshold
                    .saturating_sub(now.duration_since(since)),
            );
        }

        if self.inactive_user_threshold > Duration::ZERO {
            let min_idle = self
                .state
                .current_sessions
                .iter()
                .filter(|s| s.connected)
                .filter_map(|s| s.idle)
                .min();
            if let Some(min_idle) = min_idle {
                consider(self.inactive_user_threshold.saturating_sub(min_idle));
            }
        }

        min_until.unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(60);

    fn engine(
        no_users: u64,
        all_disconnected: u64,
        inactive: u64,
        warning: u64,
        min_uptime: u64,
        now: Instant,
    ) -> IdleEngine {
        let config = Config {
            no_users_idle_minutes: no_users,
            all_disconnected_idle_minutes: all_disconnected,
            inactive_user_idle_minutes: inactive,
            inactive_user_warning_minutes: warning,
            minimum_uptime_minutes: min_uptime,
            ..Config::default()
        };
        IdleEngine::from_config(&config, now)
    }

    fn connected(session_id: u32, idle: Duration) -> SessionEntry {
        SessionEntry {
            session_id,
            uid: 1000 + session_id,
            username: format!("user{session_id}"),
            connected: true,
            idle: Some(idle),
        }
    }

    fn disconnected(session_id: u32) -> SessionEntry {
        SessionEntry {
            session_id,
            uid: 1000 + session_id,
            username: format!("user{session_id}"),
            connected: false,
            idle: None,
        }
    }

    /// A base instant far enough from process start that subtracting idle
    /// durations can't underflow.
    fn base() -> Instant {
        Instant::now() + Duration::from_secs(24 * 3600)
    }

    #[test]
    fn test_no_users_immediate_hibernate() {
        let t0 = base();
        let mut engine = engine(15, 0, 0, 5, 0, t0);

        // First cycle starts the timer, nothing triggers.
        let result = engine.evaluate(&[], None, t0);
        assert_eq!(result.condition, IdleCondition::None);
        assert!(!result.should_warn);
        assert!(!result.should_hibernate);

        // Below threshold.
        let result = engine.evaluate(&[], None, t0 + 14 * MIN);
        assert!(!result.should_hibernate);

        // At threshold: hibernate with no warning ever issued.
        let result = engine.evaluate(&[], None, t0 + 15 * MIN);
        assert_eq!(result.condition, IdleCondition::NoUsers);
        assert!(result.should_hibernate);
        assert!(!result.should_warn);
        assert_eq!(engine.warning_state(), WarningState::None);
    }

    #[test]
    fn test_no_users_timer_clears_on_login() {
        let t0 = base();
        let mut engine = engine(15, 0, 0, 0, 0, t0);

        engine.evaluate(&[], None, t0);
        assert!(engine.time_until_next_threshold(t0) > Duration::ZERO);

        // A user logs in; the timer must clear immediately.
        engine.evaluate(&[connected(2, Duration::ZERO)], None, t0 + MIN);
        assert_eq!(engine.time_until_next_threshold(t0 + MIN), Duration::ZERO);
    }

    #[test]
    fn test_priority_no_users_suppresses_inactive_user() {
        let t0 = base();
        let mut engine = engine(1, 0, 1, 0, 0, t0);

        engine.evaluate(&[], None, t0);
        let result = engine.evaluate(&[], None, t0 + MIN);
        assert_eq!(result.condition, IdleCondition::NoUsers);
        // The inactive-user path never ran: no session data was cached, so
        // only the no-users timer feeds the scheduler.
        assert_eq!(engine.time_until_next_threshold(t0 + MIN), Duration::ZERO);
        assert_eq!(engine.state.last_activity, t0);
    }

    #[test]
    fn test_all_disconnected_hibernates_without_warning() {
        let t0 = base();
        let mut engine = engine(0, 30, 120, 0, 0, t0);

        // Disconnected sessions with no idle info: only the all-disconnected
        // condition can apply.
        let sessions = vec![disconnected(2), disconnected(3)];
        engine.evaluate(&sessions, None, t0);
        let result = engine.evaluate(&sessions, None, t0 + 30 * MIN);
        assert_eq!(result.condition, IdleCondition::AllDisconnected);
        assert!(result.should_hibernate);
        assert!(!result.should_warn);
    }

    #[test]
    fn test_all_disconnected_timer_clears_on_reconnect() {
        let t0 = base();
        let mut engine = engine(0, 30, 0, 0, 0, t0);

        engine.evaluate(&[disconnected(2)], None, t0);
        assert_eq!(engine.time_until_next_threshold(t0), 30 * MIN);

        // Reconnect clears the timer; going away again restarts from scratch.
        engine.evaluate(&[connected(2, Duration::ZERO)], None, t0 + 10 * MIN);
        assert_eq!(
            engine.time_until_next_threshold(t0 + 10 * MIN),
            Duration::ZERO
        );

        engine.evaluate(&[disconnected(2)], None, t0 + 20 * MIN);
        let result = engine.evaluate(&[disconnected(2)], None, t0 + 40 * MIN);
        assert_eq!(result.condition, IdleCondition::None);
    }

    #[test]
    fn test_minimum_idle_governs() {
        let t0 = base();
        let mut engine = engine(0, 0, 5, 0, 0, t0);

        let sessions = vec![
            connected(2, Duration::from_secs(2 * 60)),
            connected(3, Duration::from_secs(10 * 60)),
        ];
        let result = engine.evaluate(&sessions, None, t0);
        assert_eq!(result.condition, IdleCondition::None);
        assert!(!result.should_hibernate);
        assert_eq!(engine.state.last_activity, t0 - Duration::from_secs(2 * 60));
    }

    #[test]
    fn test_inactive_user_zero_warning_hibernates_immediately() {
        let t0 = base();
        let mut engine = engine(0, 0, 30, 0, 0, t0);

        let result = engine.evaluate(&[connected(2, Duration::from_secs(30 * 60))], None, t0);
        assert_eq!(result.condition, IdleCondition::InactiveUser);
        assert!(result.should_hibernate);
        assert!(!result.should_warn);
    }

    #[test]
    fn test_warning_boundary() {
        let t0 = base();
        let mut engine = engine(0, 0, 30, 5, 0, t0);
        let idle_sessions = vec![connected(2, Duration::from_secs(35 * 60))];

        // First detection: full warning period remains.
        let result = engine.evaluate(&idle_sessions, None, t0);
        assert!(result.should_warn);
        assert_eq!(result.time_remaining, 5 * MIN);
        assert_eq!(engine.warning_state(), WarningState::Active);

        // 4:59 elapsed: still warning.
        let result = engine.evaluate(&idle_sessions, None, t0 + 5 * MIN - Duration::from_secs(1));
        assert!(result.should_warn);
        assert!(!result.should_hibernate);
        assert_eq!(result.time_remaining, Duration::from_secs(1));

        // Exactly 5:00: hibernate.
        let result = engine.evaluate(&idle_sessions, None, t0 + 5 * MIN);
        assert!(result.should_hibernate);
        assert!(!result.should_warn);
        assert_eq!(result.condition, IdleCondition::InactiveUser);
    }

    #[test]
    fn test_warning_canceled_by_recent_activity() {
        let t0 = base();
        let mut engine = engine(0, 0, 30, 5, 0, t0);

        engine.evaluate(&[connected(2, Duration::from_secs(30 * 60))], None, t0);
        assert_eq!(engine.warning_state(), WarningState::Active);

        // Ten seconds of idle is under the 30s activity threshold.
        let result = engine.evaluate(&[connected(2, Duration::from_secs(10))], None, t0 + MIN);
        assert_eq!(engine.warning_state(), WarningState::None);
        assert_eq!(result.condition, IdleCondition::None);
        assert!(!result.should_warn);
        assert!(!result.should_hibernate);
        assert_eq!(engine.idle_condition(), IdleCondition::None);

        // A later idle stretch starts a fresh warning with the full period.
        let result = engine.evaluate(
            &[connected(2, Duration::from_secs(31 * 60))],
            None,
            t0 + 40 * MIN,
        );
        assert!(result.should_warn);
        assert_eq!(result.time_remaining, 5 * MIN);
    }

    #[test]
    fn test_warning_canceled_by_reconnect() {
        let t0 = base();
        let mut engine = engine(0, 10, 0, 5, 0, t0);

        engine.evaluate(&[disconnected(2)], None, t0);
        // All-disconnected hibernates without warning, so force the FSM into
        // Active to exercise the reconnect branch.
        engine.state.warning_state = WarningState::Active;
        engine.state.idle_condition = IdleCondition::AllDisconnected;
        engine.state.warning_issued_at = Some(t0);

        engine.evaluate(&[connected(2, Duration::from_secs(5))], None, t0 + MIN);
        assert_eq!(engine.warning_state(), WarningState::None);
        assert!(engine.state.all_disconnected_since.is_none());
    }

    #[test]
    fn test_warning_reset_when_condition_clears() {
        let t0 = base();
        let mut engine = engine(30, 0, 30, 5, 0, t0);

        engine.evaluate(&[connected(2, Duration::from_secs(30 * 60))], None, t0);
        assert_eq!(engine.warning_state(), WarningState::Active);

        // User logs out entirely: inactive-user no longer holds and the
        // activity branch of the cancellation check doesn't apply either.
        let result = engine.evaluate(&[], None, t0 + MIN);
        assert_eq!(result.condition, IdleCondition::None);
        assert_eq!(engine.warning_state(), WarningState::None);
        assert!(engine.state.warning_issued_at.is_none());
    }

    #[test]
    fn test_minimum_uptime_boundary_inclusive() {
        let t0 = base();
        let mut engine = engine(15, 0, 0, 0, 10, t0);

        // Exactly at the threshold: still suppressed.
        let result = engine.evaluate(&[], Some(10 * MIN), t0 + 10 * MIN);
        assert_eq!(result.condition, IdleCondition::None);
        assert_eq!(result.time_remaining, Duration::ZERO);
        assert_eq!(engine.time_until_next_threshold(t0 + 10 * MIN), Duration::ZERO);

        // One second past: checks run and the no-users timer starts.
        let t1 = t0 + 10 * MIN + Duration::from_secs(1);
        engine.evaluate(&[], Some(10 * MIN + Duration::from_secs(1)), t1);
        assert_eq!(engine.time_until_next_threshold(t1), 15 * MIN);
    }

    #[test]
    fn test_minimum_uptime_reports_time_remaining() {
        let t0 = base();
        let mut engine = engine(15, 0, 0, 0, 10, t0);

        let result = engine.evaluate(&[], Some(4 * MIN), t0 + 4 * MIN);
        assert_eq!(result.time_remaining, 6 * MIN);
        assert!(!result.should_warn);
        assert!(!result.should_hibernate);
    }

    #[test]
    fn test_effective_uptime_uses_resume_time() {
        let t0 = base();
        let mut engine = engine(15, 0, 0, 0, 10, t0);

        // Booted ages ago, but resumed five minutes ago: gate stays closed.
        engine.set_resume_time(t0);
        let result = engine.evaluate(&[], Some(100 * 60 * MIN), t0 + 5 * MIN);
        assert_eq!(result.condition, IdleCondition::None);
        assert_eq!(result.time_remaining, 5 * MIN);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let t0 = base();
        let mut engine = engine(15, 30, 30, 5, 0, t0);

        engine.evaluate(&[connected(2, Duration::from_secs(30 * 60))], None, t0);
        assert_eq!(engine.warning_state(), WarningState::Active);

        let t1 = t0 + MIN;
        engine.reset(t1);
        let after_first = engine.state.clone();
        engine.reset(t1);
        assert_eq!(engine.state, after_first);
        assert_eq!(engine.warning_state(), WarningState::None);
        assert_eq!(engine.time_until_next_threshold(t1), Duration::ZERO);
    }

    #[test]
    fn test_sessions_without_idle_info_are_skipped() {
        let t0 = base();
        let mut engine = engine(0, 0, 5, 0, 0, t0);

        let mut no_idle = connected(2, Duration::ZERO);
        no_idle.idle = None;

        // Only the session with idle data counts toward the minimum.
        let sessions = vec![no_idle, connected(3, Duration::from_secs(6 * 60))];
        let result = engine.evaluate(&sessions, None, t0);
        assert_eq!(result.condition, IdleCondition::InactiveUser);
        assert!(result.should_hibernate);
    }

    #[test]
    fn test_time_until_next_threshold() {
        let t0 = base();
        let mut engine = engine(30, 60, 0, 5, 0, t0);

        // Nothing running.
        assert_eq!(engine.time_until_next_threshold(t0), Duration::ZERO);

        // No-users timer running for 10 of 30 minutes.
        engine.evaluate(&[], None, t0);
        assert_eq!(engine.time_until_next_threshold(t0 + 10 * MIN), 20 * MIN);

        // Already exceeded clamps to zero.
        assert_eq!(engine.time_until_next_threshold(t0 + 35 * MIN), Duration::ZERO);
    }

    #[test]
    fn test_time_until_next_threshold_uses_session_idle() {
        let t0 = base();
        let mut engine = engine(0, 0, 5, 0, 0, t0);

        engine.evaluate(&[connected(2, Duration::from_secs(2 * 60))], None, t0);
        assert_eq!(engine.time_until_next_threshold(t0), 3 * MIN);
    }

    #[test]
    fn test_time_until_next_threshold_returns_minimum() {
        let t0 = base();
        let mut engine = engine(30, 60, 0, 5, 0, t0);

        engine.state.no_users_since = Some(t0 - 20 * MIN);
        engine.state.all_disconnected_since = Some(t0 - 55 * MIN);
        assert_eq!(engine.time_until_next_threshold(t0), 5 * MIN);
    }
}
