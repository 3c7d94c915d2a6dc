//! Warning notification throttling.
//!
//! The warning countdown is re-evaluated every few seconds, but users should
//! not be toasted on every cycle: repeat warnings are limited to one per
//! throttle window across the whole evaluation stream.

use std::time::{Duration, Instant};
use tracing::debug;

/// Minimum time between warning notification deliveries.
pub const WARNING_THROTTLE: Duration = Duration::from_secs(30);

/// Decision from the throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Deliver the notification.
    Send,
    /// Skip this cycle (a warning is already in flight within the window).
    Skip,
}

/// Warning throttle state machine.
#[derive(Debug)]
pub struct WarningThrottle {
    /// When the last warning was delivered.
    last_sent: Option<Instant>,

    /// Minimum interval between deliveries.
    min_interval: Duration,
}

impl WarningThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_sent: None,
            min_interval,
        }
    }

    /// Check whether a warning should be delivered now.
    pub fn should_send(&self, now: Instant) -> ThrottleDecision {
        let Some(last_sent) = self.last_sent else {
            debug!("First warning in this stream, sending");
            return ThrottleDecision::Send;
        };

        let elapsed = now.duration_since(last_sent);
        if elapsed >= self.min_interval {
            debug!(
                "Last warning {:?} ago >= window {:?}, sending",
                elapsed, self.min_interval
            );
            ThrottleDecision::Send
        } else {
            debug!(
                "Throttled: last warning {:?} ago < window {:?}",
                elapsed, self.min_interval
            );
            ThrottleDecision::Skip
        }
    }

    /// Record that a warning was delivered.
    pub fn record_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Forget delivery history.
    ///
    /// Called when warning mode exits so the next warning stream starts with
    /// an immediate delivery.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

impl Default for WarningThrottle {
    fn default() -> Self {
        Self::new(WARNING_THROTTLE)
    }
}
