//! Monitor loop orchestration.
//!
//! Drives the idle engine at a dynamically computed interval, maps its
//! decisions onto the notification channel and the hibernate action, and
//! reacts to resume and shutdown events.

use crate::config::Config;
use crate::engine::{CheckResult, IdleEngine};
use crate::hibernate::HibernateAction;
use crate::relay::NotifyChannel;
use crate::session::{SessionEntry, SessionSource};
use anyhow::Result;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Polling interval while a warning countdown is running, so cancellation is
/// detected quickly.
const WARNING_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Floor for the dynamic check interval.
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Fallback interval when no threshold is configured at all.
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Pause after a recovered panic so a persistent fault can't spin the loop.
const PANIC_COOLDOWN: Duration = Duration::from_secs(5);

/// Time allowed for stragglers before relays are torn down on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// The monitoring daemon.
pub struct Daemon<S, N, H> {
    config: Config,
    engine: IdleEngine,
    source: S,
    channel: N,
    hibernate: H,
}

impl<S, N, H> Daemon<S, N, H>
where
    S: SessionSource,
    N: NotifyChannel,
    H: HibernateAction,
{
    pub fn new(config: Config, source: S, channel: N, hibernate: H) -> Self {
        let engine = IdleEngine::from_config(&config, Instant::now());
        Self {
            config,
            engine,
            source,
            channel,
            hibernate,
        }
    }

    /// Run the monitor loop until the shutdown token fires.
    ///
    /// Resume-from-suspend events arrive on `resume_rx` and mutate engine
    /// state from this task only.
    pub async fn run(
        mut self,
        shutdown: CancellationToken,
        mut resume_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        info!("Monitor loop started with dynamic polling");
        info!(
            "Idle thresholds: no_users={}m, all_disconnected={}m, inactive_user={}m, warning={}m, minimum_uptime={}m",
            self.config.no_users_idle_minutes,
            self.config.all_disconnected_idle_minutes,
            self.config.inactive_user_idle_minutes,
            self.config.inactive_user_warning_minutes,
            self.config.minimum_uptime_minutes,
        );

        let mut in_warning_mode = false;
        let mut resume_open = true;

        loop {
            // Crash barrier: a fault in one cycle is logged and survived.
            let cycle = AssertUnwindSafe(self.run_cycle(&mut in_warning_mode)).catch_unwind();
            if let Err(panic) = cycle.await {
                error!("Panic recovered in monitor loop: {}", panic_message(&panic));
                tokio::select! {
                    () = tokio::time::sleep(PANIC_COOLDOWN) => {}
                    () = shutdown.cancelled() => break,
                }
            }

            // If hibernation was triggered, the whole OS suspends with us;
            // on resume, execution continues right here.
            let next_check = self.next_check_interval(in_warning_mode, Instant::now());
            debug!("Next check in {:?}", next_check);

            tokio::select! {
                () = tokio::time::sleep(next_check) => {}
                event = resume_rx.recv(), if resume_open => {
                    match event {
                        Some(()) => {
                            info!("System resumed from suspend");
                            self.engine.set_resume_time(Instant::now());
                        }
                        None => resume_open = false,
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }

        info!("Monitor loop stopping");
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        self.channel.shutdown().await;
        Ok(())
    }

    /// Evaluate a single cycle without notifying or hibernating.
    pub async fn check_once(&mut self) -> Result<CheckResult> {
        let sessions = self.source.list_sessions().await?;
        let uptime = self.source.system_uptime().await.ok();
        Ok(self.engine.evaluate(&sessions, uptime, Instant::now()))
    }

    /// One monitor check plus warning-mode bookkeeping.
    async fn run_cycle(&mut self, in_warning_mode: &mut bool) {
        let (should_warn, is_hibernating, sessions) = self.check_and_hibernate().await;

        if should_warn && !*in_warning_mode {
            *in_warning_mode = true;
            debug!(
                "Entering warning mode, increasing check frequency to {:?}",
                WARNING_CHECK_INTERVAL
            );
        } else if !should_warn && *in_warning_mode {
            *in_warning_mode = false;
            self.channel.reset_warning_throttle().await;

            if is_hibernating {
                // The machine is about to suspend; nothing to tell anyone.
                debug!("Exiting warning mode due to hibernation");
            } else {
                debug!("Exiting warning mode, returning to dynamic polling");

                // Retract the visible warning first, then explain why.
                if let Err(e) = self.channel.dismiss_warning().await {
                    debug!("Failed to dismiss warning notification: {}", e);
                }
                match sessions {
                    Some(sessions) => {
                        match self.channel.send_cancellation(&sessions).await {
                            Ok(()) => info!("Cancellation notification sent: activity detected"),
                            Err(e) => warn!("Failed to send cancellation notification: {}", e),
                        }
                    }
                    // The snapshot failed this cycle; without one the relay
                    // registry can't be refreshed, so skip the notice.
                    None => debug!("No session snapshot, skipping cancellation notification"),
                }
            }
        }
    }

    /// Evaluate the engine and act on its decision.
    ///
    /// Returns (should_warn, is_hibernating, snapshot); the snapshot is
    /// `None` when the session query failed.
    async fn check_and_hibernate(&mut self) -> (bool, bool, Option<Vec<SessionEntry>>) {
        debug!("Starting idle state check");

        let sessions = match self.source.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("Failed to list sessions: {}", e);
                return (false, false, None);
            }
        };

        let uptime = match self.source.system_uptime().await {
            Ok(uptime) => Some(uptime),
            Err(e) => {
                debug!("Failed to get system uptime: {}", e);
                None
            }
        };

        let result = self.engine.evaluate(&sessions, uptime, Instant::now());
        debug!(
            "Idle check result: should_warn={}, should_hibernate={}, reason={:?}",
            result.should_warn, result.should_hibernate, result.reason
        );

        if result.should_warn {
            if let Err(e) = self
                .channel
                .send_warning(&sessions, &result.reason, result.time_remaining)
                .await
            {
                warn!("Failed to send warning notification: {}", e);
            }
            (true, false, Some(sessions))
        } else if result.should_hibernate {
            info!("Hibernation triggered: {}", result.reason);

            match self.hibernate.hibernate().await {
                Ok(()) => {
                    // Clean state so the resumed machine doesn't re-trigger
                    // on stale timers. On failure the state is left intact:
                    // the condition stays met and the next cycle re-attempts.
                    self.engine.reset(Instant::now());
                    (false, true, Some(sessions))
                }
                Err(e) => {
                    error!("Failed to hibernate: {}", e);
                    (false, false, Some(sessions))
                }
            }
        } else {
            debug!("System is active, no hibernation needed");
            (false, false, Some(sessions))
        }
    }

    /// When to check next, based on current state.
    fn next_check_interval(&self, in_warning_mode: bool, now: Instant) -> Duration {
        if in_warning_mode {
            return WARNING_CHECK_INTERVAL;
        }

        // With no condition timer running, fall back to the smallest
        // configured threshold so a fresh timer can't be missed for long.
        let default_interval = self
            .config
            .smallest_idle_threshold()
            .unwrap_or(DEFAULT_CHECK_INTERVAL);

        let time_until = self.engine.time_until_next_threshold(now);
        if time_until == Duration::ZERO {
            return default_interval;
        }

        time_until.max(MIN_CHECK_INTERVAL)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
