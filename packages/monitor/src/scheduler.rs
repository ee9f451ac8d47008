//! Poll scheduling: cadence, jitter, backoff, and the stop conditions.
//!
//! State machine: Idle → Polling → (Sleeping | Backoff) → Polling → … →
//! Stopped. The policy core is synchronous and stateful so tests drive it
//! cycle-by-cycle without real time passing; the async loop around it only
//! sleeps and watches for cancellation.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::types::{CycleReport, CycleStatus, TransientKind};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Nominal time between polls when cycles succeed.
    pub interval: Duration,
    /// Fraction of the interval used as ± jitter. Fixed-interval polling
    /// against a rate-sensitive service is a defect, so this is never zero
    /// by default.
    pub jitter_fraction: f64,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Consecutive markup-drift cycles tolerated before the loop stops.
    pub markup_failure_limit: u32,
    /// Consecutive auth-failure cycles tolerated before the loop stops.
    pub auth_failure_budget: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            jitter_fraction: 0.15,
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(900),
            markup_failure_limit: 3,
            auth_failure_budget: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Polling,
    Sleeping,
    Backoff,
    Stopped,
}

/// What to do after a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Sleep { wait: Duration, state: State },
    Stop { reason: String },
}

/// Why the continuous loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCause {
    Shutdown,
    Fatal(String),
}

/// Pure-ish decision core: owns the failure counters, produces the next
/// wait or a stop.
pub struct SchedulerPolicy {
    config: SchedulerConfig,
    consecutive_transients: u32,
    consecutive_markup: u32,
    consecutive_auth: u32,
}

impl SchedulerPolicy {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            consecutive_transients: 0,
            consecutive_markup: 0,
            consecutive_auth: 0,
        }
    }

    pub fn decide(&mut self, status: &CycleStatus) -> Decision {
        match status {
            CycleStatus::Ok => {
                self.consecutive_transients = 0;
                self.consecutive_markup = 0;
                self.consecutive_auth = 0;
                Decision::Sleep {
                    wait: self.jittered_interval(),
                    state: State::Sleeping,
                }
            }
            CycleStatus::TransientError(kind) => {
                match kind {
                    TransientKind::Markup => {
                        self.consecutive_markup += 1;
                        self.consecutive_auth = 0;
                    }
                    TransientKind::Auth => {
                        self.consecutive_auth += 1;
                        self.consecutive_markup = 0;
                    }
                    TransientKind::Transport => {
                        self.consecutive_markup = 0;
                        self.consecutive_auth = 0;
                    }
                }

                // Recurring markup drift means the site changed shape and
                // further polling is pointless until the extractor is fixed.
                if self.consecutive_markup > self.config.markup_failure_limit {
                    return Decision::Stop {
                        reason: format!(
                            "appointment extractor: booking page structure unrecognized for {} consecutive cycles",
                            self.consecutive_markup
                        ),
                    };
                }
                if self.consecutive_auth > self.config.auth_failure_budget {
                    return Decision::Stop {
                        reason: format!(
                            "session manager: login failed in {} consecutive cycles",
                            self.consecutive_auth
                        ),
                    };
                }

                let wait = self.backoff_delay();
                self.consecutive_transients += 1;
                Decision::Sleep {
                    wait,
                    state: State::Backoff,
                }
            }
            CycleStatus::FatalError(reason) => Decision::Stop {
                reason: reason.clone(),
            },
        }
    }

    /// Exponential growth from the base delay, capped.
    fn backoff_delay(&self) -> Duration {
        let exponent = self.consecutive_transients.min(16);
        let delay = self
            .config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.config.backoff_cap)
    }

    fn jittered_interval(&self) -> Duration {
        let interval = self.config.interval.as_secs_f64();
        let spread = interval * self.config.jitter_fraction;
        let offset = (fastrand::f64() * 2.0 - 1.0) * spread;
        Duration::from_secs_f64((interval + offset).max(1.0))
    }
}

/// One poll cycle, abstracted so the loop is testable with scripted outcomes.
#[async_trait]
pub trait CycleRunner: Send {
    async fn run_cycle(&mut self) -> CycleReport;
}

pub struct PollScheduler {
    policy: SchedulerPolicy,
    state: State,
}

impl PollScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            policy: SchedulerPolicy::new(config),
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Continuous mode: drive cycles until a fatal error or shutdown.
    ///
    /// The shutdown signal is observed at every wait and aborts it promptly
    /// rather than letting the sleep elapse.
    pub async fn run<R: CycleRunner>(
        &mut self,
        runner: &mut R,
        mut shutdown: watch::Receiver<bool>,
    ) -> StopCause {
        loop {
            if *shutdown.borrow() {
                self.state = State::Stopped;
                info!("Shutdown requested, stopping monitor loop");
                return StopCause::Shutdown;
            }

            self.state = State::Polling;
            let report = runner.run_cycle().await;

            match self.policy.decide(&report.status) {
                Decision::Stop { reason } => {
                    self.state = State::Stopped;
                    error!(%reason, "Monitoring stopped");
                    return StopCause::Fatal(reason);
                }
                Decision::Sleep { wait, state } => {
                    self.state = state;
                    if state == State::Backoff {
                        warn!(wait_secs = wait.as_secs(), "Cycle failed, backing off");
                    } else {
                        debug!(wait_secs = wait.as_secs(), "Sleeping until next poll");
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = wait_for_shutdown(&mut shutdown) => {
                            self.state = State::Stopped;
                            info!("Shutdown requested during wait, stopping monitor loop");
                            return StopCause::Shutdown;
                        }
                    }
                }
            }
        }
    }

    /// Single-shot mode: exactly one cycle, then Stopped regardless of
    /// outcome (for cron-driven invocation).
    pub async fn run_once<R: CycleRunner>(&mut self, runner: &mut R) -> CycleReport {
        self.state = State::Polling;
        let report = runner.run_cycle().await;
        self.state = State::Stopped;
        report
    }
}

/// Resolves only when a shutdown signal is observed. A dropped sender can
/// never signal, so it parks forever instead of waking the select loop.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
