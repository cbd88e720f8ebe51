//! Container health monitor.
//!
//! Probes the service's health endpoint on a fixed interval and folds the
//! outcomes into a [`HealthStatus`]:
//! - every probe is bounded by the per-probe timeout; a late answer is a failure
//! - a failed probe is not retried within its cycle
//! - failures in the start period do not count until the first success
//! - `retries` consecutive failures report unhealthy exactly once
//!
//! What happens on an unhealthy report (restart, alert) is up to the
//! orchestrator. The monitor logs transitions, publishes the current status on
//! a watch channel, and can stop at the first unhealthy report so that a
//! supervisor sees a non-zero exit.

mod probe;
mod tracker;

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::HealthCheckConfig;

pub use probe::{probe_once, HttpProber, ProbeError, Prober};
pub use tracker::{HealthStatus, HealthTracker, ProbeOutcome, Transition};

/// Timing parameters of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub start_period: Duration,
    pub retries: u32,
}

impl From<&HealthCheckConfig> for MonitorSettings {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            interval: config.interval(),
            timeout: config.timeout(),
            start_period: config.start_period(),
            retries: config.retries,
        }
    }
}

/// Summary returned when the monitor stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorReport {
    pub status: HealthStatus,
    pub probes: u64,
    pub failures: u64,
    pub transitions: u64,
}

pub struct HealthMonitor<P> {
    prober: P,
    settings: MonitorSettings,
    stop_on_unhealthy: bool,
    status_tx: watch::Sender<HealthStatus>,
}

impl<P: Prober> HealthMonitor<P> {
    pub fn new(prober: P, settings: MonitorSettings) -> Self {
        let (status_tx, _) = watch::channel(HealthStatus::Starting);
        Self {
            prober,
            settings,
            stop_on_unhealthy: false,
            status_tx,
        }
    }

    /// Return from [`run`](Self::run) as soon as the target is reported unhealthy.
    pub fn stop_on_unhealthy(mut self, stop: bool) -> Self {
        self.stop_on_unhealthy = stop;
        self
    }

    /// Receive status changes.
    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status_tx.subscribe()
    }

    /// Probe every interval until `shutdown` resolves.
    ///
    /// The first probe runs one interval after the call, as container runtimes do.
    pub async fn run<F>(self, shutdown: F) -> MonitorReport
    where
        F: Future<Output = ()>,
    {
        let settings = self.settings;
        let started = Instant::now();
        let mut tracker = HealthTracker::new(settings.start_period, settings.retries);
        let mut report = MonitorReport {
            status: tracker.status(),
            probes: 0,
            failures: 0,
            transitions: 0,
        };

        let mut ticker = tokio::time::interval_at(started + settings.interval, settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            target = %self.prober.target(),
            interval = ?settings.interval,
            timeout = ?settings.timeout,
            start_period = ?settings.start_period,
            retries = settings.retries,
            "Health monitor started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = &mut shutdown => break,
                result = probe_once(&self.prober, settings.timeout) => result,
            };
            let elapsed = started.elapsed();
            report.probes += 1;

            let outcome = match result {
                Ok(()) => {
                    tracing::debug!(elapsed = ?elapsed, "Probe succeeded");
                    ProbeOutcome::Success
                }
                Err(e) => {
                    report.failures += 1;
                    if tracker.in_start_period(elapsed) {
                        tracing::info!(error = %e, elapsed = ?elapsed, "Probe failed during start period");
                    } else {
                        tracing::warn!(
                            error = %e,
                            failing_streak = tracker.failing_streak() + 1,
                            retries = settings.retries,
                            "Probe failed"
                        );
                    }
                    ProbeOutcome::Failure
                }
            };

            if let Some(transition) = tracker.record(outcome, elapsed) {
                report.transitions += 1;
                report.status = transition.to;
                self.status_tx.send_replace(transition.to);
                log_transition(&transition, self.prober.target());

                if self.stop_on_unhealthy && transition.to == HealthStatus::Unhealthy {
                    break;
                }
            }
        }

        tracing::info!(
            status = %report.status,
            probes = report.probes,
            failures = report.failures,
            "Health monitor stopped"
        );
        report
    }
}

fn log_transition(transition: &Transition, target: &str) {
    match transition.to {
        HealthStatus::Unhealthy => tracing::warn!(
            %target,
            from = %transition.from,
            failing_streak = transition.failing_streak,
            "Target is unhealthy"
        ),
        _ => tracing::info!(
            %target,
            from = %transition.from,
            to = %transition.to,
            "Target is healthy"
        ),
    }
}
