//! Health status state machine.
//!
//! Folds probe outcomes into a status the same way container runtimes do:
//! failures inside the start period are ignored until the first success,
//! `retries` consecutive failures flip the status to unhealthy once, and any
//! success flips it back.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Result of one probe as far as the status is concerned.
///
/// Timeouts, refused connections and error statuses all collapse into `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No successful probe yet
    Starting,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Starting => write!(f, "starting"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A change of status caused by one probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthStatus,
    pub to: HealthStatus,
    /// Consecutive counted failures at the time of the change
    pub failing_streak: u32,
}

#[derive(Debug)]
pub struct HealthTracker {
    status: HealthStatus,
    failing_streak: u32,
    start_period: Duration,
    retries: u32,
    /// Set by the first success; ends the start period early
    started: bool,
}

impl HealthTracker {
    /// `retries` is clamped to at least one.
    pub fn new(start_period: Duration, retries: u32) -> Self {
        Self {
            status: HealthStatus::Starting,
            failing_streak: 0,
            start_period,
            retries: retries.max(1),
            started: false,
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn failing_streak(&self) -> u32 {
        self.failing_streak
    }

    /// Whether a failure observed `elapsed` after start is still in the grace window.
    pub fn in_start_period(&self, elapsed: Duration) -> bool {
        !self.started && elapsed < self.start_period
    }

    /// Record an outcome observed `elapsed` after monitoring began.
    ///
    /// Returns the transition when the status changes, `None` otherwise.
    pub fn record(&mut self, outcome: ProbeOutcome, elapsed: Duration) -> Option<Transition> {
        match outcome {
            ProbeOutcome::Success => {
                self.started = true;
                self.failing_streak = 0;
                self.transition_to(HealthStatus::Healthy)
            }
            ProbeOutcome::Failure => {
                if self.in_start_period(elapsed) {
                    return None;
                }
                self.failing_streak = self.failing_streak.saturating_add(1);
                if self.failing_streak >= self.retries {
                    self.transition_to(HealthStatus::Unhealthy)
                } else {
                    None
                }
            }
        }
    }

    fn transition_to(&mut self, to: HealthStatus) -> Option<Transition> {
        if self.status == to {
            return None;
        }
        let from = std::mem::replace(&mut self.status, to);
        Some(Transition {
            from,
            to,
            failing_streak: self.failing_streak,
        })
    }
}
