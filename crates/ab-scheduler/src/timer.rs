//! Deadline timers for samples and batches.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Pending,
    Running,
    /// Stopped on time.
    Ended,
    /// Stopped because the deadline passed (or the work was abandoned).
    Interrupted,
}

/// A one-shot timer: started once, stopped once.
#[derive(Debug, Clone)]
pub struct Timer {
    timeout: Duration,
    state: TimerState,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
}

impl Timer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: TimerState::Pending,
            started_at: None,
            stopped_at: None,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start the timer. Returns false if it was already started.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.state != TimerState::Pending {
            return false;
        }
        self.state = TimerState::Running;
        self.started_at = Some(now);
        true
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TimerState::Ended | TimerState::Interrupted)
    }

    /// Time left before the deadline; `None` unless running.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let started = self.started_at.filter(|_| self.is_running())?;
        Some(self.timeout.saturating_sub(now.saturating_duration_since(started)))
    }

    /// True when running and the deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.remaining(now).is_some_and(|left| left.is_zero())
    }

    pub fn end(&mut self, now: Instant) {
        self.stop(TimerState::Ended, now);
    }

    pub fn interrupt(&mut self, now: Instant) {
        self.stop(TimerState::Interrupted, now);
    }

    fn stop(&mut self, state: TimerState, now: Instant) {
        if self.is_terminal() {
            return;
        }
        self.state = state;
        self.stopped_at = Some(now);
    }

    /// Running time so far, or total running time once stopped.
    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.started_at {
            Some(started) => self.stopped_at.unwrap_or(now).saturating_duration_since(started),
            None => Duration::ZERO,
        }
    }
}
