//! Countdown timer state for a test run.
//!
//! `ExamTimer` is plain state: every method takes the current instant from
//! the caller, so the dashboard's tick task, the pause/resume operations and
//! the tests all drive it the same way.  Instants are `tokio::time::Instant`
//! so a paused tokio clock controls the timer in tests.
//!
//! # Invariants
//!
//! - `0 <= remaining <= configured` after every call.
//! - `running` implies `!paused`.
//! - `remaining` never increases except through [`ExamTimer::extend`] or
//!   [`ExamTimer::configure`].

use std::time::Duration;

use tokio::time::Instant;

/// Milliseconds per minute.
const MILLIS_PER_MINUTE: u64 = 60_000;

/// Result of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The timer is not counting down (not started, paused, or exhausted).
    Idle,
    /// Time was subtracted and some remains.
    Ticking,
    /// This tick consumed the last remaining time.
    Expired,
}

/// Read-only view of the timer for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerStatus {
    pub total_seconds: u64,
    /// Remaining time rounded up to whole seconds.
    pub remaining_seconds: u64,
    pub running: bool,
    pub paused: bool,
}

#[derive(Debug, Default)]
pub struct ExamTimer {
    configured_ms: u64,
    remaining_ms: u64,
    running: bool,
    paused: bool,
    last_tick_at: Option<Instant>,
}

/// Converts minutes to milliseconds, saturating instead of wrapping.
pub fn minutes_to_millis(minutes: u64) -> u64 {
    minutes.saturating_mul(MILLIS_PER_MINUTE)
}

impl ExamTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a fresh duration and stops the countdown.
    pub fn configure(&mut self, duration_ms: u64) {
        *self = Self {
            configured_ms: duration_ms,
            remaining_ms: duration_ms,
            ..Self::default()
        };
    }

    /// Clears everything back to an unconfigured timer.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn configured_ms(&self) -> u64 {
        self.configured_ms
    }

    pub fn remaining_ms(&self) -> u64 {
        self.remaining_ms
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether a duration was configured for this run.
    pub fn has_duration(&self) -> bool {
        self.configured_ms > 0
    }

    /// Starts counting down from the current remaining time.
    ///
    /// Returns `false` (and stays stopped) when no time remains.
    pub fn start(&mut self, now: Instant) -> bool {
        self.paused = false;
        if self.remaining_ms == 0 {
            self.running = false;
            return false;
        }
        self.running = true;
        self.last_tick_at = Some(now);
        true
    }

    /// Subtracts the time elapsed since the previous tick.
    ///
    /// A no-op unless running with time remaining.  On reaching zero the timer
    /// stops itself and reports [`TickOutcome::Expired`] exactly once.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if !self.running || self.paused || self.remaining_ms == 0 {
            return TickOutcome::Idle;
        }
        let elapsed = self.elapsed_since_last_tick(now);
        self.remaining_ms = self.remaining_ms.saturating_sub(elapsed);
        self.last_tick_at = Some(now);
        if self.remaining_ms == 0 {
            self.running = false;
            TickOutcome::Expired
        } else {
            TickOutcome::Ticking
        }
    }

    /// Freezes the countdown, first accounting for time elapsed since the last
    /// tick.  The returned outcome is [`TickOutcome::Expired`] if that
    /// accounting used up the remaining time.
    pub fn pause(&mut self, now: Instant) -> TickOutcome {
        let outcome = self.tick(now);
        self.running = false;
        self.paused = true;
        outcome
    }

    /// Lifts an operator pause.  Counting resumes only if time remains.
    ///
    /// Returns whether the countdown is running afterwards.
    pub fn resume(&mut self, now: Instant) -> bool {
        self.paused = false;
        if self.remaining_ms > 0 && self.configured_ms > 0 {
            self.running = true;
            self.last_tick_at = Some(now);
        }
        self.running
    }

    /// Adds time to both the configured and remaining duration.
    ///
    /// If the countdown had stopped only because time ran out, it starts
    /// again; an operator pause is left in place.  Returns whether the
    /// countdown is running afterwards.
    pub fn extend(&mut self, extra_ms: u64, now: Instant) -> bool {
        if self.running {
            // Settle elapsed time first so the extension is not eaten by it.
            self.tick(now);
        }
        let was_exhausted = self.remaining_ms == 0;
        self.configured_ms = self.configured_ms.saturating_add(extra_ms);
        self.remaining_ms = self.remaining_ms.saturating_add(extra_ms);
        if was_exhausted && !self.paused && self.remaining_ms > 0 {
            self.running = true;
            self.last_tick_at = Some(now);
        }
        self.running
    }

    /// Remaining milliseconds as of `now`, without mutating state.
    pub fn remaining_at(&self, now: Instant) -> u64 {
        if self.running {
            self.remaining_ms
                .saturating_sub(self.elapsed_since_last_tick(now))
        } else {
            self.remaining_ms
        }
    }

    /// Observer view; remaining time rounds up so the display never shows
    /// zero before the expiry action has fired.
    pub fn status(&self, now: Instant) -> TimerStatus {
        TimerStatus {
            total_seconds: ceil_seconds(self.configured_ms),
            remaining_seconds: ceil_seconds(self.remaining_at(now)),
            running: self.running,
            paused: self.paused,
        }
    }

    fn elapsed_since_last_tick(&self, now: Instant) -> u64 {
        self.last_tick_at
            .map(|t| duration_millis(now.saturating_duration_since(t)))
            .unwrap_or(0)
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn ceil_seconds(ms: u64) -> u64 {
    ms / 1000 + u64::from(ms % 1000 != 0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
