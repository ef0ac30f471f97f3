//! Inactivity timeout state machine.
//!
//! ```text
//!   start ──► Active ──(idle ≥ timeout − window)──► Warning ──(idle ≥ timeout)──► Expired
//!               ▲                                     │
//!               └──────── activity / extend ──────────┘
//! ```
//!
//! Nothing here owns a timer. Every decision is recomputed from
//! `last_activity` and the `now` passed in, so a stalled event loop or a
//! sleeping laptop cannot make the countdown drift.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum SessionStatus {
    /// No session: never logged in, or logged out.
    Inactive,
    Active,
    /// Inside the warning window before expiry.
    Warning,
    /// Timed out. Only a new login leaves this state.
    Expired,
}

impl SessionStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Warning)
    }
}

/// A status change produced by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

#[derive(Debug, Clone)]
pub struct SessionTimeout {
    timeout: Duration,
    warning_window: Duration,
    status: SessionStatus,
    last_activity: Option<DateTime<Utc>>,
}

impl SessionTimeout {
    pub fn new(timeout: Duration, warning_window: Duration) -> Self {
        Self {
            timeout,
            warning_window,
            status: SessionStatus::Inactive,
            last_activity: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity
    }

    /// When the session times out without further activity.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        if self.status.is_live() {
            self.last_activity.map(|at| at + self.timeout)
        } else {
            None
        }
    }

    fn set_status(&mut self, to: SessionStatus) -> Option<Transition> {
        let from = self.status;
        self.status = to;
        (from != to).then_some(Transition { from, to })
    }

    /// Begin a fresh session.
    pub fn start(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        self.last_activity = Some(now);
        self.set_status(SessionStatus::Active)
    }

    /// Note user activity. Ignored unless the session is live.
    ///
    /// Activity that arrives after the deadline does not revive the session:
    /// the result is the transition to `Expired` instead.
    pub fn record_activity(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        if !self.status.is_live() {
            return None;
        }
        let from = self.status;
        if let Some(Transition {
            to: SessionStatus::Expired,
            ..
        }) = self.evaluate(now)
        {
            return Some(Transition {
                from,
                to: SessionStatus::Expired,
            });
        }
        self.last_activity = Some(now);
        self.status = SessionStatus::Active;
        (from != SessionStatus::Active).then_some(Transition {
            from,
            to: SessionStatus::Active,
        })
    }

    /// Recompute the status for `now`.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        if !self.status.is_live() {
            return None;
        }
        let last = self.last_activity?;

        let idle = now - last;
        let next = if idle >= self.timeout {
            SessionStatus::Expired
        } else if idle >= self.timeout - self.warning_window {
            SessionStatus::Warning
        } else {
            SessionStatus::Active
        };
        self.set_status(next)
    }

    /// Whole seconds left before expiry, rounded up. Only defined while the
    /// warning countdown is running.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.status != SessionStatus::Warning {
            return None;
        }
        let remaining_ms = (self.deadline()? - now).num_milliseconds().max(0);
        Some((remaining_ms + 999) / 1000)
    }

    pub fn expire(&mut self) -> Option<Transition> {
        self.set_status(SessionStatus::Expired)
    }

    pub fn reset(&mut self) -> Option<Transition> {
        self.last_activity = None;
        self.set_status(SessionStatus::Inactive)
    }
}
