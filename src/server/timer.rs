//! Timer queue for the event loop.
//!
//! The loop is single-threaded, so timers are just deadlines the poll
//! timeout is computed from. Scheduling an already-pending timer replaces
//! its deadline.

use std::time::{Duration, Instant};

/// What a timer firing means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Repeat window for a client's repeat-eligible binding.
    Repeat {
        /// Owning client.
        client: u32,
    },
    /// Double/triple click promotion window for a client.
    Click {
        /// Owning client.
        client: u32,
    },
    /// Periodic resize-queue check.
    ResizeCheck,
    /// Retry deferred redraws once output queues drain.
    RedrawRetry,
}

impl TimerKind {
    const fn client(self) -> Option<u32> {
        match self {
            Self::Repeat { client } | Self::Click { client } => Some(client),
            Self::ResizeCheck | Self::RedrawRetry => None,
        }
    }
}

#[derive(Debug)]
struct Timer {
    deadline: Instant,
    kind: TimerKind,
}

/// Pending timers, unordered; the set stays small.
#[derive(Debug, Default)]
pub struct TimerQueue {
    timers: Vec<Timer>,
}

impl TimerQueue {
    /// An empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self { timers: Vec::new() }
    }

    /// Arm (or re-arm) a timer.
    pub fn schedule(&mut self, kind: TimerKind, after: Duration) {
        let deadline = Instant::now() + after;
        if let Some(timer) = self.timers.iter_mut().find(|t| t.kind == kind) {
            timer.deadline = deadline;
        } else {
            self.timers.push(Timer { deadline, kind });
        }
    }

    /// Disarm a timer; reports whether it was pending.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.kind != kind);
        self.timers.len() != before
    }

    /// Disarm every timer owned by a client.
    pub fn cancel_client(&mut self, client: u32) {
        self.timers.retain(|t| t.kind.client() != Some(client));
    }

    /// True when a timer of this kind is pending.
    #[must_use]
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.timers.iter().any(|t| t.kind == kind)
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.deadline).min()
    }

    /// Milliseconds until the earliest deadline, clamped for `poll(2)`.
    /// `None` means block indefinitely.
    #[must_use]
    pub fn poll_timeout_ms(&self, now: Instant) -> Option<u16> {
        let deadline = self.next_deadline()?;
        let millis = deadline.saturating_duration_since(now).as_millis();
        Some(u16::try_from(millis).unwrap_or(u16::MAX))
    }

    /// Remove and return every timer whose deadline has passed.
    pub fn expired(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut fired = Vec::new();
        self.timers.retain(|t| {
            if t.deadline <= now {
                fired.push(t.kind);
                false
            } else {
                true
            }
        });
        fired
    }
}
