//! Per-session keepalive timers.
//!
//! A session's schedule exists only once its channel has become active.
//! The provider pings every third of the negotiated timeout and expects
//! to have heard something from the peer within each full timeout.

use std::time::{Duration, Instant};

/// Outcome of the receive-deadline check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveCheck {
    /// Deadline not reached yet.
    NotDue,
    /// Deadline reached and the peer was heard from; deadline re-armed.
    Alive,
    /// Deadline reached in silence.
    Lapsed,
}

/// Ping deadlines of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSchedule {
    timeout: Duration,
    next_send: Instant,
    next_receive: Instant,
}

impl PingSchedule {
    /// Arms both timers from `now`.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            next_send: now + timeout / 3,
            next_receive: now + timeout,
        }
    }

    /// Negotiated ping timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// When the next ping goes out.
    pub fn next_send(&self) -> Instant {
        self.next_send
    }

    /// When the peer must have been heard from.
    pub fn next_receive(&self) -> Instant {
        self.next_receive
    }

    /// A ping is due at `now`.
    pub fn send_due(&self, now: Instant) -> bool {
        now >= self.next_send
    }

    /// Call after a successful ping.
    pub fn ping_sent(&mut self, now: Instant) {
        self.next_send = now + self.timeout / 3;
    }

    /// Checks the receive deadline. `received` is whether anything arrived
    /// since the previous check; the caller clears it on [`ReceiveCheck::Alive`].
    pub fn check_receive(&mut self, now: Instant, received: bool) -> ReceiveCheck {
        if now < self.next_receive {
            return ReceiveCheck::NotDue;
        }
        if received {
            self.next_receive = now + self.timeout;
            ReceiveCheck::Alive
        } else {
            ReceiveCheck::Lapsed
        }
    }
}
