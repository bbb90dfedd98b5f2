//! Heartbeat monitor: periodic liveness pings and the silence check.
//!
//! Deadline-based and free of I/O. The owner asks for `next_deadline()`, sleeps until then,
//! and calls back with the current instant. `stop()` clears every deadline, which is how the
//! periodic work is cancelled.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::{Config, LivenessPolicy};
use crate::protocol::{self, Message};

/// Result of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Traffic seen within the timeout.
    Alive,
    /// Silent past the timeout, but the channel still reports open. Advisory only.
    Silent { elapsed: Duration },
    /// Silent past the timeout and the channel reports closed.
    Dead { elapsed: Duration },
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    policy: LivenessPolicy,
    last_received: Option<Instant>,
    next_ping: Option<Instant>,
    next_check: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(config: &Config) -> Self {
        Self {
            interval: config.heartbeat_interval,
            timeout: config.heartbeat_timeout,
            policy: config.liveness,
            last_received: None,
            next_ping: None,
            next_check: None,
        }
    }

    /// Arm both periodic actions. The silence window starts now.
    pub fn start(&mut self, now: Instant) {
        self.last_received = Some(now);
        self.next_ping = Some(now + self.interval);
        self.next_check = Some(now + self.interval);
    }

    /// Cancel both periodic actions. Safe to call when never started.
    pub fn stop(&mut self) {
        self.last_received = None;
        self.next_ping = None;
        self.next_check = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_ping.is_some()
    }

    /// Record inbound traffic. Whether it counts depends on the liveness policy.
    pub fn observe(&mut self, msg: &Message, now: Instant) {
        let counts = match self.policy {
            LivenessPolicy::AnyMessage => true,
            LivenessPolicy::HeartbeatOnly => matches!(msg, Message::Heartbeat { .. }),
        };
        if counts && self.is_running() {
            self.last_received = Some(now);
        }
    }

    pub fn last_received(&self) -> Option<Instant> {
        self.last_received
    }

    /// Earliest pending deadline, if running.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.next_ping, self.next_check) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// True when a ping is due; re-arms the ping deadline.
    pub fn take_ping_due(&mut self, now: Instant) -> bool {
        match self.next_ping {
            Some(at) if at <= now => {
                self.next_ping = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }

    /// Run the liveness check if due; re-arms the check deadline. `None` when not due.
    pub fn take_check_due(&mut self, now: Instant, channel_open: bool) -> Option<Liveness> {
        match self.next_check {
            Some(at) if at <= now => {
                self.next_check = Some(now + self.interval);
                Some(self.check(now, channel_open))
            }
            _ => None,
        }
    }

    /// Compare silence against the timeout. The channel's own open report wins over silence.
    pub fn check(&self, now: Instant, channel_open: bool) -> Liveness {
        let Some(last) = self.last_received else {
            return Liveness::Alive;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed <= self.timeout {
            Liveness::Alive
        } else if channel_open {
            Liveness::Silent { elapsed }
        } else {
            Liveness::Dead { elapsed }
        }
    }

    /// The ping to send now.
    pub fn ping_message(&self) -> Message {
        Message::Heartbeat {
            timestamp: protocol::now_millis(),
        }
    }
}
