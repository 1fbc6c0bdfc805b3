//! Keepalive pings and the pong watchdog.

use std::time::{Duration, Instant};

use spin_shared::{Command, OutboundOp};
use tracing::debug;

use crate::error::TransportError;

/// Tracks the deadline for the pong answering the oldest unanswered ping.
#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Keepalive tick: returns the ping to send and arms the deadline unless
    /// one is already running.
    pub fn on_tick(&mut self, now: Instant) -> Command {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.timeout);
        }
        Command::new(OutboundOp::Ping).arg("p")
    }

    pub fn on_pong(&mut self) {
        if self.deadline.take().is_some() {
            debug!("Pong received, watchdog disarmed");
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Fails once the deadline has passed; the watchdog disarms itself so the
    /// timeout is reported a single time.
    pub fn check(&mut self, now: Instant) -> Result<(), TransportError> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Err(TransportError::PingTimeout)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_emits_ping_and_arms() {
        let now = Instant::now();
        let mut dog = Watchdog::new(Duration::from_secs(60));
        assert_eq!(dog.on_tick(now).encode(), b"Jp\n");
        assert_eq!(dog.deadline(), Some(now + Duration::from_secs(60)));

        // A second tick keeps the original deadline.
        dog.on_tick(now + Duration::from_secs(30));
        assert_eq!(dog.deadline(), Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_timeout_reported_exactly_once() {
        let now = Instant::now();
        let mut dog = Watchdog::new(Duration::from_secs(60));
        dog.on_tick(now);

        assert!(dog.check(now + Duration::from_secs(59)).is_ok());
        let err = dog.check(now + Duration::from_secs(60)).unwrap_err();
        assert_eq!(err.to_string(), "ping timeout");
        assert!(dog.check(now + Duration::from_secs(120)).is_ok());
    }

    #[test]
    fn test_pong_cancels_timeout() {
        let now = Instant::now();
        let mut dog = Watchdog::new(Duration::from_secs(60));
        dog.on_tick(now);
        dog.on_pong();
        assert!(!dog.is_armed());
        assert!(dog.check(now + Duration::from_secs(600)).is_ok());
    }
}
