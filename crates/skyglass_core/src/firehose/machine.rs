//! Connection lifecycle bookkeeping, free of any I/O.
//!
//! The driver task feeds transport and timer events in and reports whatever
//! status the machine hands back.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::FirehoseConfig;
use crate::status::{ConnectionState, ConnectionStatus};

/// A scheduled reconnect. At most one exists at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectTimer {
    pub attempt: u32,
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Close arrived while not connecting or connected (e.g. after `disconnect`)
    Ignored,
    Reconnect(ReconnectTimer),
    GaveUp,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
    pending: Option<ReconnectTimer>,
    timers_scheduled: u64,
}

impl ConnectionMachine {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempts: 0,
            max_attempts,
            delay,
            pending: None,
            timers_scheduled: 0,
        }
    }

    pub fn from_config(config: &FirehoseConfig) -> Self {
        Self::new(config.max_reconnect_attempts, config.reconnect_delay())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed connections since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn pending(&self) -> Option<ReconnectTimer> {
        self.pending
    }

    /// Total reconnect timers ever scheduled
    pub fn timers_scheduled(&self) -> u64 {
        self.timers_scheduled
    }

    /// Start a connection attempt.
    ///
    /// Returns `None` when a connection is already open or opening. Any
    /// pending reconnect is superseded.
    pub fn begin_connect(&mut self) -> Option<ConnectionStatus> {
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return None;
        }

        self.pending = None;
        self.state = ConnectionState::Connecting;
        Some(ConnectionStatus::Connecting)
    }

    pub fn opened(&mut self) -> ConnectionStatus {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        ConnectionStatus::Connected
    }

    /// Errors only change the reported status; the close that follows drives
    /// the state.
    pub fn errored(&self) -> ConnectionStatus {
        ConnectionStatus::Error
    }

    pub fn closed(&mut self, now: Instant) -> CloseOutcome {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return CloseOutcome::Ignored;
        }

        self.state = ConnectionState::Disconnected;

        if self.attempts < self.max_attempts {
            self.attempts += 1;
            let timer = ReconnectTimer {
                attempt: self.attempts,
                deadline: now + self.delay,
            };
            self.pending = Some(timer);
            self.timers_scheduled += 1;
            self.state = ConnectionState::Reconnecting {
                attempt: self.attempts,
            };
            CloseOutcome::Reconnect(timer)
        } else {
            self.state = ConnectionState::GivenUp;
            CloseOutcome::GaveUp
        }
    }

    /// Take the pending timer if it has expired.
    pub fn reconnect_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(timer) if timer.deadline <= now => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Explicit disconnect. Idempotent; returns whether a pending reconnect
    /// was cancelled.
    pub fn disconnect(&mut self) -> bool {
        let cancelled = self.pending.take().is_some();
        self.state = ConnectionState::Disconnected;
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn machine() -> ConnectionMachine {
        ConnectionMachine::new(10, Duration::from_millis(3000))
    }

    #[test]
    fn test_connect_is_noop_while_connected() {
        let mut m = machine();
        assert_eq!(m.begin_connect(), Some(ConnectionStatus::Connecting));
        assert_eq!(m.begin_connect(), None);
        m.opened();
        assert_eq!(m.state(), ConnectionState::Connected);
        assert_eq!(m.begin_connect(), None);
    }

    #[test]
    fn test_close_schedules_reconnect() {
        let mut m = machine();
        let now = Instant::now();
        m.begin_connect();
        m.opened();

        let outcome = m.closed(now);
        let expected = ReconnectTimer {
            attempt: 1,
            deadline: now + Duration::from_millis(3000),
        };
        assert_eq!(outcome, CloseOutcome::Reconnect(expected));
        assert_eq!(m.state(), ConnectionState::Reconnecting { attempt: 1 });

        assert!(!m.reconnect_due(now));
        assert!(m.reconnect_due(now + Duration::from_millis(3000)));
        assert!(m.pending().is_none());
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut m = machine();
        let now = Instant::now();

        for attempt in 1..=10 {
            assert!(m.begin_connect().is_some());
            assert!(matches!(
                m.closed(now),
                CloseOutcome::Reconnect(ReconnectTimer { attempt: a, .. }) if a == attempt
            ));
        }

        assert!(m.begin_connect().is_some());
        assert_eq!(m.closed(now), CloseOutcome::GaveUp);
        assert_eq!(m.state(), ConnectionState::GivenUp);
        assert_eq!(m.timers_scheduled(), 10);
        assert!(m.pending().is_none());
    }

    #[test]
    fn test_successful_open_resets_attempts() {
        let mut m = machine();
        let now = Instant::now();
        for _ in 0..4 {
            m.begin_connect();
            m.closed(now);
        }
        assert_eq!(m.attempts(), 4);

        m.begin_connect();
        m.opened();
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn test_disconnect_cancels_timer_once() {
        let mut m = machine();
        m.begin_connect();
        m.closed(Instant::now());
        assert!(m.pending().is_some());

        assert!(m.disconnect());
        assert!(!m.disconnect());
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(m.pending().is_none());
    }

    #[test]
    fn test_close_after_disconnect_is_ignored() {
        let mut m = machine();
        m.begin_connect();
        m.opened();
        m.disconnect();
        assert_eq!(m.closed(Instant::now()), CloseOutcome::Ignored);
        assert_eq!(m.timers_scheduled(), 0);
    }

    #[test]
    fn test_explicit_connect_supersedes_pending_timer() {
        let mut m = machine();
        m.begin_connect();
        m.closed(Instant::now());
        assert!(m.pending().is_some());

        assert_eq!(m.begin_connect(), Some(ConnectionStatus::Connecting));
        assert!(m.pending().is_none());
    }

    #[test]
    fn test_error_does_not_transition() {
        let mut m = machine();
        m.begin_connect();
        m.opened();
        assert_eq!(m.errored(), ConnectionStatus::Error);
        assert_eq!(m.state(), ConnectionState::Connected);
    }
}
