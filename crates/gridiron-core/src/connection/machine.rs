// Connection lifecycle as an explicit state machine.
//
// `ConnectionMachine::handle` is a pure transition table: it consumes one
// event and returns the side effects the driver must perform, in order. No
// I/O or timers live here.

use std::time::Duration;

use tracing::debug;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    TransportOpened,
    /// Connect attempt failed, or a live transport errored or closed.
    TransportFailed,
    RetryElapsed,
    TeardownRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    OpenTransport,
    RequestSnapshot,
    ScheduleRetry { attempt: u32, delay: Duration },
    CancelRetry,
    CloseTransport,
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential backoff: `min(base * 2^attempt, max)`, attempt counted from 0.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Failed attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the current attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = 2u32
            .checked_pow(self.attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |d| d.min(self.max));
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    backoff: Backoff,
}

impl ConnectionMachine {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Idle,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Apply one event. Returns the actions to run, in order; an empty list
    /// means the event was a no-op in the current state.
    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<Action> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self.state, event) {
            (S::Closed, _) => Vec::new(),

            (_, E::TeardownRequested) => {
                self.state = S::Closed;
                vec![Action::CancelRetry, Action::CloseTransport]
            }

            (S::Idle, E::ConnectRequested) => {
                self.state = S::Connecting;
                vec![Action::OpenTransport]
            }

            (S::Connecting | S::Reconnecting, E::TransportOpened) => {
                self.backoff.reset();
                self.state = S::Open;
                vec![Action::RequestSnapshot]
            }

            (S::Connecting | S::Open | S::Reconnecting, E::TransportFailed) => {
                self.state = S::Reconnecting;
                let delay = self.backoff.next_delay();
                vec![Action::ScheduleRetry {
                    attempt: self.backoff.attempt(),
                    delay,
                }]
            }

            (S::Reconnecting, E::RetryElapsed) => vec![Action::OpenTransport],

            (state, event) => {
                debug!("Ignoring {event:?} while {state:?}");
                Vec::new()
            }
        }
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}
