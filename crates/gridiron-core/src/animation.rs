// Animation scheduler: derives the "a play is being dramatized" flag from
// play-log growth.
//
// The scheduler is driven from the session loop: `observe` is called after
// every dispatched frame and `advance` is polled as a `select!` branch while
// `is_pending` is true. `advance` only mutates after its await point
// completes, so dropping it mid-wait is harmless.

use std::time::Duration;

use tokio::time::Instant;

/// Default length of one play's animation.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// A new play was seen; the flag goes up on the next tick.
    Armed,
    /// Flag is up until `until`.
    Running { until: Instant },
    TornDown,
}

#[derive(Debug)]
pub struct AnimationScheduler {
    window: Duration,
    seen_len: usize,
    phase: Phase,
    is_animating: bool,
}

impl AnimationScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen_len: 0,
            phase: Phase::Idle,
            is_animating: false,
        }
    }

    pub fn is_animating(&self) -> bool {
        self.is_animating
    }

    /// Whether `advance` has a transition to wait for.
    pub fn is_pending(&self) -> bool {
        matches!(self.phase, Phase::Armed | Phase::Running { .. })
    }

    /// Record the current play-log length. Growth (re)arms the window; a
    /// shrink (store reset) only rebases the length.
    pub fn observe(&mut self, play_len: usize) {
        if self.phase == Phase::TornDown {
            return;
        }
        if play_len > self.seen_len {
            self.phase = Phase::Armed;
        }
        self.seen_len = play_len;
    }

    /// Wait for the next scheduled transition and apply it.
    ///
    /// Returns the new flag value when it changed, `None` when the transition
    /// left it as it was (a newer play restarting a running window). Never
    /// completes while nothing is pending.
    pub async fn advance(&mut self) -> Option<bool> {
        match self.phase {
            Phase::Armed => {
                tokio::task::yield_now().await;
                self.phase = Phase::Running {
                    until: Instant::now() + self.window,
                };
                self.set(true)
            }
            Phase::Running { until } => {
                tokio::time::sleep_until(until).await;
                self.phase = Phase::Idle;
                self.set(false)
            }
            Phase::Idle | Phase::TornDown => std::future::pending().await,
        }
    }

    /// Clear the flag and forget the observed length, as for a new game.
    /// Returns `Some(false)` if the flag was up.
    pub fn reset(&mut self) -> Option<bool> {
        if self.phase == Phase::TornDown {
            return None;
        }
        self.phase = Phase::Idle;
        self.seen_len = 0;
        self.set(false)
    }

    /// Cancel any pending transition. The flag is never touched again.
    pub fn teardown(&mut self) {
        self.phase = Phase::TornDown;
    }

    fn set(&mut self, value: bool) -> Option<bool> {
        if self.is_animating == value {
            return None;
        }
        self.is_animating = value;
        Some(value)
    }
}

impl Default for AnimationScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
