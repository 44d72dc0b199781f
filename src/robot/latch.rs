//! Timestamp based latches and cooldowns.
//!
//! Nothing here schedules a timer. State is re-evaluated against the clock
//! every time it is consulted, so there is never a pending reset that could
//! race a newer trip.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// A hazard latch. Armed until tripped, then disarmed for `settle`.
///
/// A latch built with [Latch::until_clear] also stays disarmed until the
/// hazard has been reported gone at least once since the trip, so a hazard
/// that never clears cannot trip it twice.
#[derive(Debug)]
pub struct Latch {
    settle: Duration,
    needs_clear: bool,
    state: Mutex<LatchState>,
}

#[derive(Debug, Default)]
struct LatchState {
    tripped_at: Option<Instant>,
    cleared: bool,
}

impl Latch {
    pub fn new(settle: Duration) -> Self {
        Latch {
            settle,
            needs_clear: false,
            state: Mutex::new(LatchState::default()),
        }
    }

    /// A latch that re-arms only after `settle` has passed and
    /// [Latch::observe_clear] has been called since the last trip.
    pub fn until_clear(settle: Duration) -> Self {
        Latch {
            needs_clear: true,
            ..Latch::new(settle)
        }
    }

    /// True when the latch may trip again.
    pub fn is_armed(&self) -> bool {
        let state = self.state.lock();
        self.armed(&state, Instant::now())
    }

    /// True once the settle time since the last trip has passed, whether or
    /// not the hazard has cleared.
    pub fn is_settled(&self) -> bool {
        let state = self.state.lock();
        self.settled(&state, Instant::now())
    }

    /// Trips the latch if it is armed.
    ///
    /// Returns true only for the caller that actually tripped it, so
    /// concurrent callers cannot both react to the same hazard.
    pub fn try_trip(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        if !self.armed(&state, now) {
            return false;
        }
        state.tripped_at = Some(now);
        state.cleared = false;
        true
    }

    /// Records a reading without the hazard.
    pub fn observe_clear(&self) {
        self.state.lock().cleared = true;
    }

    /// Time left until the latch settles.
    pub fn remaining(&self) -> Duration {
        match self.state.lock().tripped_at {
            Some(t) => self.settle.saturating_sub(Instant::now().duration_since(t)),
            None => Duration::ZERO,
        }
    }

    fn settled(&self, state: &LatchState, now: Instant) -> bool {
        match state.tripped_at {
            Some(t) => now.duration_since(t) >= self.settle,
            None => true,
        }
    }

    fn armed(&self, state: &LatchState, now: Instant) -> bool {
        match state.tripped_at {
            Some(_) if self.needs_clear && !state.cleared => false,
            _ => self.settled(state, now),
        }
    }
}

/// Lets something happen at most once per `period`.
#[derive(Debug)]
pub struct Cooldown {
    period: Duration,
    last: Mutex<Option<Instant>>,
}

impl Cooldown {
    pub fn new(period: Duration) -> Self {
        Cooldown {
            period,
            last: Mutex::new(None),
        }
    }

    /// Returns true, and restarts the cooldown, if the period has passed.
    pub fn try_acquire(&self) -> bool {
        let mut last = self.last.lock();
        let now = Instant::now();
        match *last {
            Some(t) if now.duration_since(t) < self.period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
