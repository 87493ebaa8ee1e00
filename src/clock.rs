//! # Clock Module
//!
//! Time sources used by the schedule and the transceiver.
//!
//! ## Architecture
//!
//! - **Clock**: anything that can report the local time as an `embassy_time::Instant`
//! - **SystemClock**: the embassy time driver (`Instant::now()`)
//! - **RemoteClock**: wraps a local clock and applies the skew towards the cell's
//!   reference clock (the base station's clock)
//! - **MockClock** (std only): a shared, manually advanced clock for tests and simulation
//!
//! ## Skew
//!
//! The skew is a single point estimate: `remote - local` in microseconds, measured the
//! moment a base station announcement is applied. Marking the remote time again replaces
//! the estimate outright; there is no filtering.

use embassy_time::{Duration, Instant};

/// Source of local time
pub trait Clock {
    /// Returns the current local time
    fn now(&self) -> Instant;
}

/// Clock backed by the embassy time driver
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Local clock corrected by the estimated skew towards the cell's reference clock
///
/// All slot arithmetic in the schedule goes through `RemoteClock::now()`, never through
/// the raw local clock.
#[derive(Clone)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RemoteClock<C: Clock> {
    local: C,
    skew_us: i64,
}

impl<C: Clock> RemoteClock<C> {
    /// Creates a remote clock with zero skew
    pub const fn new(local: C) -> Self {
        RemoteClock { local, skew_us: 0 }
    }

    /// Current time on the remote (cell) clock
    ///
    /// Saturates at zero if a negative skew would move the time before the epoch.
    pub fn now(&self) -> Instant {
        apply_skew(self.local.now(), self.skew_us)
    }

    /// Current time on the local clock
    pub fn local_now(&self) -> Instant {
        self.local.now()
    }

    /// Records that the remote clock reads `remote_time` right now
    ///
    /// # Arguments
    /// * `remote_time` - Time announced by the remote side
    pub fn mark_remote_time(&mut self, remote_time: Instant) {
        let local_us = self.local.now().as_micros() as i64;
        self.skew_us = (remote_time.as_micros() as i64).saturating_sub(local_us);
    }

    /// Estimated `remote - local` offset in microseconds
    pub fn skew_us(&self) -> i64 {
        self.skew_us
    }

    /// Converts a remote time back to local time
    pub fn to_local(&self, remote_time: Instant) -> Instant {
        apply_skew(remote_time, self.skew_us.saturating_neg())
    }

    /// Access to the wrapped local clock
    pub fn local(&self) -> &C {
        &self.local
    }
}

fn apply_skew(time: Instant, skew_us: i64) -> Instant {
    let shifted = (time.as_micros() as i64).saturating_add(skew_us);
    Instant::from_micros(shifted.max(0) as u64)
}

#[cfg(feature = "std")]
pub use mock::MockClock;

#[cfg(feature = "std")]
mod mock {
    use super::{Clock, Duration, Instant};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Manually driven clock for host tests and simulations
    ///
    /// Clones share the same underlying time, so a radio simulation and the
    /// transceiver observe the same instant.
    #[derive(Clone, Debug, Default)]
    pub struct MockClock {
        now_us: Rc<Cell<u64>>,
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, time: Instant) {
            self.now_us.set(time.as_micros());
        }

        pub fn set_micros(&self, micros: u64) {
            self.now_us.set(micros);
        }

        pub fn advance(&self, by: Duration) {
            self.now_us.set(self.now_us.get().saturating_add(by.as_micros()));
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            Instant::from_micros(self.now_us.get())
        }
    }
}
