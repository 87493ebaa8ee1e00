//! # Priority Transmit Queue
//!
//! Four FIFO lanes competing for the single transmit opportunity of a time slot.
//!
//! ## Architecture
//!
//! | Lane      | Weight                     |
//! |-----------|----------------------------|
//! | Immediate | preemptive, always first   |
//! | Control   | 100                        |
//! | Normal    | 10                         |
//! | Low       | 1                          |
//!
//! `peek` serves the Immediate lane whenever it holds anything. Otherwise it draws a
//! uniform random number in `[0, 111)` and picks the lane whose cumulative weight range
//! contains it. If that lane is empty, the next lower lane is tried (Low wraps around to
//! Control), so an empty lane never stalls the queue. Over many draws with all lanes busy,
//! Control, Normal and Low are served in the ratio 100:10:1.
//!
//! `peek` does not remove anything. The caller commits the removal with `pop`, passing
//! the handle returned by the preceding `peek`.
//!
//! ## Backpressure
//!
//! Each lane is a fixed-capacity ring buffer. A push onto a full lane is rejected and the
//! item is handed back; queued items are never displaced.

use heapless::Deque;
use log::{Level, log};
use rand_core::{RngCore, SeedableRng};
use rand_wyrand::WyRand;

pub const CONTROL_WEIGHT: u32 = 100;
pub const NORMAL_WEIGHT: u32 = 10;
pub const LOW_WEIGHT: u32 = 1;
const TOTAL_WEIGHT: u32 = CONTROL_WEIGHT + NORMAL_WEIGHT + LOW_WEIGHT;

const LANE_COUNT: usize = 4;
const WEIGHTED_LANES: [Priority; 3] = [Priority::Control, Priority::Normal, Priority::Low];

/// Transmit priority class
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
#[repr(u8)]
pub enum Priority {
    Immediate = 0,
    Control = 1,
    Normal = 2,
    Low = 3,
}

/// Identifies the lane chosen by the last `peek`
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct PeekHandle {
    priority: Priority,
}

impl PeekHandle {
    pub fn priority(&self) -> Priority {
        self.priority
    }
}

/// A push was rejected because the lane is full
#[cfg_attr(feature = "std", derive(Debug))]
pub struct QueueFullError<T> {
    pub priority: Priority,
    /// The rejected item
    pub item: T,
}

impl<T> core::fmt::Display for QueueFullError<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "transmit queue lane {} is full", self.priority as u8)
    }
}

#[cfg(feature = "std")]
impl<T: core::fmt::Debug> std::error::Error for QueueFullError<T> {}

/// Weighted four-lane transmit queue holding up to `N` items per lane
pub struct PacketTxQueue<T, const N: usize> {
    lanes: [Deque<T, N>; LANE_COUNT],
    rng: WyRand,
}

impl<T, const N: usize> PacketTxQueue<T, N> {
    /// Creates an empty queue
    ///
    /// # Arguments
    /// * `rng_seed` - Seed for the weighted lane selection
    pub fn new(rng_seed: u64) -> Self {
        PacketTxQueue {
            lanes: [Deque::new(), Deque::new(), Deque::new(), Deque::new()],
            rng: WyRand::seed_from_u64(rng_seed),
        }
    }

    /// Appends `item` to the lane of `priority`
    ///
    /// # Returns
    /// * `Ok(())` if the item was queued
    /// * `Err(QueueFullError)` carrying the item if the lane is full
    pub fn push(&mut self, priority: Priority, item: T) -> Result<(), QueueFullError<T>> {
        self.lanes[priority as usize].push_back(item).map_err(|item| {
            log!(Level::Warn, "TX queue lane {} full, dropping newest packet", priority as u8);
            QueueFullError { priority, item }
        })
    }

    pub fn push_immediate(&mut self, item: T) -> Result<(), QueueFullError<T>> {
        self.push(Priority::Immediate, item)
    }

    pub fn push_control(&mut self, item: T) -> Result<(), QueueFullError<T>> {
        self.push(Priority::Control, item)
    }

    pub fn push_normal(&mut self, item: T) -> Result<(), QueueFullError<T>> {
        self.push(Priority::Normal, item)
    }

    pub fn push_low(&mut self, item: T) -> Result<(), QueueFullError<T>> {
        self.push(Priority::Low, item)
    }

    /// Selects the next item to transmit without removing it
    pub fn peek(&mut self) -> Option<(PeekHandle, &T)> {
        if !self.lanes[Priority::Immediate as usize].is_empty() {
            return self.head_of(Priority::Immediate);
        }
        if WEIGHTED_LANES.iter().all(|lane| self.lanes[*lane as usize].is_empty()) {
            return None;
        }

        let draw = self.rng.next_u32() % TOTAL_WEIGHT;
        let start = if draw < CONTROL_WEIGHT {
            0
        } else if draw < CONTROL_WEIGHT + NORMAL_WEIGHT {
            1
        } else {
            2
        };

        let lane = (0..WEIGHTED_LANES.len())
            .map(|step| WEIGHTED_LANES[(start + step) % WEIGHTED_LANES.len()])
            .find(|lane| !self.lanes[*lane as usize].is_empty())?;
        self.head_of(lane)
    }

    fn head_of(&self, priority: Priority) -> Option<(PeekHandle, &T)> {
        self.lanes[priority as usize].front().map(|item| (PeekHandle { priority }, item))
    }

    /// Removes the item returned by the preceding `peek`
    pub fn pop(&mut self, handle: PeekHandle) -> Option<T> {
        self.lanes[handle.priority as usize].pop_front()
    }

    /// Total number of queued items
    pub fn size(&self) -> usize {
        self.lanes.iter().map(|lane| lane.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(|lane| lane.is_empty())
    }

    pub fn lane_size(&self, priority: Priority) -> usize {
        self.lanes[priority as usize].len()
    }

    /// Capacity of each lane
    pub const fn lane_capacity(&self) -> usize {
        N
    }
}
