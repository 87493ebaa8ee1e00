//! # Frame Module
//!
//! Pure data describing the time-slot layout of a TDMA cell.
//!
//! ## Layout
//!
//! A frame is one full repeating cycle. It starts at `frame_start_time_us` on the cell's
//! reference clock and repeats every `frame_duration_us`. The slots are dense: every slot
//! starts where the previous one ended, the first at offset 0. Time between the end of
//! the last slot and the end of the frame is governed by the frame's default role.
//!
//! ```text
//! |<-- NodeTx(A) -->|<- Guard ->|<-- Association -->|<- Guard ->|<- default ->|
//! 0                                                                  frame_duration
//! ```
//!
//! Frames are built with [`FrameBuilder`], or received from the base station as a
//! [`super::FrameAnnouncement`].

use heapless::Vec;

use crate::{BROADCAST_ID, MAX_TIME_SLOTS, NodeId};

const _: () = assert!(MAX_TIME_SLOTS >= 4, "the default base station frame needs four slots");

/// Duration of the single guard interval in the default node frame
pub const DEFAULT_NODE_GUARD_US: u32 = 100_000;
/// Transmit slot length in the default base station frame
pub const DEFAULT_BASE_STATION_TX_US: u32 = 100_000;
/// Association slot length in the default base station frame
pub const DEFAULT_ASSOCIATION_US: u32 = 100_000;
/// Guard interval length in the default base station frame
pub const DEFAULT_GUARD_US: u32 = 10_000;

/// What a time slot is used for
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
#[repr(u8)]
pub enum Role {
    /// Nobody transmits and nobody listens
    Blackout = 0,
    /// Only the slot owner transmits; everyone else listens
    NodeTx = 1,
    /// Unassociated nodes announce themselves; the base station listens
    Association = 2,
    /// Buffer that absorbs clock skew; everyone listens
    GuardInterval = 3,
}

impl Role {
    /// Decodes the wire representation of a role
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Role::Blackout),
            1 => Some(Role::NodeTx),
            2 => Some(Role::Association),
            3 => Some(Role::GuardInterval),
            _ => None,
        }
    }

    /// Roles that may govern the time after the last slot of a frame
    pub const fn is_valid_default(self) -> bool {
        matches!(self, Role::Blackout | Role::GuardInterval)
    }
}

/// A contiguous interval within a frame
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct TimeSlot {
    /// Offset from the start of the frame
    pub start_us: u32,
    pub duration_us: u32,
    pub role: Role,
    /// Owning node for `NodeTx` slots, `BROADCAST_ID` otherwise
    pub owner: NodeId,
}

impl TimeSlot {
    /// Offset of the first microsecond after this slot
    pub fn end_us(&self) -> u32 {
        self.start_us.saturating_add(self.duration_us)
    }

    fn contains(&self, offset_us: u32) -> bool {
        offset_us >= self.start_us && offset_us < self.end_us()
    }
}

/// Errors reported when a frame cannot be built
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum FrameError {
    /// Neither slots nor an explicit duration were given
    EmptyFrame,
    /// More than `MAX_TIME_SLOTS` slots were added
    TooManySlots,
    /// The default role must be `Blackout` or `GuardInterval`
    InvalidDefaultRole,
    /// The explicit frame duration is shorter than the sum of its slots
    DurationTooShort,
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::EmptyFrame => write!(f, "frame has no time slots and no duration"),
            FrameError::TooManySlots => write!(f, "frame has more than {} time slots", MAX_TIME_SLOTS),
            FrameError::InvalidDefaultRole => write!(f, "default role must be blackout or guard interval"),
            FrameError::DurationTooShort => write!(f, "frame duration is shorter than its time slots"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}

/// One full repeating cycle of time slots
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct Frame {
    pub(crate) frame_start_time_us: u64,
    pub(crate) frame_duration_us: u32,
    pub(crate) time_slots: Vec<TimeSlot, MAX_TIME_SLOTS>,
    pub(crate) default_role: Role,
    pub(crate) base_station_id: NodeId,
}

impl Frame {
    /// Frame used by a node that has not heard from a base station yet
    ///
    /// A single guard interval, so the node listens continuously.
    pub fn default_node_frame() -> Self {
        let mut frame = Frame {
            frame_start_time_us: 0,
            frame_duration_us: 0,
            time_slots: Vec::new(),
            default_role: Role::GuardInterval,
            base_station_id: BROADCAST_ID,
        };
        let _ = frame.time_slots.push(unowned_slot(DEFAULT_NODE_GUARD_US, Role::GuardInterval));
        pack_frame_times(&mut frame);
        frame
    }

    /// Frame a base station starts out with
    ///
    /// The base station transmits, then a guard interval, an association window and a
    /// trailing guard interval.
    pub fn default_base_station_frame(base_station_id: NodeId) -> Self {
        let mut frame = Frame {
            frame_start_time_us: 0,
            frame_duration_us: 0,
            time_slots: Vec::new(),
            default_role: Role::GuardInterval,
            base_station_id,
        };
        let _ = frame.time_slots.extend_from_slice(&[
            TimeSlot {
                start_us: 0,
                duration_us: DEFAULT_BASE_STATION_TX_US,
                role: Role::NodeTx,
                owner: base_station_id,
            },
            unowned_slot(DEFAULT_GUARD_US, Role::GuardInterval),
            unowned_slot(DEFAULT_ASSOCIATION_US, Role::Association),
            unowned_slot(DEFAULT_GUARD_US, Role::GuardInterval),
        ]);
        pack_frame_times(&mut frame);
        frame
    }

    /// Start of the frame on the cell's reference clock, in microseconds
    pub fn frame_start_time_us(&self) -> u64 {
        self.frame_start_time_us
    }

    pub fn frame_duration_us(&self) -> u32 {
        self.frame_duration_us
    }

    pub fn time_slots(&self) -> &[TimeSlot] {
        &self.time_slots
    }

    pub fn default_role(&self) -> Role {
        self.default_role
    }

    pub fn base_station_id(&self) -> NodeId {
        self.base_station_id
    }

    /// Sum of all slot durations
    pub fn slots_duration_us(&self) -> u32 {
        self.time_slots.iter().fold(0u32, |total, slot| total.saturating_add(slot.duration_us))
    }

    /// Finds the slot covering `offset_us` by linear scan
    ///
    /// # Returns
    /// * `Some(slot)` if a slot covers the offset
    /// * `None` if the offset lies beyond the last slot (the default role applies)
    pub fn slot_at(&self, offset_us: u32) -> Option<&TimeSlot> {
        self.time_slots.iter().find(|slot| slot.contains(offset_us))
    }

    /// True if `id` owns at least one `NodeTx` slot
    pub fn has_node_tx_slot(&self, id: NodeId) -> bool {
        self.time_slots.iter().any(|slot| slot.role == Role::NodeTx && slot.owner == id)
    }
}

fn unowned_slot(duration_us: u32, role: Role) -> TimeSlot {
    TimeSlot {
        start_us: 0,
        duration_us,
        role,
        owner: BROADCAST_ID,
    }
}

/// Recomputes slot start offsets from their durations
///
/// Slot `i + 1` starts where slot `i` ends, the first slot at 0. The frame duration is
/// raised to the sum of the slot durations if it was shorter.
pub fn pack_frame_times(frame: &mut Frame) {
    let mut next_start: u32 = 0;
    for slot in frame.time_slots.iter_mut() {
        slot.start_us = next_start;
        next_start = next_start.saturating_add(slot.duration_us);
    }
    frame.frame_duration_us = frame.frame_duration_us.max(next_start);
}

/// Incremental construction of a [`Frame`]
///
/// # Example
/// ```rust
/// use tdma_radio_lib::tdma::{FrameBuilder, Role};
///
/// let frame = FrameBuilder::new(0)
///     .base_station_id(1)
///     .add_node_tx_slot(1_000, 1)
///     .add_guard_interval(100)
///     .add_node_tx_slot(1_000, 2)
///     .build()
///     .unwrap();
/// assert_eq!(frame.frame_duration_us(), 2_100);
/// assert_eq!(frame.time_slots()[2].role, Role::NodeTx);
/// ```
#[cfg_attr(feature = "std", derive(Debug))]
pub struct FrameBuilder {
    frame_start_time_us: u64,
    frame_duration_us: Option<u32>,
    time_slots: Vec<TimeSlot, MAX_TIME_SLOTS>,
    default_role: Role,
    base_station_id: NodeId,
    overflowed: bool,
}

impl FrameBuilder {
    pub fn new(frame_start_time_us: u64) -> Self {
        FrameBuilder {
            frame_start_time_us,
            frame_duration_us: None,
            time_slots: Vec::new(),
            default_role: Role::GuardInterval,
            base_station_id: BROADCAST_ID,
            overflowed: false,
        }
    }

    pub fn base_station_id(mut self, id: NodeId) -> Self {
        self.base_station_id = id;
        self
    }

    pub fn default_role(mut self, role: Role) -> Self {
        self.default_role = role;
        self
    }

    /// Makes the frame longer than its slots; the tail is governed by the default role
    pub fn frame_duration_us(mut self, duration_us: u32) -> Self {
        self.frame_duration_us = Some(duration_us);
        self
    }

    pub fn add_guard_interval(self, duration_us: u32) -> Self {
        self.add_slot(unowned_slot(duration_us, Role::GuardInterval))
    }

    pub fn add_node_tx_slot(self, duration_us: u32, owner: NodeId) -> Self {
        self.add_slot(TimeSlot {
            start_us: 0,
            duration_us,
            role: Role::NodeTx,
            owner,
        })
    }

    pub fn add_association_slot(self, duration_us: u32) -> Self {
        self.add_slot(unowned_slot(duration_us, Role::Association))
    }

    pub fn add_blackout_slot(self, duration_us: u32) -> Self {
        self.add_slot(unowned_slot(duration_us, Role::Blackout))
    }

    fn add_slot(mut self, slot: TimeSlot) -> Self {
        if self.time_slots.push(slot).is_err() {
            self.overflowed = true;
        }
        self
    }

    /// Validates the collected slots and produces the frame
    pub fn build(self) -> Result<Frame, FrameError> {
        if self.overflowed {
            return Err(FrameError::TooManySlots);
        }
        if !self.default_role.is_valid_default() {
            return Err(FrameError::InvalidDefaultRole);
        }
        if self.time_slots.is_empty() && self.frame_duration_us.is_none() {
            return Err(FrameError::EmptyFrame);
        }

        let mut frame = Frame {
            frame_start_time_us: self.frame_start_time_us,
            frame_duration_us: self.frame_duration_us.unwrap_or(0),
            time_slots: self.time_slots,
            default_role: self.default_role,
            base_station_id: self.base_station_id,
        };
        if let Some(duration_us) = self.frame_duration_us {
            if duration_us < frame.slots_duration_us() {
                return Err(FrameError::DurationTooShort);
            }
        }
        pack_frame_times(&mut frame);
        Ok(frame)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn builder_packs_slots_densely() {
        let frame = FrameBuilder::new(500)
            .add_node_tx_slot(1_000, 7)
            .add_guard_interval(200)
            .add_association_slot(3_000)
            .add_blackout_slot(50)
            .build()
            .unwrap();

        let starts: std::vec::Vec<u32> = frame.time_slots().iter().map(|s| s.start_us).collect();
        assert_eq!(starts, vec![0, 1_000, 1_200, 4_200]);
        for pair in frame.time_slots().windows(2) {
            assert_eq!(pair[0].end_us(), pair[1].start_us);
        }
        assert_eq!(frame.frame_duration_us(), 4_250);
        assert_eq!(frame.frame_start_time_us(), 500);
    }

    #[test]
    fn empty_builder_is_rejected() {
        assert_eq!(FrameBuilder::new(0).build(), Err(FrameError::EmptyFrame));
    }

    #[test]
    fn explicit_duration_without_slots_is_allowed() {
        let frame = FrameBuilder::new(0).frame_duration_us(10_000).default_role(Role::Blackout).build().unwrap();
        assert!(frame.time_slots().is_empty());
        assert_eq!(frame.frame_duration_us(), 10_000);
        assert_eq!(frame.slot_at(5_000), None);
    }

    #[test]
    fn invalid_default_role_is_rejected() {
        let result = FrameBuilder::new(0).add_guard_interval(10).default_role(Role::NodeTx).build();
        assert_eq!(result, Err(FrameError::InvalidDefaultRole));
    }

    #[test]
    fn too_short_explicit_duration_is_rejected() {
        let result = FrameBuilder::new(0).add_guard_interval(1_000).frame_duration_us(999).build();
        assert_eq!(result, Err(FrameError::DurationTooShort));
    }

    #[test]
    fn too_many_slots_is_rejected() {
        let mut builder = FrameBuilder::new(0);
        for _ in 0..=MAX_TIME_SLOTS {
            builder = builder.add_guard_interval(1);
        }
        assert_eq!(builder.build(), Err(FrameError::TooManySlots));
    }

    #[test]
    fn default_node_frame_is_one_guard_interval() {
        let frame = Frame::default_node_frame();
        assert_eq!(frame.time_slots().len(), 1);
        assert_eq!(frame.time_slots()[0].role, Role::GuardInterval);
        assert_eq!(frame.frame_duration_us(), DEFAULT_NODE_GUARD_US);
        assert_eq!(frame.base_station_id(), BROADCAST_ID);
    }

    #[test]
    fn default_base_station_frame_layout() {
        let frame = Frame::default_base_station_frame(3);
        let roles: std::vec::Vec<Role> = frame.time_slots().iter().map(|s| s.role).collect();
        assert_eq!(roles, vec![Role::NodeTx, Role::GuardInterval, Role::Association, Role::GuardInterval]);
        assert_eq!(frame.time_slots()[0].owner, 3);
        assert_eq!(frame.frame_duration_us(), 220_000);
        assert!(frame.has_node_tx_slot(3));
        assert!(!frame.has_node_tx_slot(4));
    }

    #[test]
    fn slot_lookup_uses_half_open_intervals() {
        let frame = FrameBuilder::new(0).add_node_tx_slot(1_000, 1).add_guard_interval(500).build().unwrap();
        assert_eq!(frame.slot_at(0).map(|s| s.role), Some(Role::NodeTx));
        assert_eq!(frame.slot_at(999).map(|s| s.role), Some(Role::NodeTx));
        assert_eq!(frame.slot_at(1_000).map(|s| s.role), Some(Role::GuardInterval));
        assert_eq!(frame.slot_at(1_500), None);
    }

    #[test]
    fn role_wire_values() {
        for role in [Role::Blackout, Role::NodeTx, Role::Association, Role::GuardInterval] {
            assert_eq!(Role::from_u8(role as u8), Some(role));
        }
        assert_eq!(Role::from_u8(4), None);
    }
}
