//! # Schedule Module
//!
//! Decides, from the skew-compensated cell time, whether the local node may transmit or
//! must listen right now.
//!
//! ## Architecture
//!
//! The schedule holds only three pieces of state: the node's own id, the installed
//! [`Frame`] and a [`RemoteClock`] carrying the skew towards the base station. Every
//! answer is a pure function of "where are we in the frame right now":
//!
//! ```text
//! offset = (cell_now - frame_start) rem_euclid frame_duration
//! ```
//!
//! The offset is located against the slot list by linear scan. Frames hold a handful of
//! slots, so the scan is cheaper than any index. An offset past the last slot falls back
//! to the frame's default role, so every offset has a defined role.
//!
//! ## Role Rules
//!
//! | Role          | can_transmit                            | should_receive      |
//! |---------------|-----------------------------------------|---------------------|
//! | Blackout      | false                                   | false               |
//! | NodeTx        | owner == self                           | owner != self       |
//! | Association   | !self_associated && !base_station       | base_station        |
//! | GuardInterval | false                                   | true                |

use embassy_time::{Duration, Instant};

use super::frame::{Frame, Role};
use crate::NodeId;
use crate::clock::{Clock, RemoteClock};

/// Where in the frame the cell clock currently is
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct SlotPosition {
    pub role: Role,
    /// `None` for the default-role region and for unowned slots
    pub owner: Option<NodeId>,
    pub frame_offset_us: u32,
    pub slot_start_us: u32,
    pub slot_duration_us: u32,
}

impl SlotPosition {
    pub fn slot_offset_us(&self) -> u32 {
        self.frame_offset_us.saturating_sub(self.slot_start_us)
    }

    pub fn slot_remaining_us(&self) -> u32 {
        self.slot_duration_us.saturating_sub(self.slot_offset_us())
    }
}

/// TDMA schedule of one node
pub struct Schedule<C: Clock> {
    clock: RemoteClock<C>,
    id: NodeId,
    frame: Frame,
}

impl<C: Clock> Schedule<C> {
    /// Creates a schedule running the default node frame
    ///
    /// # Arguments
    /// * `clock` - Local time source
    /// * `id` - This node's id
    pub fn new(clock: C, id: NodeId) -> Self {
        Self::with_frame(clock, id, Frame::default_node_frame())
    }

    pub fn with_frame(clock: C, id: NodeId, frame: Frame) -> Self {
        Schedule {
            clock: RemoteClock::new(clock),
            id,
            frame,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn set_id(&mut self, id: NodeId) {
        self.id = id;
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Installs a new frame; takes effect on the next query
    pub fn set_frame(&mut self, frame: Frame) {
        self.frame = frame;
    }

    /// True if this node is the base station of the installed frame
    pub fn is_base_station(&self) -> bool {
        self.frame.base_station_id() == self.id
    }

    /// True iff `id` owns some `NodeTx` slot of the installed frame
    pub fn is_associated(&self, id: NodeId) -> bool {
        self.frame.has_node_tx_slot(id)
    }

    pub fn is_self_associated(&self) -> bool {
        self.is_associated(self.id)
    }

    /// Current time on the cell's reference clock
    pub fn cell_time(&self) -> Instant {
        self.clock.now()
    }

    /// Records that the cell's reference clock reads `cell_time` right now
    pub fn mark_cell_time(&mut self, cell_time: Instant) {
        self.clock.mark_remote_time(cell_time);
    }

    pub fn clock(&self) -> &RemoteClock<C> {
        &self.clock
    }

    /// Locates the current cell time within the frame
    pub fn position(&self) -> SlotPosition {
        let frame_offset_us = self.frame_offset_us();
        match self.frame.slot_at(frame_offset_us) {
            Some(slot) => SlotPosition {
                role: slot.role,
                owner: match slot.role {
                    Role::NodeTx => Some(slot.owner),
                    _ => None,
                },
                frame_offset_us,
                slot_start_us: slot.start_us,
                slot_duration_us: slot.duration_us,
            },
            None => {
                let slots_end_us = self.frame.slots_duration_us();
                SlotPosition {
                    role: self.frame.default_role(),
                    owner: None,
                    frame_offset_us,
                    slot_start_us: slots_end_us,
                    slot_duration_us: self.frame.frame_duration_us().saturating_sub(slots_end_us),
                }
            }
        }
    }

    fn frame_offset_us(&self) -> u32 {
        let frame_duration = self.frame.frame_duration_us() as i128;
        if frame_duration == 0 {
            return 0;
        }
        let elapsed = self.clock.now().as_micros() as i128 - self.frame.frame_start_time_us() as i128;
        elapsed.rem_euclid(frame_duration) as u32
    }

    pub fn can_transmit(&self) -> bool {
        let position = self.position();
        match position.role {
            Role::Blackout => false,
            Role::NodeTx => position.owner == Some(self.id),
            Role::Association => !self.is_self_associated() && !self.is_base_station(),
            Role::GuardInterval => false,
        }
    }

    pub fn should_receive(&self) -> bool {
        let position = self.position();
        match position.role {
            Role::Blackout => false,
            Role::NodeTx => position.owner != Some(self.id),
            Role::Association => self.is_base_station(),
            Role::GuardInterval => true,
        }
    }

    pub fn time_slot_role(&self) -> Role {
        self.position().role
    }

    pub fn time_slot_owner(&self) -> Option<NodeId> {
        self.position().owner
    }

    pub fn frame_offset(&self) -> Duration {
        Duration::from_micros(self.frame_offset_us() as u64)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame.frame_duration_us() as u64)
    }

    pub fn frame_duration_remaining(&self) -> Duration {
        let remaining = self.frame.frame_duration_us().saturating_sub(self.frame_offset_us());
        Duration::from_micros(remaining as u64)
    }

    pub fn time_slot_offset(&self) -> Duration {
        Duration::from_micros(self.position().slot_offset_us() as u64)
    }

    pub fn time_slot_duration(&self) -> Duration {
        Duration::from_micros(self.position().slot_duration_us as u64)
    }

    /// Time left until the current slot ends
    pub fn time_slot_duration_remaining(&self) -> Duration {
        Duration::from_micros(self.position().slot_remaining_us() as u64)
    }
}
