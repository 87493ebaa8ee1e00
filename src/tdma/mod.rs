//! # TDMA Module
//!
//! Time division of the shared channel.
//!
//! - `frame`: the slot layout of a cell and how to build one
//! - `schedule`: TX/RX decisions from the skew-compensated cell clock
//! - `frame_announcement`: the configuration broadcast carrying a frame

pub mod frame;
pub mod frame_announcement;
pub mod schedule;

pub use frame::{Frame, FrameBuilder, FrameError, Role, TimeSlot, pack_frame_times};
pub use frame_announcement::{FrameAnnouncement, FrameCodecError, MAX_ANNOUNCEMENT_SIZE};
pub use schedule::{Schedule, SlotPosition};
