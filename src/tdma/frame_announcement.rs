//! # Frame Announcement Module
//!
//! Encoding of the configuration broadcast a base station sends to its cell.
//!
//! ## Wire Format
//!
//! All integers are little-endian.
//!
//! | Bytes | Field                                    |
//! |-------|------------------------------------------|
//! | 0-7   | time announced (cell clock, us)          |
//! | 8-15  | frame start time (cell clock, us)        |
//! | 16-19 | frame duration (us)                      |
//! | 20    | base station id                          |
//! | 21    | default role                             |
//! | 22    | slot count                               |
//! | 23..  | per slot: duration (4), role (1), owner (1) |
//!
//! Slot start offsets are not transmitted. The decoder rebuilds them by summing the
//! durations of the preceding slots.

use embassy_time::Instant;
use heapless::Vec;

use super::frame::{Frame, Role, TimeSlot, pack_frame_times};
use crate::MAX_TIME_SLOTS;

const FIXED_PART_SIZE: usize = 23;
const SLOT_SIZE: usize = 6;

/// Largest possible encoded announcement
pub const MAX_ANNOUNCEMENT_SIZE: usize = FIXED_PART_SIZE + MAX_TIME_SLOTS * SLOT_SIZE;

/// Errors while encoding or decoding an announcement
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum FrameCodecError {
    BufferTooSmall,
    Truncated,
    InvalidRole(u8),
    InvalidDefaultRole,
    TooManySlots,
    TrailingBytes,
}

impl core::fmt::Display for FrameCodecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameCodecError::BufferTooSmall => write!(f, "buffer too small for frame announcement"),
            FrameCodecError::Truncated => write!(f, "frame announcement is truncated"),
            FrameCodecError::InvalidRole(role) => write!(f, "invalid time slot role {}", role),
            FrameCodecError::InvalidDefaultRole => write!(f, "invalid default role"),
            FrameCodecError::TooManySlots => write!(f, "frame announcement has more than {} slots", MAX_TIME_SLOTS),
            FrameCodecError::TrailingBytes => write!(f, "unexpected bytes after frame announcement"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameCodecError {}

/// A frame together with the cell time at which it was announced
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct FrameAnnouncement {
    pub time_announced: Instant,
    pub frame: Frame,
}

impl FrameAnnouncement {
    pub fn new(time_announced: Instant, frame: Frame) -> Self {
        FrameAnnouncement { time_announced, frame }
    }

    /// Number of bytes `encode` will write
    pub fn encoded_len(&self) -> usize {
        FIXED_PART_SIZE + self.frame.time_slots().len() * SLOT_SIZE
    }

    /// Writes the announcement into `buf`
    ///
    /// # Returns
    /// * `Ok(len)` - Number of bytes written
    /// * `Err(FrameCodecError::BufferTooSmall)` - `buf` cannot hold the announcement
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, FrameCodecError> {
        let len = self.encoded_len();
        if buf.len() < len {
            return Err(FrameCodecError::BufferTooSmall);
        }

        let frame = &self.frame;
        buf[0..8].copy_from_slice(&self.time_announced.as_micros().to_le_bytes());
        buf[8..16].copy_from_slice(&frame.frame_start_time_us().to_le_bytes());
        buf[16..20].copy_from_slice(&frame.frame_duration_us().to_le_bytes());
        buf[20] = frame.base_station_id();
        buf[21] = frame.default_role() as u8;
        buf[22] = frame.time_slots().len() as u8;

        for (slot, chunk) in frame.time_slots().iter().zip(buf[FIXED_PART_SIZE..len].chunks_exact_mut(SLOT_SIZE)) {
            chunk[0..4].copy_from_slice(&slot.duration_us.to_le_bytes());
            chunk[4] = slot.role as u8;
            chunk[5] = slot.owner;
        }

        Ok(len)
    }

    /// Overwrites the announcement time of an already encoded announcement
    ///
    /// Lets the sender stamp the moment the announcement actually goes on air rather than
    /// the moment it was queued.
    pub fn restamp(buf: &mut [u8], time_announced: Instant) -> Result<(), FrameCodecError> {
        let field = buf.get_mut(0..8).ok_or(FrameCodecError::Truncated)?;
        field.copy_from_slice(&time_announced.as_micros().to_le_bytes());
        Ok(())
    }

    /// Parses an announcement
    ///
    /// The whole of `buf` must be consumed; extra bytes are an error.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameCodecError> {
        if buf.len() < FIXED_PART_SIZE {
            return Err(FrameCodecError::Truncated);
        }

        let time_announced = u64::from_le_bytes(read_array(&buf[0..8]));
        let frame_start_time_us = u64::from_le_bytes(read_array(&buf[8..16]));
        let frame_duration_us = u32::from_le_bytes(read_array(&buf[16..20]));
        let base_station_id = buf[20];
        let default_role = Role::from_u8(buf[21]).ok_or(FrameCodecError::InvalidDefaultRole)?;
        if !default_role.is_valid_default() {
            return Err(FrameCodecError::InvalidDefaultRole);
        }
        let slot_count = buf[22] as usize;
        if slot_count > MAX_TIME_SLOTS {
            return Err(FrameCodecError::TooManySlots);
        }

        let expected_len = FIXED_PART_SIZE + slot_count * SLOT_SIZE;
        if buf.len() < expected_len {
            return Err(FrameCodecError::Truncated);
        }
        if buf.len() > expected_len {
            return Err(FrameCodecError::TrailingBytes);
        }

        let mut time_slots: Vec<TimeSlot, MAX_TIME_SLOTS> = Vec::new();
        for chunk in buf[FIXED_PART_SIZE..expected_len].chunks_exact(SLOT_SIZE) {
            let role = Role::from_u8(chunk[4]).ok_or(FrameCodecError::InvalidRole(chunk[4]))?;
            let slot = TimeSlot {
                start_us: 0,
                duration_us: u32::from_le_bytes(read_array(&chunk[0..4])),
                role,
                owner: chunk[5],
            };
            time_slots.push(slot).map_err(|_| FrameCodecError::TooManySlots)?;
        }

        let mut frame = Frame {
            frame_start_time_us,
            frame_duration_us,
            time_slots,
            default_role,
            base_station_id,
        };
        pack_frame_times(&mut frame);

        Ok(FrameAnnouncement {
            time_announced: Instant::from_micros(time_announced),
            frame,
        })
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
