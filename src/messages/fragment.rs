//! # Fragment Module
//!
//! The link-layer transmission unit: one radio transmission carries exactly one fragment.
//!
//! ## Fragment Structure
//!
//! Every fragment starts with the same six byte header:
//! - Byte 0: Protocol tag
//! - Byte 1: Sender node id
//! - Byte 2: Destination node id
//! - Bytes 3-4: Sequence number (big-endian)
//! - Byte 5: Fragment index (bits 0-6) and continuation flag (bit 7)
//!
//! The first fragment of a packet (index 0) additionally carries the total payload length
//! in bytes 6-7 (big-endian). Payload bytes follow the header.
//!
//! The continuation flag is set on every fragment of a packet except the last one.
//!
//! ## Design Considerations
//!
//! - **Public Fields**: `data` and `length` are public so radio drivers can fill and read
//!   the buffer in place
//! - **Fixed Size**: the buffer is always `MTU` bytes; `length` tells how many are valid
//! - **Total Accessors**: header accessors return `None` instead of reading past `length`

use crate::NodeId;

/// Size of the header present in every fragment
pub const FRAGMENT_HEADER_SIZE: usize = 6;
/// Size of the total payload length field carried by the first fragment
pub const PAYLOAD_LENGTH_SIZE: usize = 2;
/// Set in the index byte of every fragment except the last of a packet
pub const CONTINUATION_BIT: u8 = 0x80;
/// Mask selecting the fragment index from the index byte
pub const FRAGMENT_INDEX_MASK: u8 = 0x7F;
/// A packet can span at most this many fragments
pub const MAX_FRAGMENT_COUNT: usize = FRAGMENT_INDEX_MASK as usize + 1;

/// Link-layer transmission unit
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct Fragment<const MTU: usize> {
    /// Raw fragment buffer
    pub data: [u8; MTU],

    /// Number of valid bytes in `data`, never more than `MTU`
    pub length: usize,
}

impl<const MTU: usize> Default for Fragment<MTU> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const MTU: usize> Fragment<MTU> {
    /// Creates an empty fragment
    pub const fn new() -> Self {
        Fragment { data: [0u8; MTU], length: 0 }
    }

    /// Copies raw bytes received from a radio into a fragment
    ///
    /// # Returns
    /// * `Some(fragment)` if `bytes` fits into the MTU
    /// * `None` if `bytes` is longer than the MTU
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MTU {
            return None;
        }
        let mut fragment = Self::new();
        fragment.data[..bytes.len()].copy_from_slice(bytes);
        fragment.length = bytes.len();
        Some(fragment)
    }

    /// Valid bytes of the fragment
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.length.min(MTU)]
    }

    fn header_byte(&self, position: usize) -> Option<u8> {
        if self.length < FRAGMENT_HEADER_SIZE {
            return None;
        }
        self.as_bytes().get(position).copied()
    }

    /// Raw protocol tag
    pub fn protocol_tag(&self) -> Option<u8> {
        self.header_byte(0)
    }

    pub fn sender_id(&self) -> Option<NodeId> {
        self.header_byte(1)
    }

    pub fn destination_id(&self) -> Option<NodeId> {
        self.header_byte(2)
    }

    pub fn sequence_number(&self) -> Option<u16> {
        let high = self.header_byte(3)?;
        let low = self.header_byte(4)?;
        Some(u16::from_be_bytes([high, low]))
    }

    /// Index of this fragment within its packet (0-based)
    pub fn fragment_index(&self) -> Option<u8> {
        self.header_byte(5).map(|byte| byte & FRAGMENT_INDEX_MASK)
    }

    /// True if more fragments of the same packet follow this one
    pub fn is_continued(&self) -> Option<bool> {
        self.header_byte(5).map(|byte| byte & CONTINUATION_BIT != 0)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn header_accessors_read_wire_layout() {
        let fragment = Fragment::<16>::from_bytes(&[176, 3, 255, 0x01, 0x02, 0x85, 0, 4, 9]).unwrap();
        assert_eq!(fragment.protocol_tag(), Some(176));
        assert_eq!(fragment.sender_id(), Some(3));
        assert_eq!(fragment.destination_id(), Some(255));
        assert_eq!(fragment.sequence_number(), Some(0x0102));
        assert_eq!(fragment.fragment_index(), Some(5));
        assert_eq!(fragment.is_continued(), Some(true));
        assert_eq!(fragment.as_bytes().len(), 9);
    }

    #[test]
    fn truncated_header_reads_nothing() {
        let fragment = Fragment::<16>::from_bytes(&[0, 1, 2, 3, 4]).unwrap();
        assert_eq!(fragment.protocol_tag(), None);
        assert_eq!(fragment.sequence_number(), None);
        assert_eq!(fragment.fragment_index(), None);
    }

    #[test]
    fn oversized_input_is_rejected() {
        assert!(Fragment::<4>::from_bytes(&[0; 5]).is_none());
        assert!(Fragment::<4>::from_bytes(&[0; 4]).is_some());
    }

    #[test]
    fn length_beyond_mtu_is_clamped() {
        let mut fragment = Fragment::<8>::new();
        fragment.length = 100;
        assert_eq!(fragment.as_bytes().len(), 8);
    }
}
