//! # Packet Module
//!
//! Application-level unit of communication. A packet is split into one or more
//! [`super::Fragment`]s for transmission and rebuilt from them on reception.
//!
//! ## Identity
//!
//! All fragments of one packet share the same [`HeaderKey`]: protocol, sender,
//! destination and sequence number. The assembler groups incoming fragments by this key.

use super::codec::CodecError;
use crate::NodeId;

/// Payload protocol carried by a packet
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "std", derive(Debug))]
#[repr(u8)]
pub enum Protocol {
    /// Internet traffic tunnelled over the radio link
    Inet = 0,
    /// Application control messages
    Control = 176,
    /// TDMA frame announcements, consumed by the transceiver itself
    TdmaControl = 177,
}

impl Protocol {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Protocol::Inet),
            176 => Some(Protocol::Control),
            177 => Some(Protocol::TdmaControl),
            _ => None,
        }
    }
}

/// Identity shared by all fragments of one packet
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct HeaderKey {
    pub protocol: Protocol,
    pub sender_id: NodeId,
    pub destination_id: NodeId,
    pub sequence_number: u16,
}

/// Application packet with a payload of at most `MAX_PAYLOAD` bytes
#[derive(Clone)]
pub struct Packet<const MAX_PAYLOAD: usize> {
    pub protocol: Protocol,
    pub sender_id: NodeId,
    pub destination_id: NodeId,
    pub sequence_number: u16,
    pub(crate) payload: [u8; MAX_PAYLOAD],
    pub(crate) payload_length: usize,
}

impl<const MAX_PAYLOAD: usize> Packet<MAX_PAYLOAD> {
    /// Creates a packet with an empty payload
    pub const fn empty(protocol: Protocol, sender_id: NodeId, destination_id: NodeId, sequence_number: u16) -> Self {
        Packet {
            protocol,
            sender_id,
            destination_id,
            sequence_number,
            payload: [0u8; MAX_PAYLOAD],
            payload_length: 0,
        }
    }

    /// Creates a packet carrying `payload`
    ///
    /// # Returns
    /// * `Ok(packet)` on success
    /// * `Err(CodecError::PayloadTooLarge)` if `payload` is longer than `MAX_PAYLOAD`
    ///
    /// # Example
    /// ```rust
    /// use tdma_radio_lib::messages::{Packet, Protocol};
    ///
    /// let packet = Packet::<64>::new(Protocol::Inet, 1, 2, 7, b"hello").unwrap();
    /// assert_eq!(packet.payload(), b"hello");
    /// ```
    pub fn new(protocol: Protocol, sender_id: NodeId, destination_id: NodeId, sequence_number: u16, payload: &[u8]) -> Result<Self, CodecError> {
        let mut packet = Self::empty(protocol, sender_id, destination_id, sequence_number);
        packet.set_payload(payload)?;
        Ok(packet)
    }

    /// Replaces the payload
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<(), CodecError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(CodecError::PayloadTooLarge);
        }
        self.payload[..payload.len()].copy_from_slice(payload);
        self.payload_length = payload.len();
        Ok(())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_length]
    }

    pub fn payload_length(&self) -> usize {
        self.payload_length
    }

    pub fn header_key(&self) -> HeaderKey {
        HeaderKey {
            protocol: self.protocol,
            sender_id: self.sender_id,
            destination_id: self.destination_id,
            sequence_number: self.sequence_number,
        }
    }
}

// Bytes past payload_length are not part of the packet.
impl<const MAX_PAYLOAD: usize> PartialEq for Packet<MAX_PAYLOAD> {
    fn eq(&self, other: &Self) -> bool {
        self.header_key() == other.header_key() && self.payload() == other.payload()
    }
}

impl<const MAX_PAYLOAD: usize> Eq for Packet<MAX_PAYLOAD> {}

#[cfg(feature = "std")]
impl<const MAX_PAYLOAD: usize> core::fmt::Debug for Packet<MAX_PAYLOAD> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Packet")
            .field("protocol", &self.protocol)
            .field("sender_id", &self.sender_id)
            .field("destination_id", &self.destination_id)
            .field("sequence_number", &self.sequence_number)
            .field("payload", &self.payload())
            .finish()
    }
}
