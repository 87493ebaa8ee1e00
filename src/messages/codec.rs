//! # Fragment Codec
//!
//! Splits a [`Packet`] into link-sized [`Fragment`]s and rebuilds a packet from them.
//!
//! ## Capacity
//!
//! The first fragment loses two payload bytes to the total length field:
//!
//! ```text
//! capacity = (MTU - 8) + (MAX_FRAGMENTS - 1) * (MTU - 6)
//! ```
//!
//! Payload beyond the capacity is truncated when encoding. The length field records the
//! number of bytes actually encoded, so a truncated packet still reassembles.
//!
//! ## Reassembly
//!
//! [`assemble`] concatenates fragments in the order given and validates everything it
//! reads. A malformed or inconsistent fragment set is reported as a [`CodecError`]; the
//! codec never panics on input from the air.

use heapless::Vec;
use log::{Level, log};

use super::fragment::{CONTINUATION_BIT, FRAGMENT_HEADER_SIZE, FRAGMENT_INDEX_MASK, Fragment, MAX_FRAGMENT_COUNT, PAYLOAD_LENGTH_SIZE};
use super::packet::{HeaderKey, Packet, Protocol};
use crate::NodeId;

/// Fragments produced for one packet
pub type EncodedPacket<const MTU: usize, const MAX_FRAGMENTS: usize> = Vec<Fragment<MTU>, MAX_FRAGMENTS>;

/// Errors while parsing fragments or reassembling a packet
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum CodecError {
    /// The fragment is shorter than its header
    Truncated,
    /// The fragment claims more bytes than the MTU
    FragmentTooLong,
    /// Unknown protocol tag
    UnknownProtocol(u8),
    /// No fragments were supplied
    NoFragments,
    /// The first supplied fragment is not fragment 0
    MissingFirstFragment,
    /// Fragment indices are not 0, 1, 2, ...
    NonContiguousIndex { expected: u8, found: u8 },
    /// A fragment belongs to a different packet
    HeaderMismatch,
    /// The last supplied fragment still has the continuation flag set
    MissingFinalFragment,
    /// A fragment other than the last lacks the continuation flag
    UnexpectedFinalFragment,
    /// The payload does not fit into the packet
    PayloadTooLarge,
    /// The received payload size differs from the declared total length
    LengthMismatch { declared: u16, received: usize },
}

impl core::fmt::Display for CodecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CodecError::Truncated => write!(f, "fragment is shorter than its header"),
            CodecError::FragmentTooLong => write!(f, "fragment length exceeds the MTU"),
            CodecError::UnknownProtocol(tag) => write!(f, "unknown protocol tag {}", tag),
            CodecError::NoFragments => write!(f, "no fragments to assemble"),
            CodecError::MissingFirstFragment => write!(f, "first fragment is missing"),
            CodecError::NonContiguousIndex { expected, found } => {
                write!(f, "expected fragment index {} but found {}", expected, found)
            }
            CodecError::HeaderMismatch => write!(f, "fragment belongs to a different packet"),
            CodecError::MissingFinalFragment => write!(f, "final fragment is missing"),
            CodecError::UnexpectedFinalFragment => write!(f, "final fragment is followed by more fragments"),
            CodecError::PayloadTooLarge => write!(f, "payload does not fit into the packet"),
            CodecError::LengthMismatch { declared, received } => {
                write!(f, "declared payload length {} but received {} bytes", declared, received)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CodecError {}

/// Parsed fragment header
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct FragmentHeader {
    pub protocol: Protocol,
    pub sender_id: NodeId,
    pub destination_id: NodeId,
    pub sequence_number: u16,
    pub index: u8,
    pub continued: bool,
    /// Present on fragment 0 only
    pub payload_length: Option<u16>,
}

impl FragmentHeader {
    /// Validates and reads the header of `fragment`
    pub fn parse<const MTU: usize>(fragment: &Fragment<MTU>) -> Result<Self, CodecError> {
        if fragment.length > MTU {
            return Err(CodecError::FragmentTooLong);
        }
        if fragment.length < FRAGMENT_HEADER_SIZE {
            return Err(CodecError::Truncated);
        }

        let data = &fragment.data;
        let protocol = Protocol::from_u8(data[0]).ok_or(CodecError::UnknownProtocol(data[0]))?;
        let index = data[5] & FRAGMENT_INDEX_MASK;
        let payload_length = if index == 0 {
            if fragment.length < FRAGMENT_HEADER_SIZE + PAYLOAD_LENGTH_SIZE {
                return Err(CodecError::Truncated);
            }
            Some(u16::from_be_bytes([data[6], data[7]]))
        } else {
            None
        };

        Ok(FragmentHeader {
            protocol,
            sender_id: data[1],
            destination_id: data[2],
            sequence_number: u16::from_be_bytes([data[3], data[4]]),
            index,
            continued: data[5] & CONTINUATION_BIT != 0,
            payload_length,
        })
    }

    pub fn key(&self) -> HeaderKey {
        HeaderKey {
            protocol: self.protocol,
            sender_id: self.sender_id,
            destination_id: self.destination_id,
            sequence_number: self.sequence_number,
        }
    }

    /// Offset of the first payload byte within the fragment
    pub fn payload_offset(&self) -> usize {
        match self.payload_length {
            Some(_) => FRAGMENT_HEADER_SIZE + PAYLOAD_LENGTH_SIZE,
            None => FRAGMENT_HEADER_SIZE,
        }
    }
}

/// Number of payload bytes `MAX_FRAGMENTS` fragments of size `MTU` can carry
pub const fn payload_capacity(mtu: usize, max_fragments: usize) -> usize {
    if max_fragments == 0 || mtu <= FRAGMENT_HEADER_SIZE + PAYLOAD_LENGTH_SIZE {
        return 0;
    }
    (mtu - FRAGMENT_HEADER_SIZE - PAYLOAD_LENGTH_SIZE) + (max_fragments - 1) * (mtu - FRAGMENT_HEADER_SIZE)
}

/// Splits `packet` into fragments
///
/// Fragments are filled greedily. Every fragment except the last has the continuation
/// flag set. An empty payload still yields one fragment.
///
/// # Returns
/// The fragments in transmission order
pub fn encode<const MTU: usize, const MAX_FRAGMENTS: usize, const MAX_PAYLOAD: usize>(packet: &Packet<MAX_PAYLOAD>) -> EncodedPacket<MTU, MAX_FRAGMENTS> {
    const {
        assert!(MTU > FRAGMENT_HEADER_SIZE + PAYLOAD_LENGTH_SIZE, "MTU too small for the fragment header");
        assert!(MAX_FRAGMENTS >= 1 && MAX_FRAGMENTS <= MAX_FRAGMENT_COUNT, "fragment count out of range");
    }

    let payload = packet.payload();
    let capacity = payload_capacity(MTU, MAX_FRAGMENTS).min(u16::MAX as usize);
    let encoded_length = payload.len().min(capacity);
    if encoded_length < payload.len() {
        log!(
            Level::Warn,
            "Packet seq {} from {} truncated from {} to {} bytes",
            packet.sequence_number,
            packet.sender_id,
            payload.len(),
            encoded_length
        );
    }

    let sequence = packet.sequence_number.to_be_bytes();
    let mut fragments: EncodedPacket<MTU, MAX_FRAGMENTS> = Vec::new();
    let mut offset = 0;
    let mut index: u8 = 0;

    loop {
        let mut fragment = Fragment::<MTU>::new();
        fragment.data[0] = packet.protocol as u8;
        fragment.data[1] = packet.sender_id;
        fragment.data[2] = packet.destination_id;
        fragment.data[3..5].copy_from_slice(&sequence);

        let mut position = FRAGMENT_HEADER_SIZE;
        if index == 0 {
            fragment.data[position..position + PAYLOAD_LENGTH_SIZE].copy_from_slice(&(encoded_length as u16).to_be_bytes());
            position += PAYLOAD_LENGTH_SIZE;
        }

        let chunk = (MTU - position).min(encoded_length - offset);
        fragment.data[position..position + chunk].copy_from_slice(&payload[offset..offset + chunk]);
        position += chunk;
        offset += chunk;

        let continued = offset < encoded_length;
        fragment.data[5] = index | if continued { CONTINUATION_BIT } else { 0 };
        fragment.length = position;

        if fragments.push(fragment).is_err() || !continued {
            break;
        }
        index += 1;
    }

    fragments
}

/// Rebuilds a packet from its fragments
///
/// Fragments must be supplied ordered by fragment index; this function does not sort.
///
/// # Returns
/// * `Ok(packet)` if the fragments form one complete, consistent packet
/// * `Err(CodecError)` describing the first inconsistency found
pub fn assemble<const MTU: usize, const MAX_PAYLOAD: usize>(fragments: &[&Fragment<MTU>]) -> Result<Packet<MAX_PAYLOAD>, CodecError> {
    let first = fragments.first().ok_or(CodecError::NoFragments)?;
    let first_header = FragmentHeader::parse(*first)?;
    if first_header.index != 0 {
        return Err(CodecError::MissingFirstFragment);
    }
    let declared = first_header.payload_length.ok_or(CodecError::Truncated)?;
    if declared as usize > MAX_PAYLOAD {
        return Err(CodecError::PayloadTooLarge);
    }

    let key = first_header.key();
    let mut packet = Packet::<MAX_PAYLOAD>::empty(key.protocol, key.sender_id, key.destination_id, key.sequence_number);
    let mut received: usize = 0;
    let last_position = fragments.len() - 1;

    for (position, fragment) in fragments.iter().enumerate() {
        let header = FragmentHeader::parse(*fragment)?;
        if header.key() != key {
            return Err(CodecError::HeaderMismatch);
        }
        if header.index as usize != position {
            return Err(CodecError::NonContiguousIndex {
                expected: position as u8,
                found: header.index,
            });
        }
        if position == last_position && header.continued {
            return Err(CodecError::MissingFinalFragment);
        }
        if position != last_position && !header.continued {
            return Err(CodecError::UnexpectedFinalFragment);
        }

        let body = &fragment.data[header.payload_offset()..fragment.length];
        let end = received
            .checked_add(body.len())
            .filter(|end| *end <= declared as usize)
            .ok_or(CodecError::LengthMismatch {
                declared,
                received: received.saturating_add(body.len()),
            })?;
        packet.payload[received..end].copy_from_slice(body);
        received = end;
    }

    if received != declared as usize {
        return Err(CodecError::LengthMismatch { declared, received });
    }
    packet.payload_length = received;
    Ok(packet)
}
