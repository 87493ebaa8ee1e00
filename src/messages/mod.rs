//! # Messages Module
//!
//! Data structures carried over the radio link and the codec between them.
//!
//! ## Architecture
//!
//! - **Packet**: application-level unit with a payload of up to `PACKET_MAX_PAYLOAD_SIZE` bytes
//! - **Fragment**: wire-format unit of at most `FRAGMENT_MTU` bytes, one per radio transmission
//! - **codec**: `encode` splits a packet into fragments, `assemble` rebuilds it
//!
//! ## Fragmentation
//!
//! Packets larger than one fragment are split into several. Each fragment repeats the
//! packet header so that the receiver can group fragments of the same packet, and the
//! first fragment carries the total payload length.

pub mod codec;
pub mod fragment;
pub mod packet;

pub use codec::{CodecError, EncodedPacket, FragmentHeader, assemble, encode, payload_capacity};
pub use fragment::Fragment;
pub use packet::{HeaderKey, Packet, Protocol};
