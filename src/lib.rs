//! TDMA link layer for half-duplex packet radios.
//!
//! A base station divides time into repeating frames of time slots and announces the
//! frame to its cell. Every node follows the frame through its [`tdma::Schedule`],
//! transmitting only in slots it owns and listening otherwise. Packets are split into
//! radio-sized fragments on the way out and reassembled on the way in; outgoing packets
//! wait in a weighted four-lane priority queue.
//!
//! [`transceiver::TdmaTransceiver`] ties the pieces together and is advanced by a
//! single, non-blocking tick loop.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod clock;
pub mod fragment_sink;
pub mod messages;
pub mod packet_assembler;
pub mod radio_devices;
pub mod router;
pub mod tdma;
pub mod telemetry;
pub mod transceiver;
pub mod tx_queue;

#[cfg(feature = "embedded")]
use embassy_sync::channel::Channel;

pub use clock::{Clock, RemoteClock, SystemClock};
pub use messages::{CodecError, Fragment, Packet, Protocol};
pub use radio_devices::{HalfDuplexRadio, RadioDriver};
pub use router::{PacketRouter, RouterTableFull};
pub use tdma::{Frame, FrameAnnouncement, FrameBuilder, Role, Schedule};
pub use telemetry::{TelemetryAccumulator, TelemetrySink};
pub use transceiver::{AnnounceError, OutgoingPacket, OutgoingPacketChannel, TdmaTransceiver, TransceiverConfiguration};
pub use tx_queue::{PacketTxQueue, Priority, QueueFullError};

/// Node address on the link
pub type NodeId = u8;

/// Destination addressing every node of the cell, and owner of unowned slots
pub const BROADCAST_ID: NodeId = 0xFF;

//Hardware dependent constants, that affect compatibility of a node
pub const FRAGMENT_MTU: usize = 64;
pub const PACKET_MAX_PAYLOAD_SIZE: usize = 1024;
pub const MAX_FRAGMENTS_PER_PACKET: usize = 20;
pub const MAX_TIME_SLOTS: usize = 32;

//Constants that only affect efficiency of a node, but do not result in incompatibility
pub const TX_QUEUE_LANE_SIZE: usize = 8;
pub const INCOMING_FRAGMENT_BUFFER_SIZE: usize = 64;
pub const MAX_ROUTERS: usize = 4;
pub const OUTGOING_PACKET_QUEUE_SIZE: usize = 4;

const _: () = assert!(messages::payload_capacity(FRAGMENT_MTU, MAX_FRAGMENTS_PER_PACKET) >= PACKET_MAX_PAYLOAD_SIZE);
const _: () = assert!(tdma::MAX_ANNOUNCEMENT_SIZE <= PACKET_MAX_PAYLOAD_SIZE);

/// A fragment of the link's MTU
pub type RadioFragment = Fragment<FRAGMENT_MTU>;

/// A packet of the link's maximum payload size
pub type RadioPacket = Packet<PACKET_MAX_PAYLOAD_SIZE>;

/// Channel for handing packets to the transceiver from other tasks
///
/// Attach its receiver with [`TdmaTransceiver::attach_outgoing_channel`].
#[cfg(feature = "embedded")]
pub static OUTGOING_PACKET_CHANNEL: OutgoingPacketChannel = Channel::new();
