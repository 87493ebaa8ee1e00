//! Delivery of reassembled packets to the layers above the link.
//!
//! The transceiver offers every complete packet to its routers in registration order.
//! The first router that returns `true` claims the packet and the remaining routers never
//! see it.

use crate::messages::Packet;

/// Consumer of reassembled packets
pub trait PacketRouter<const MAX_PAYLOAD: usize> {
    /// Offers `packet` to the router
    ///
    /// # Returns
    /// true if the router claimed the packet
    fn route(&self, packet: &Packet<MAX_PAYLOAD>) -> bool;
}

/// No room left to register another router
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RouterTableFull;

impl core::fmt::Display for RouterTableFull {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "router table is full")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RouterTableFull {}
