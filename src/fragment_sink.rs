//! # Fragment Sink
//!
//! Hands the fragments of queued packets to the transceiver one at a time.
//!
//! The transceiver transmits at most one fragment per tick, while a packet may need
//! several. The sink bridges the two: it encodes the packet picked by the queue's `peek`,
//! walks its fragments, and commits the queue-side removal with `pop_packet` once the
//! last fragment has been handed out.
//!
//! The sink owns the transmit queue so that the peek handle and the queue cannot drift
//! apart. Producers reach the queue through [`FragmentSink::queue_mut`].

use crate::messages::{EncodedPacket, Fragment, Packet, encode};
use crate::tx_queue::{PacketTxQueue, PeekHandle};

/// Fragment-at-a-time view of a [`PacketTxQueue`] of packets
pub struct FragmentSink<const MAX_PAYLOAD: usize, const QUEUE_SIZE: usize, const MTU: usize, const MAX_FRAGMENTS: usize> {
    queue: PacketTxQueue<Packet<MAX_PAYLOAD>, QUEUE_SIZE>,
    handle: Option<PeekHandle>,
    fragments: EncodedPacket<MTU, MAX_FRAGMENTS>,
    current: usize,
}

impl<const MAX_PAYLOAD: usize, const QUEUE_SIZE: usize, const MTU: usize, const MAX_FRAGMENTS: usize>
    FragmentSink<MAX_PAYLOAD, QUEUE_SIZE, MTU, MAX_FRAGMENTS>
{
    pub fn new(queue: PacketTxQueue<Packet<MAX_PAYLOAD>, QUEUE_SIZE>) -> Self {
        FragmentSink {
            queue,
            handle: None,
            fragments: EncodedPacket::new(),
            current: 0,
        }
    }

    /// Picks the next packet from the queue and encodes it
    ///
    /// A packet that was encoded but not yet popped stays in the queue and may be picked
    /// again later.
    ///
    /// # Returns
    /// true if a packet was encoded, false if the queue is empty
    pub fn encode_next_packet(&mut self) -> bool {
        match self.queue.peek() {
            Some((handle, packet)) => {
                self.fragments = encode::<MTU, MAX_FRAGMENTS, MAX_PAYLOAD>(packet);
                self.handle = Some(handle);
                self.current = 0;
                true
            }
            None => false,
        }
    }

    /// True while a packet is encoded and not yet popped
    pub fn has_encoded_packet(&self) -> bool {
        self.handle.is_some()
    }

    pub fn has_more_fragments(&self) -> bool {
        self.current < self.fragments.len()
    }

    /// The fragment to transmit next
    pub fn fragment(&self) -> Option<&Fragment<MTU>> {
        self.fragments.get(self.current)
    }

    /// Mutable access to the fragment to transmit next, for last-moment header or payload fixups
    pub fn fragment_mut(&mut self) -> Option<&mut Fragment<MTU>> {
        self.fragments.get_mut(self.current)
    }

    /// Moves on to the following fragment
    pub fn next_fragment(&mut self) {
        if self.current < self.fragments.len() {
            self.current += 1;
        }
    }

    /// Removes the encoded packet from the queue
    ///
    /// # Returns
    /// The removed packet, or `None` if no packet was encoded
    pub fn pop_packet(&mut self) -> Option<Packet<MAX_PAYLOAD>> {
        let handle = self.handle.take()?;
        self.fragments.clear();
        self.current = 0;
        self.queue.pop(handle)
    }

    pub fn queue(&self) -> &PacketTxQueue<Packet<MAX_PAYLOAD>, QUEUE_SIZE> {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut PacketTxQueue<Packet<MAX_PAYLOAD>, QUEUE_SIZE> {
        &mut self.queue
    }
}
