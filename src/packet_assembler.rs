//! # Packet Assembler
//!
//! Buffers incoming fragments until every fragment of a packet has arrived, then hands
//! out the rebuilt packet.
//!
//! ## Architecture
//!
//! Fragments are kept in a fixed arena of `CAPACITY` slots, each remembering the
//! fragment's [`HeaderKey`], its index and its arrival time. Keys whose fragment set is
//! complete are queued in arrival order of completion.
//!
//! A group is complete when the fragment without the continuation flag has arrived and
//! every index below it is present. On consumption the group's fragments are sorted by
//! index before they are concatenated, so fragments may arrive in any order.
//!
//! ## Eviction
//!
//! - **Arena full**: the whole group owning the oldest buffered fragment is dropped to
//!   make room for the new fragment
//! - **Stale groups**: [`PacketAssembler::evict_stale`] drops incomplete groups that have
//!   not received a fragment for a given time
//!
//! Both report how many fragments were discarded so the caller can count them as dropped.

use embassy_time::{Duration, Instant};
use heapless::Vec;
use log::{Level, log};

use crate::messages::{CodecError, Fragment, FragmentHeader, HeaderKey, Packet, assemble};

struct BufferedFragment<const MTU: usize> {
    key: HeaderKey,
    index: u8,
    continued: bool,
    fragment: Fragment<MTU>,
    arrival_time: Instant,
}

/// Outcome of [`PacketAssembler::add_fragment`]
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct AddedFragment {
    pub header: FragmentHeader,
    /// The same fragment was already buffered; nothing was stored
    pub duplicate: bool,
    /// Fragments of other packets discarded to make room
    pub evicted: usize,
}

/// Bounded reassembly buffer for incoming fragments
pub struct PacketAssembler<const MTU: usize, const CAPACITY: usize> {
    buffer: [Option<BufferedFragment<MTU>>; CAPACITY],
    complete: Vec<HeaderKey, CAPACITY>,
}

impl<const MTU: usize, const CAPACITY: usize> Default for PacketAssembler<MTU, CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const MTU: usize, const CAPACITY: usize> PacketAssembler<MTU, CAPACITY> {
    pub const fn new() -> Self {
        const { assert!(CAPACITY > 0, "assembler needs at least one slot") };
        PacketAssembler {
            buffer: [const { None }; CAPACITY],
            complete: Vec::new(),
        }
    }

    /// Buffers an incoming fragment
    ///
    /// # Arguments
    /// * `fragment` - Fragment as read from the radio
    /// * `now` - Arrival time, used for eviction
    ///
    /// # Returns
    /// * `Ok(AddedFragment)` with the parsed header
    /// * `Err(CodecError)` if the fragment header cannot be parsed; nothing is stored
    pub fn add_fragment(&mut self, fragment: Fragment<MTU>, now: Instant) -> Result<AddedFragment, CodecError> {
        let header = FragmentHeader::parse(&fragment)?;
        let key = header.key();

        let mut empty_index = None;
        for (i, item) in self.buffer.iter().enumerate() {
            match item {
                Some(buffered) if buffered.key == key && buffered.index == header.index => {
                    return Ok(AddedFragment {
                        header,
                        duplicate: true,
                        evicted: 0,
                    });
                }
                None if empty_index.is_none() => empty_index = Some(i),
                _ => {}
            }
        }

        let (slot, evicted) = match empty_index {
            Some(i) => (i, 0),
            None => self.evict_oldest_group(&key),
        };

        self.buffer[slot] = Some(BufferedFragment {
            key,
            index: header.index,
            continued: header.continued,
            fragment,
            arrival_time: now,
        });
        self.update_completion(key);

        Ok(AddedFragment {
            header,
            duplicate: false,
            evicted,
        })
    }

    pub fn has_complete_packets(&self) -> bool {
        !self.complete.is_empty()
    }

    /// Rebuilds the packet that completed first and frees its fragments
    ///
    /// # Returns
    /// * `None` if no packet is complete
    /// * `Some(Ok(packet))` on success
    /// * `Some(Err(CodecError))` if the fragments were inconsistent; they are discarded
    pub fn consume_packet<const MAX_PAYLOAD: usize>(&mut self) -> Option<Result<Packet<MAX_PAYLOAD>, CodecError>> {
        if self.complete.is_empty() {
            return None;
        }
        let key = self.complete.remove(0);

        let result = {
            let mut members: Vec<(u8, usize), CAPACITY> = Vec::new();
            for (i, item) in self.buffer.iter().enumerate() {
                if let Some(buffered) = item {
                    if buffered.key == key {
                        let _ = members.push((buffered.index, i));
                    }
                }
            }
            members.sort_unstable_by_key(|(index, _)| *index);

            let mut ordered: Vec<&Fragment<MTU>, CAPACITY> = Vec::new();
            for (_, i) in members.iter() {
                if let Some(buffered) = &self.buffer[*i] {
                    let _ = ordered.push(&buffered.fragment);
                }
            }
            assemble::<MTU, MAX_PAYLOAD>(&ordered)
        };

        self.remove_group(&key);
        Some(result)
    }

    /// Drops incomplete groups whose newest fragment is older than `max_age`
    ///
    /// # Returns
    /// Number of fragments discarded
    pub fn evict_stale(&mut self, now: Instant, max_age: Duration) -> usize {
        let mut evicted = 0;
        for i in 0..CAPACITY {
            let key = match &self.buffer[i] {
                Some(buffered) => buffered.key,
                None => continue,
            };
            if self.complete.contains(&key) {
                continue;
            }
            let newest = self.newest_arrival(&key);
            if now.saturating_duration_since(newest) > max_age {
                let removed = self.remove_group(&key);
                log!(
                    Level::Debug,
                    "Evicted stale packet seq {} from {} ({} fragments)",
                    key.sequence_number,
                    key.sender_id,
                    removed
                );
                evicted += removed;
            }
        }
        evicted
    }

    /// Number of buffered fragments
    pub fn len(&self) -> usize {
        self.buffer.iter().filter(|item| item.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.iter().all(|item| item.is_none())
    }

    fn newest_arrival(&self, key: &HeaderKey) -> Instant {
        self.buffer
            .iter()
            .flatten()
            .filter(|buffered| buffered.key == *key)
            .map(|buffered| buffered.arrival_time)
            .max()
            .unwrap_or(Instant::MIN)
    }

    fn update_completion(&mut self, key: HeaderKey) {
        if self.complete.contains(&key) {
            return;
        }

        let mut present: u128 = 0;
        let mut last_index: Option<u8> = None;
        for buffered in self.buffer.iter().flatten() {
            if buffered.key == key {
                present |= 1u128 << buffered.index;
                if !buffered.continued {
                    last_index = Some(buffered.index);
                }
            }
        }

        if let Some(last) = last_index {
            let required = if last as u32 >= u128::BITS - 1 { u128::MAX } else { (1u128 << (last + 1)) - 1 };
            if present & required == required && self.complete.push(key).is_err() {
                log!(Level::Error, "Complete packet list full, seq {} from {}", key.sequence_number, key.sender_id);
            }
        }
    }

    /// Frees the group that has been silent the longest
    ///
    /// Groups are ranked by their newest fragment, so a packet that is still arriving
    /// outlives an idle one. The group of `incoming` is only chosen when it is the sole
    /// occupant of the arena.
    ///
    /// Returns the index of a freed slot and the number of fragments removed.
    fn evict_oldest_group(&mut self, incoming: &HeaderKey) -> (usize, usize) {
        let mut victim: Option<(usize, Instant, HeaderKey)> = None;
        for (i, item) in self.buffer.iter().enumerate() {
            if let Some(buffered) = item {
                if buffered.key == *incoming || victim.is_some_and(|(_, _, key)| key == buffered.key) {
                    continue;
                }
                let newest = self.newest_arrival(&buffered.key);
                if victim.map_or(true, |(_, time, _)| newest < time) {
                    victim = Some((i, newest, buffered.key));
                }
            }
        }

        let (index, key) = match victim {
            Some((index, _, key)) => (index, key),
            None => match self.buffer.iter().position(|item| item.is_some()) {
                Some(index) => (index, *incoming),
                None => return (0, 0),
            },
        };

        let removed = self.remove_group(&key);
        log!(
            Level::Warn,
            "Assembler full, evicted packet seq {} from {} ({} fragments)",
            key.sequence_number,
            key.sender_id,
            removed
        );
        (index, removed)
    }

    fn remove_group(&mut self, key: &HeaderKey) -> usize {
        let mut removed = 0;
        for item in self.buffer.iter_mut() {
            if item.as_ref().is_some_and(|buffered| buffered.key == *key) {
                *item = None;
                removed += 1;
            }
        }
        self.complete.retain(|complete| complete != key);
        removed
    }
}
