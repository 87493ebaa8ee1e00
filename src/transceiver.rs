//! # TDMA Transceiver
//!
//! Drives a half-duplex radio according to the node's TDMA schedule.
//!
//! ## Architecture
//!
//! The transceiver owns every part of the link and is advanced by a single tick loop:
//!
//! - **Schedule**: decides per tick whether the node transmits, receives or idles
//! - **FragmentSink**: hands out the fragments of queued packets one at a time
//! - **PacketAssembler**: collects incoming fragments until packets are complete
//! - **Routers**: consume complete packets, first claim wins
//! - **Telemetry**: receives counters for every fragment event
//!
//! Application tasks can feed packets through an embassy-sync [`Channel`]
//! ([`OutgoingPacketChannel`]); the channel is drained into the transmit queue at the
//! start of each tick, so the queue itself is only ever touched by the tick loop.
//!
//! ## Tick
//!
//! 1. Drain the outgoing channel and evict stale partial packets
//! 2. Finish or time out the fragment in flight, releasing its packet after the last one
//! 3. Receive, transmit or idle, depending on the current slot; an owned slot with nothing
//!    on air doubles as an RSSI sample of the noise floor
//! 4. Apply frame announcements and route complete packets
//! 5. Publish the transmit queue size
//!
//! No step blocks. Anything that cannot happen now is deferred to a later tick.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;
use log::{Level, log};

use crate::clock::Clock;
use crate::fragment_sink::FragmentSink;
use crate::messages::{CodecError, FragmentHeader, Packet, Protocol};
use crate::packet_assembler::PacketAssembler;
use crate::radio_devices::HalfDuplexRadio;
use crate::router::{PacketRouter, RouterTableFull};
use crate::tdma::{Frame, FrameAnnouncement, FrameCodecError, MAX_ANNOUNCEMENT_SIZE, Schedule};
use crate::telemetry::TelemetrySink;
use crate::tx_queue::{PacketTxQueue, Priority, QueueFullError};
use crate::{
    BROADCAST_ID, FRAGMENT_MTU, INCOMING_FRAGMENT_BUFFER_SIZE, MAX_FRAGMENTS_PER_PACKET, MAX_ROUTERS, NodeId, OUTGOING_PACKET_QUEUE_SIZE,
    PACKET_MAX_PAYLOAD_SIZE, RadioPacket, TX_QUEUE_LANE_SIZE,
};

/// Packet handed to the transceiver by another task
#[cfg_attr(feature = "std", derive(Debug))]
pub struct OutgoingPacket {
    pub priority: Priority,
    pub packet: RadioPacket,
}

/// Channel carrying packets from application tasks to the transceiver
pub type OutgoingPacketChannel = Channel<CriticalSectionRawMutex, OutgoingPacket, OUTGOING_PACKET_QUEUE_SIZE>;
pub type OutgoingPacketSender<'a> = Sender<'a, CriticalSectionRawMutex, OutgoingPacket, OUTGOING_PACKET_QUEUE_SIZE>;
pub type OutgoingPacketReceiver<'a> = Receiver<'a, CriticalSectionRawMutex, OutgoingPacket, OUTGOING_PACKET_QUEUE_SIZE>;

/// Runtime parameters of a [`TdmaTransceiver`]
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct TransceiverConfiguration {
    /// A transmission still running after this long is abandoned
    pub tx_timeout: Duration,
    /// Minimum time between two RSSI samples
    pub rssi_measurement_interval: Duration,
    /// Partial packets older than this are discarded
    pub incomplete_packet_timeout: Duration,
    /// Seed for the transmit queue's lane selection
    pub rng_seed: u64,
}

impl Default for TransceiverConfiguration {
    fn default() -> Self {
        TransceiverConfiguration {
            tx_timeout: Duration::from_millis(3),
            rssi_measurement_interval: Duration::from_millis(10),
            incomplete_packet_timeout: Duration::from_secs(2),
            rng_seed: 0x7D3A_11C5,
        }
    }
}

/// Errors of [`TdmaTransceiver::announce_frame`]
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum AnnounceError {
    /// Only the base station of the current frame announces it
    NotBaseStation,
    Encoding(FrameCodecError),
    Packet(CodecError),
    /// The control lane of the transmit queue is full
    QueueFull,
}

impl core::fmt::Display for AnnounceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AnnounceError::NotBaseStation => write!(f, "node is not the base station"),
            AnnounceError::Encoding(err) => write!(f, "frame encoding failed: {}", err),
            AnnounceError::Packet(err) => write!(f, "announcement packet invalid: {}", err),
            AnnounceError::QueueFull => write!(f, "control lane is full"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AnnounceError {}

type OutgoingSink = FragmentSink<PACKET_MAX_PAYLOAD_SIZE, TX_QUEUE_LANE_SIZE, FRAGMENT_MTU, MAX_FRAGMENTS_PER_PACKET>;

/// Tick-driven TDMA link over a half-duplex radio
///
/// # Type Parameters
/// * `R` - The radio
/// * `C` - Local clock; cloned into the schedule
/// * `T` - Telemetry sink
pub struct TdmaTransceiver<'a, R, C, T>
where
    R: HalfDuplexRadio<FRAGMENT_MTU>,
    C: Clock + Clone,
    T: TelemetrySink,
{
    radio: R,
    clock: C,
    telemetry: T,
    config: TransceiverConfiguration,
    schedule: Schedule<C>,
    sink: OutgoingSink,
    assembler: PacketAssembler<FRAGMENT_MTU, INCOMING_FRAGMENT_BUFFER_SIZE>,
    routers: Vec<&'a dyn PacketRouter<PACKET_MAX_PAYLOAD_SIZE>, MAX_ROUTERS>,
    outgoing: Option<OutgoingPacketReceiver<'a>>,
    last_sequence_numbers: [Option<u16>; 256],
    transmission_started: Option<Instant>,
    last_rssi_measurement: Option<Instant>,
    sequence_number: u16,
}

impl<'a, R, C, T> TdmaTransceiver<'a, R, C, T>
where
    R: HalfDuplexRadio<FRAGMENT_MTU>,
    C: Clock + Clone,
    T: TelemetrySink,
{
    /// Creates a transceiver running the default node frame
    ///
    /// The radio is reset before use.
    ///
    /// # Arguments
    /// * `radio` - The radio to drive; the transceiver is its only user
    /// * `clock` - Local time source
    /// * `telemetry` - Receives link counters
    /// * `id` - This node's identifier
    /// * `config` - Timeouts and seeds
    pub fn new(mut radio: R, clock: C, telemetry: T, id: NodeId, config: TransceiverConfiguration) -> Self {
        radio.reset();
        TdmaTransceiver {
            radio,
            schedule: Schedule::new(clock.clone(), id),
            clock,
            telemetry,
            config,
            sink: FragmentSink::new(PacketTxQueue::new(config.rng_seed)),
            assembler: PacketAssembler::new(),
            routers: Vec::new(),
            outgoing: None,
            last_sequence_numbers: [None; 256],
            transmission_started: None,
            last_rssi_measurement: None,
            sequence_number: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.schedule.id()
    }

    pub fn set_id(&mut self, id: NodeId) {
        self.schedule.set_id(id);
    }

    /// Replaces the frame the node follows
    pub fn set_frame(&mut self, frame: Frame) {
        self.schedule.set_frame(frame);
    }

    pub fn schedule(&self) -> &Schedule<C> {
        &self.schedule
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    pub fn telemetry_mut(&mut self) -> &mut T {
        &mut self.telemetry
    }

    /// Queues `packet` for transmission
    ///
    /// # Returns
    /// * `Ok(())` if the packet was queued
    /// * `Err(QueueFullError)` carrying the packet if its lane is full
    pub fn push(&mut self, priority: Priority, packet: RadioPacket) -> Result<(), QueueFullError<RadioPacket>> {
        self.sink.queue_mut().push(priority, packet)
    }

    pub fn push_immediate(&mut self, packet: RadioPacket) -> Result<(), QueueFullError<RadioPacket>> {
        self.push(Priority::Immediate, packet)
    }

    pub fn push_control(&mut self, packet: RadioPacket) -> Result<(), QueueFullError<RadioPacket>> {
        self.push(Priority::Control, packet)
    }

    pub fn push_normal(&mut self, packet: RadioPacket) -> Result<(), QueueFullError<RadioPacket>> {
        self.push(Priority::Normal, packet)
    }

    pub fn push_low(&mut self, packet: RadioPacket) -> Result<(), QueueFullError<RadioPacket>> {
        self.push(Priority::Low, packet)
    }

    /// Number of packets waiting, including one partially transmitted
    pub fn transmit_queue_size(&self) -> usize {
        self.sink.queue().size()
    }

    /// Returns a fresh sequence number for an outgoing packet
    pub fn next_sequence_number(&mut self) -> u16 {
        let sequence_number = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        sequence_number
    }

    /// Drains packets sent on `receiver` into the transmit queue at every tick
    pub fn attach_outgoing_channel(&mut self, receiver: OutgoingPacketReceiver<'a>) {
        self.outgoing = Some(receiver);
    }

    /// Appends a router to the routing chain
    pub fn add_router(&mut self, router: &'a dyn PacketRouter<PACKET_MAX_PAYLOAD_SIZE>) -> Result<(), RouterTableFull> {
        self.routers.push(router).map_err(|_| RouterTableFull)
    }

    /// Broadcasts the current frame on the control lane
    ///
    /// The base station may have to wait up to a whole frame for its own slot, so the
    /// announcement time is written when the first fragment is handed to the radio, not here.
    pub fn announce_frame(&mut self) -> Result<(), AnnounceError> {
        if !self.schedule.is_base_station() {
            return Err(AnnounceError::NotBaseStation);
        }

        let announcement = FrameAnnouncement::new(self.schedule.cell_time(), self.schedule.frame().clone());
        let mut buf = [0u8; MAX_ANNOUNCEMENT_SIZE];
        let len = announcement.encode(&mut buf).map_err(AnnounceError::Encoding)?;
        let sequence_number = self.next_sequence_number();
        let packet = Packet::new(Protocol::TdmaControl, self.id(), BROADCAST_ID, sequence_number, &buf[..len]).map_err(AnnounceError::Packet)?;

        self.push_control(packet).map_err(|_| AnnounceError::QueueFull)?;
        log!(Level::Debug, "[{}] Frame announcement queued, seq {}", self.id(), sequence_number);
        Ok(())
    }

    /// Runs one tick of the link at the current time of the transceiver's clock
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.iterate(now);
    }

    /// Runs one tick of the link
    ///
    /// The schedule always reads the clock given to [`TdmaTransceiver::new`], so `now` must
    /// come from that same clock. Use [`TdmaTransceiver::tick`] unless the caller already
    /// holds a reading of it.
    ///
    /// # Arguments
    /// * `now` - Current local time
    pub fn iterate(&mut self, now: Instant) {
        self.drain_outgoing_channel();

        let evicted = self.assembler.evict_stale(now, self.config.incomplete_packet_timeout);
        if evicted > 0 {
            log!(Level::Debug, "[{}] Discarded {} fragments of incomplete packets", self.id(), evicted);
            self.telemetry.add_fragments_dropped(evicted);
        }

        if !self.poll_transmission(now) {
            if self.schedule.should_receive() {
                self.receive(now);
            } else if self.schedule.can_transmit() {
                self.transmit(now);
                if !self.radio.is_transmitting_fragment() {
                    self.sample_rssi(now);
                }
            } else {
                self.idle(now);
            }
        }

        self.route_complete_packets();
        self.telemetry.set_transmit_queue_size(self.transmit_queue_size() as u32);
    }

    /// Ticks forever, `tick` apart
    pub async fn run(&mut self, tick: Duration) -> ! {
        log!(Level::Info, "[{}] TDMA transceiver started", self.id());
        loop {
            self.tick();
            Timer::after(tick).await;
        }
    }

    fn drain_outgoing_channel(&mut self) {
        let Some(receiver) = self.outgoing.as_ref() else {
            return;
        };
        while let Ok(outgoing) = receiver.try_receive() {
            if self.sink.queue_mut().push(outgoing.priority, outgoing.packet).is_err() {
                log!(Level::Warn, "[{}] Outgoing packet dropped, transmit queue full", self.schedule.id());
            }
        }
    }

    /// Tracks the fragment in flight
    ///
    /// # Returns
    /// true while the radio is still busy transmitting it
    fn poll_transmission(&mut self, now: Instant) -> bool {
        let Some(started) = self.transmission_started else {
            return false;
        };

        if self.radio.is_transmitting_fragment() {
            if now.saturating_duration_since(started) < self.config.tx_timeout {
                return true;
            }
            log!(Level::Warn, "[{}] Transmission timed out, fragment abandoned", self.id());
            self.radio.set_standby_mode();
            self.telemetry.increment_transmit_errors();
        } else {
            log::trace!("[{}] Fragment transmitted", self.id());
            self.telemetry.increment_fragments_transmitted();
        }

        self.sink.next_fragment();
        self.transmission_started = None;
        if !self.sink.has_more_fragments() {
            if let Some(packet) = self.sink.pop_packet() {
                log::trace!("[{}] Packet seq {} sent", self.id(), packet.sequence_number);
            }
        }
        false
    }

    fn receive(&mut self, now: Instant) {
        self.radio.set_receive_mode();
        let Some(fragment) = self.radio.read_received_fragment() else {
            return;
        };
        self.telemetry.increment_fragments_received();

        match self.assembler.add_fragment(fragment, now) {
            Ok(added) => {
                if added.evicted > 0 {
                    log!(Level::Debug, "[{}] Assembler full, evicted {} fragments", self.id(), added.evicted);
                    self.telemetry.add_fragments_dropped(added.evicted);
                }
                if added.duplicate {
                    log::trace!("[{}] Duplicate fragment from {} ignored", self.id(), added.header.sender_id);
                }
                self.track_sequence_number(added.header.sender_id, added.header.sequence_number);
            }
            Err(err) => {
                log!(Level::Debug, "[{}] Malformed fragment dropped: {}", self.id(), err);
                self.telemetry.increment_fragments_dropped();
            }
        }
    }

    /// Counts a dropped fragment whenever a peer's sequence numbers skip
    fn track_sequence_number(&mut self, sender_id: NodeId, sequence_number: u16) {
        let last = &mut self.last_sequence_numbers[sender_id as usize];
        if let Some(previous) = *last {
            if sequence_number != previous && sequence_number != previous.wrapping_add(1) {
                log!(
                    Level::Debug,
                    "[{}] Sequence gap from {}: {} after {}",
                    self.schedule.id(),
                    sender_id,
                    sequence_number,
                    previous
                );
                self.telemetry.increment_fragments_dropped();
            }
        }
        *last = Some(sequence_number);
    }

    fn transmit(&mut self, now: Instant) {
        if self.radio.channel_activity_detected() {
            log::trace!("[{}] Channel busy, transmission deferred", self.id());
            return;
        }

        if !self.sink.has_more_fragments() {
            if let Some(packet) = self.sink.pop_packet() {
                log::trace!("[{}] Packet seq {} sent", self.id(), packet.sequence_number);
            }
            if !self.sink.encode_next_packet() {
                return;
            }
        }

        if self.schedule.time_slot_duration_remaining() <= self.radio.fragment_transmit_time() {
            log::trace!("[{}] Not enough slot time left, fragment deferred", self.schedule.id());
            return;
        }

        self.stamp_announcement();
        let Some(fragment) = self.sink.fragment() else {
            return;
        };
        if self.radio.transmit_fragment(fragment, self.config.tx_timeout) {
            self.transmission_started = Some(now);
        } else {
            log!(Level::Warn, "[{}] Radio refused to start transmission", self.schedule.id());
            self.telemetry.increment_transmit_errors();
        }
    }

    /// Writes the current cell time into this base station's own frame announcement
    /// right before its first fragment goes on air
    fn stamp_announcement(&mut self) {
        if !self.schedule.is_base_station() {
            return;
        }
        let id = self.id();
        let cell_time = self.schedule.cell_time();
        let Some(fragment) = self.sink.fragment_mut() else {
            return;
        };
        let Ok(header) = FragmentHeader::parse(&*fragment) else {
            return;
        };
        if header.index != 0 || header.protocol != Protocol::TdmaControl || header.sender_id != id {
            return;
        }

        let end = fragment.length.min(FRAGMENT_MTU);
        match FrameAnnouncement::restamp(&mut fragment.data[header.payload_offset()..end], cell_time) {
            Ok(()) => log::trace!("[{}] Frame announcement stamped at {} us", id, cell_time.as_micros()),
            Err(err) => log!(Level::Warn, "[{}] Frame announcement not stamped: {}", id, err),
        }
    }

    fn idle(&mut self, now: Instant) {
        self.radio.set_standby_mode();
        self.sample_rssi(now);
    }

    /// Reads the channel RSSI into telemetry, at most once per measurement interval
    fn sample_rssi(&mut self, now: Instant) {
        let due = self
            .last_rssi_measurement
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.rssi_measurement_interval);
        if due && self.schedule.time_slot_duration_remaining() > self.radio.rssi_measurement_time() {
            let rssi_dbm = self.radio.read_rssi_dbm();
            self.telemetry.set_rssi_dbm(rssi_dbm);
            self.last_rssi_measurement = Some(now);
        }
    }

    fn route_complete_packets(&mut self) {
        while let Some(result) = self.assembler.consume_packet::<PACKET_MAX_PAYLOAD_SIZE>() {
            match result {
                Ok(packet) => {
                    if packet.protocol == Protocol::TdmaControl {
                        self.apply_frame_announcement(&packet);
                    }
                    self.route(&packet);
                }
                Err(err) => {
                    log!(Level::Debug, "[{}] Packet reassembly failed: {}", self.id(), err);
                    self.telemetry.increment_fragments_dropped();
                }
            }
        }
    }

    fn apply_frame_announcement(&mut self, packet: &RadioPacket) {
        match FrameAnnouncement::decode(packet.payload()) {
            Ok(announcement) if announcement.frame.base_station_id() == packet.sender_id && packet.sender_id != self.id() => {
                log!(Level::Info, "[{}] Frame announced by base station {}", self.id(), packet.sender_id);
                self.schedule.mark_cell_time(announcement.time_announced);
                self.schedule.set_frame(announcement.frame);
            }
            Ok(_) => {
                log!(Level::Debug, "[{}] Frame announcement from {} ignored, not its base station", self.id(), packet.sender_id);
            }
            Err(err) => {
                log!(Level::Debug, "[{}] Invalid frame announcement from {}: {}", self.id(), packet.sender_id, err);
            }
        }
    }

    fn route(&self, packet: &RadioPacket) {
        if self.routers.iter().any(|router| router.route(packet)) {
            return;
        }
        log::trace!(
            "[{}] Unclaimed packet seq {} from {} (protocol {})",
            self.id(),
            packet.sequence_number,
            packet.sender_id,
            packet.protocol as u8
        );
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::messages::encode;
    use crate::radio_devices::{MockRadio, RadioMode};
    use crate::tdma::{FrameBuilder, Role};
    use crate::telemetry::{Metric, TelemetryAccumulator};
    use core::cell::RefCell;
    use embassy_futures::select::select;
    use futures::executor::block_on;

    type TestTransceiver<'a> = TdmaTransceiver<'a, MockRadio<FRAGMENT_MTU>, MockClock, TelemetryAccumulator<MockClock>>;

    struct RecordingRouter {
        claims: bool,
        packets: RefCell<std::vec::Vec<RadioPacket>>,
    }

    impl RecordingRouter {
        fn new(claims: bool) -> Self {
            RecordingRouter {
                claims,
                packets: RefCell::new(std::vec::Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.packets.borrow().len()
        }
    }

    impl PacketRouter<PACKET_MAX_PAYLOAD_SIZE> for RecordingRouter {
        fn route(&self, packet: &RadioPacket) -> bool {
            self.packets.borrow_mut().push(packet.clone());
            self.claims
        }
    }

    fn setup<'a>(id: NodeId) -> (MockClock, TestTransceiver<'a>) {
        let clock = MockClock::new();
        let radio = MockRadio::new(clock.clone()).unwrap();
        let telemetry = TelemetryAccumulator::new(id as u32, clock.clone());
        let transceiver = TdmaTransceiver::new(radio, clock.clone(), telemetry, id, TransceiverConfiguration::default());
        (clock, transceiver)
    }

    fn packet(sender: NodeId, destination: NodeId, seq: u16, len: usize) -> RadioPacket {
        let payload: std::vec::Vec<u8> = (0..len).map(|i| i as u8).collect();
        Packet::new(Protocol::Inet, sender, destination, seq, &payload).unwrap()
    }

    fn deliver(transceiver: &mut TestTransceiver<'_>, at: u64, packet: &RadioPacket) {
        for fragment in encode::<FRAGMENT_MTU, MAX_FRAGMENTS_PER_PACKET, PACKET_MAX_PAYLOAD_SIZE>(packet) {
            transceiver.radio_mut().add_rx_fragment(Instant::from_micros(at), fragment);
        }
    }

    fn step(clock: &MockClock, transceiver: &mut TestTransceiver<'_>, at: u64) {
        clock.set_micros(at);
        transceiver.iterate(Instant::from_micros(at));
    }

    fn count(transceiver: &TestTransceiver<'_>, metric: Metric) -> u32 {
        transceiver.telemetry().count(metric).unwrap()
    }

    fn transmit_frame(owner: NodeId, tx_us: u32, guard_us: u32) -> Frame {
        FrameBuilder::new(0)
            .base_station_id(0)
            .add_node_tx_slot(tx_us, owner)
            .add_guard_interval(guard_us)
            .build()
            .unwrap()
    }

    #[test]
    fn does_nothing_without_traffic() {
        let (clock, mut transceiver) = setup(3);
        for at in [0, 1_000, 50_000] {
            step(&clock, &mut transceiver, at);
        }
        assert_eq!(transceiver.radio_mut().mode(), RadioMode::Receive);
        assert!(transceiver.radio().sent_fragments().is_empty());
        assert_eq!(count(&transceiver, Metric::FragmentsRx), 0);
        assert_eq!(count(&transceiver, Metric::FragmentsTx), 0);
        assert_eq!(count(&transceiver, Metric::DroppedFragments), 0);
        assert_eq!(count(&transceiver, Metric::TxQueueSize), 0);
    }

    #[test]
    fn receives_and_routes_a_packet() {
        let router = RecordingRouter::new(true);
        let (clock, mut transceiver) = setup(2);
        transceiver.add_router(&router).unwrap();
        let sent = packet(1, 2, 40, 100);
        let fragments = encode::<FRAGMENT_MTU, MAX_FRAGMENTS_PER_PACKET, PACKET_MAX_PAYLOAD_SIZE>(&sent);

        step(&clock, &mut transceiver, 0);
        transceiver.radio_mut().add_rx_fragment(Instant::from_micros(10), fragments[0].clone());
        transceiver.radio_mut().add_rx_fragment(Instant::from_micros(20), fragments[1].clone());

        step(&clock, &mut transceiver, 10);
        assert_eq!(router.count(), 0);
        step(&clock, &mut transceiver, 20);

        assert_eq!(router.packets.borrow().as_slice(), &[sent]);
        assert_eq!(count(&transceiver, Metric::FragmentsRx), 2);
        assert_eq!(count(&transceiver, Metric::DroppedFragments), 0);
    }

    #[test]
    fn out_of_order_fragments_are_reassembled() {
        let router = RecordingRouter::new(true);
        let (clock, mut transceiver) = setup(2);
        transceiver.add_router(&router).unwrap();
        let sent = packet(1, 2, 7, 150);
        let fragments = encode::<FRAGMENT_MTU, MAX_FRAGMENTS_PER_PACKET, PACKET_MAX_PAYLOAD_SIZE>(&sent);
        assert_eq!(fragments.len(), 3);

        step(&clock, &mut transceiver, 0);
        for (at, index) in [(10, 2), (20, 0), (30, 1)] {
            transceiver.radio_mut().add_rx_fragment(Instant::from_micros(at), fragments[index].clone());
            step(&clock, &mut transceiver, at);
        }
        assert_eq!(router.packets.borrow().as_slice(), &[sent]);
    }

    #[test]
    fn sends_a_single_fragment_packet() {
        let (clock, mut transceiver) = setup(1);
        transceiver.set_frame(transmit_frame(1, 10_000, 1_000));
        let sent = packet(1, 2, 9, 20);
        transceiver.push_normal(sent.clone()).unwrap();

        step(&clock, &mut transceiver, 0);
        assert!(transceiver.radio_mut().is_transmitting_fragment());
        assert_eq!(count(&transceiver, Metric::TxQueueSize), 1);

        step(&clock, &mut transceiver, 700);
        assert_eq!(count(&transceiver, Metric::FragmentsTx), 1);
        assert_eq!(count(&transceiver, Metric::TxQueueSize), 0);
        assert_eq!(transceiver.transmit_queue_size(), 0);

        let air = transceiver.radio().sent_fragments();
        assert_eq!(air.len(), 1);
        let refs: std::vec::Vec<_> = air.iter().collect();
        assert_eq!(crate::messages::assemble::<FRAGMENT_MTU, PACKET_MAX_PAYLOAD_SIZE>(&refs), Ok(sent));
    }

    #[test]
    fn sequence_gap_counts_one_dropped_fragment() {
        let (clock, mut transceiver) = setup(2);
        step(&clock, &mut transceiver, 0);

        deliver(&mut transceiver, 10, &packet(1, 2, 5, 4));
        step(&clock, &mut transceiver, 10);
        assert_eq!(count(&transceiver, Metric::DroppedFragments), 0);

        deliver(&mut transceiver, 20, &packet(1, 2, 7, 4));
        step(&clock, &mut transceiver, 20);
        assert_eq!(count(&transceiver, Metric::DroppedFragments), 1);

        deliver(&mut transceiver, 30, &packet(1, 2, 8, 4));
        deliver(&mut transceiver, 40, &packet(3, 2, 100, 4));
        step(&clock, &mut transceiver, 30);
        step(&clock, &mut transceiver, 40);
        assert_eq!(count(&transceiver, Metric::DroppedFragments), 1);
        assert_eq!(count(&transceiver, Metric::FragmentsRx), 4);
    }

    #[test]
    fn sequence_tracking_wraps_around() {
        let (clock, mut transceiver) = setup(2);
        step(&clock, &mut transceiver, 0);
        deliver(&mut transceiver, 10, &packet(1, 2, u16::MAX, 4));
        deliver(&mut transceiver, 20, &packet(1, 2, 0, 4));
        step(&clock, &mut transceiver, 10);
        step(&clock, &mut transceiver, 20);
        assert_eq!(count(&transceiver, Metric::DroppedFragments), 0);
    }

    #[test]
    fn defers_fragment_that_does_not_fit_the_slot() {
        let (clock, mut transceiver) = setup(1);
        transceiver.set_frame(transmit_frame(1, 1_000, 1_000));
        transceiver.push_normal(packet(1, 2, 3, 100)).unwrap();

        step(&clock, &mut transceiver, 0);
        step(&clock, &mut transceiver, 700);
        assert_eq!(transceiver.radio().sent_fragments().len(), 1);
        assert!(!transceiver.radio_mut().is_transmitting_fragment());

        for at in [800, 999, 1_500, 1_999] {
            step(&clock, &mut transceiver, at);
            assert!(!transceiver.radio_mut().is_transmitting_fragment());
        }
        assert_eq!(transceiver.radio().sent_fragments().len(), 1);

        step(&clock, &mut transceiver, 2_000);
        assert!(transceiver.radio_mut().is_transmitting_fragment());
        step(&clock, &mut transceiver, 2_700);
        assert_eq!(transceiver.radio().sent_fragments().len(), 2);
        assert_eq!(transceiver.radio().sent_fragments()[1].fragment_index(), Some(1));
        assert_eq!(count(&transceiver, Metric::FragmentsTx), 2);
        assert_eq!(count(&transceiver, Metric::TxErrors), 0);
    }

    #[test]
    fn stalled_transmission_times_out() {
        let (clock, mut transceiver) = setup(1);
        transceiver.set_frame(transmit_frame(1, 10_000, 1_000));
        transceiver.radio_mut().set_stall_transmit(true);
        transceiver.push_control(packet(1, 2, 3, 10)).unwrap();

        step(&clock, &mut transceiver, 0);
        step(&clock, &mut transceiver, 2_999);
        assert_eq!(count(&transceiver, Metric::TxErrors), 0);

        step(&clock, &mut transceiver, 3_000);
        assert_eq!(count(&transceiver, Metric::TxErrors), 1);
        assert_eq!(count(&transceiver, Metric::FragmentsTx), 0);
        assert_eq!(transceiver.radio().corrupted_fragment_count(), 1);
        assert_eq!(transceiver.transmit_queue_size(), 0);
        assert!(transceiver.radio().sent_fragments().is_empty());
    }

    #[test]
    fn refused_transmission_counts_an_error_and_retries() {
        let (clock, mut transceiver) = setup(1);
        transceiver.set_frame(transmit_frame(1, 10_000, 1_000));
        transceiver.radio_mut().set_refuse_transmit(true);
        transceiver.push_normal(packet(1, 2, 3, 10)).unwrap();

        step(&clock, &mut transceiver, 0);
        assert_eq!(count(&transceiver, Metric::TxErrors), 1);
        assert_eq!(transceiver.transmit_queue_size(), 1);

        transceiver.radio_mut().set_refuse_transmit(false);
        step(&clock, &mut transceiver, 100);
        step(&clock, &mut transceiver, 800);
        assert_eq!(transceiver.radio().sent_fragments().len(), 1);
    }

    #[test]
    fn busy_channel_defers_transmission() {
        let (clock, mut transceiver) = setup(1);
        transceiver.set_frame(transmit_frame(1, 10_000, 1_000));
        transceiver.radio_mut().set_channel_busy(true);
        transceiver.push_normal(packet(1, 2, 3, 10)).unwrap();

        step(&clock, &mut transceiver, 0);
        assert!(!transceiver.radio_mut().is_transmitting_fragment());
        assert_eq!(count(&transceiver, Metric::TxErrors), 0);

        transceiver.radio_mut().set_channel_busy(false);
        step(&clock, &mut transceiver, 100);
        assert!(transceiver.radio_mut().is_transmitting_fragment());
    }

    #[test]
    fn base_station_announcement_updates_the_frame() {
        let (base_clock, mut base) = setup(0);
        let frame = FrameBuilder::new(0)
            .base_station_id(0)
            .add_node_tx_slot(5_000, 0)
            .add_node_tx_slot(5_000, 2)
            .add_guard_interval(1_000)
            .build()
            .unwrap();
        base.set_frame(frame.clone());
        base.announce_frame().unwrap();

        step(&base_clock, &mut base, 0);
        step(&base_clock, &mut base, 700);
        let air = base.radio_mut().take_sent_fragments();
        assert_eq!(air.len(), 1);

        let router = RecordingRouter::new(true);
        let (clock, mut node) = setup(2);
        node.add_router(&router).unwrap();
        assert!(!node.schedule().is_self_associated());

        step(&clock, &mut node, 0);
        for fragment in air {
            node.radio_mut().add_rx_fragment(Instant::from_micros(800), fragment);
        }
        step(&clock, &mut node, 800);

        assert_eq!(node.schedule().frame(), &frame);
        assert!(node.schedule().is_self_associated());
        assert_eq!(node.schedule().clock().skew_us(), -800);
        assert_eq!(router.count(), 1);
        assert_eq!(router.packets.borrow()[0].protocol, Protocol::TdmaControl);
    }

    #[test]
    fn announcement_from_another_sender_is_ignored() {
        let frame = FrameBuilder::new(0).base_station_id(0).add_node_tx_slot(5_000, 2).build().unwrap();
        let announcement = FrameAnnouncement::new(Instant::from_micros(0), frame);
        let mut buf = [0u8; MAX_ANNOUNCEMENT_SIZE];
        let len = announcement.encode(&mut buf).unwrap();
        let forged = Packet::new(Protocol::TdmaControl, 9, BROADCAST_ID, 1, &buf[..len]).unwrap();

        let (clock, mut node) = setup(2);
        step(&clock, &mut node, 0);
        deliver(&mut node, 10, &forged);
        step(&clock, &mut node, 10);
        assert_eq!(node.schedule().frame(), &Frame::default_node_frame());
        assert_eq!(node.schedule().clock().skew_us(), 0);
    }

    #[test]
    fn only_the_base_station_announces() {
        let (_clock, mut node) = setup(2);
        assert_eq!(node.announce_frame(), Err(AnnounceError::NotBaseStation));
        assert_eq!(node.transmit_queue_size(), 0);
    }

    #[test]
    fn first_claiming_router_wins() {
        let declines = RecordingRouter::new(false);
        let claims = RecordingRouter::new(true);
        let never_asked = RecordingRouter::new(true);
        let (clock, mut transceiver) = setup(2);
        transceiver.add_router(&declines).unwrap();
        transceiver.add_router(&claims).unwrap();
        transceiver.add_router(&never_asked).unwrap();

        step(&clock, &mut transceiver, 0);
        deliver(&mut transceiver, 10, &packet(1, 2, 1, 8));
        step(&clock, &mut transceiver, 10);

        assert_eq!(declines.count(), 1);
        assert_eq!(claims.count(), 1);
        assert_eq!(never_asked.count(), 0);
    }

    #[test]
    fn router_table_is_bounded() {
        let router = RecordingRouter::new(true);
        let (_clock, mut transceiver) = setup(2);
        for _ in 0..MAX_ROUTERS {
            transceiver.add_router(&router).unwrap();
        }
        assert_eq!(transceiver.add_router(&router), Err(RouterTableFull));
    }

    #[test]
    fn unclaimed_packets_are_discarded() {
        let (clock, mut transceiver) = setup(2);
        step(&clock, &mut transceiver, 0);
        deliver(&mut transceiver, 10, &packet(1, BROADCAST_ID, 1, 8));
        step(&clock, &mut transceiver, 10);
        assert_eq!(count(&transceiver, Metric::FragmentsRx), 1);
        assert_eq!(count(&transceiver, Metric::DroppedFragments), 0);
    }

    #[test]
    fn stale_partial_packets_count_as_dropped() {
        let (clock, mut transceiver) = setup(2);
        let fragments = encode::<FRAGMENT_MTU, MAX_FRAGMENTS_PER_PACKET, PACKET_MAX_PAYLOAD_SIZE>(&packet(1, 2, 1, 100));

        step(&clock, &mut transceiver, 0);
        transceiver.radio_mut().add_rx_fragment(Instant::from_micros(10), fragments[0].clone());
        step(&clock, &mut transceiver, 10);
        assert_eq!(count(&transceiver, Metric::DroppedFragments), 0);

        step(&clock, &mut transceiver, 2_000_011);
        assert_eq!(count(&transceiver, Metric::DroppedFragments), 1);
    }

    #[test]
    fn malformed_fragment_counts_as_dropped() {
        let (clock, mut transceiver) = setup(2);
        step(&clock, &mut transceiver, 0);
        let junk = crate::messages::Fragment::from_bytes(&[1, 2, 3]).unwrap();
        transceiver.radio_mut().add_rx_fragment(Instant::from_micros(10), junk);
        step(&clock, &mut transceiver, 10);
        assert_eq!(count(&transceiver, Metric::FragmentsRx), 1);
        assert_eq!(count(&transceiver, Metric::DroppedFragments), 1);
    }

    #[test]
    fn idle_slots_sample_rssi() {
        let (clock, mut transceiver) = setup(1);
        let frame = FrameBuilder::new(0).base_station_id(0).default_role(Role::Blackout).add_blackout_slot(100_000).build().unwrap();
        transceiver.set_frame(frame);

        step(&clock, &mut transceiver, 0);
        assert_eq!(transceiver.radio_mut().mode(), RadioMode::Standby);
        assert_eq!(transceiver.telemetry().rssi_dbm(), crate::radio_devices::mock::MOCK_DEFAULT_RSSI_DBM);

        transceiver.radio_mut().set_rssi_dbm(-70.0);
        step(&clock, &mut transceiver, 5_000);
        assert_eq!(transceiver.telemetry().rssi_dbm(), crate::radio_devices::mock::MOCK_DEFAULT_RSSI_DBM);

        step(&clock, &mut transceiver, 10_000);
        assert_eq!(transceiver.telemetry().rssi_dbm(), -70.0);
    }

    #[test]
    fn owned_slot_without_traffic_samples_rssi() {
        let (clock, mut transceiver) = setup(1);
        transceiver.set_frame(transmit_frame(1, 100_000, 1_000));

        step(&clock, &mut transceiver, 0);
        assert!(transceiver.schedule().can_transmit());
        assert_eq!(transceiver.telemetry().rssi_dbm(), crate::radio_devices::mock::MOCK_DEFAULT_RSSI_DBM);

        transceiver.radio_mut().set_rssi_dbm(-95.0);
        step(&clock, &mut transceiver, 5_000);
        assert_eq!(transceiver.telemetry().rssi_dbm(), crate::radio_devices::mock::MOCK_DEFAULT_RSSI_DBM);
        step(&clock, &mut transceiver, 10_000);
        assert_eq!(transceiver.telemetry().rssi_dbm(), -95.0);

        transceiver.radio_mut().set_rssi_dbm(-60.0);
        transceiver.push_normal(packet(1, 2, 1, 10)).unwrap();
        step(&clock, &mut transceiver, 20_000);
        assert!(transceiver.radio_mut().is_transmitting_fragment());
        assert_eq!(transceiver.telemetry().rssi_dbm(), -95.0);
    }

    #[test]
    fn sent_packet_leaves_the_queue_with_its_last_fragment() {
        let (clock, mut transceiver) = setup(1);
        transceiver.set_frame(transmit_frame(1, 1_450, 5_000));
        transceiver.push_normal(packet(1, 2, 3, 80)).unwrap();

        step(&clock, &mut transceiver, 0);
        step(&clock, &mut transceiver, 700);
        assert_eq!(transceiver.transmit_queue_size(), 1);

        step(&clock, &mut transceiver, 1_500);
        assert!(!transceiver.schedule().can_transmit());
        assert_eq!(transceiver.radio().sent_fragments().len(), 2);
        assert_eq!(transceiver.transmit_queue_size(), 0);
        assert_eq!(count(&transceiver, Metric::TxQueueSize), 0);
    }

    #[test]
    fn announcement_carries_the_time_it_went_on_air() {
        let frame = Frame::default_base_station_frame(0);
        let (base_clock, mut base) = setup(0);
        base.set_frame(frame.clone());

        step(&base_clock, &mut base, 150_000);
        base.announce_frame().unwrap();
        step(&base_clock, &mut base, 160_000);
        assert!(base.radio().sent_fragments().is_empty());

        step(&base_clock, &mut base, 220_000);
        step(&base_clock, &mut base, 220_700);
        let air = base.radio_mut().take_sent_fragments();
        assert_eq!(air.len(), 1);
        let refs: std::vec::Vec<_> = air.iter().collect();
        let sent = crate::messages::assemble::<FRAGMENT_MTU, PACKET_MAX_PAYLOAD_SIZE>(&refs).unwrap();
        let announcement = FrameAnnouncement::decode(sent.payload()).unwrap();
        assert_eq!(announcement.time_announced, Instant::from_micros(220_000));

        let (node_clock, mut node) = setup(2);
        step(&node_clock, &mut node, 220_000);
        for fragment in air {
            node.radio_mut().add_rx_fragment(Instant::from_micros(220_800), fragment);
        }
        step(&node_clock, &mut node, 220_800);
        assert_eq!(node.schedule().frame(), &frame);

        base_clock.set_micros(221_000);
        node_clock.set_micros(221_000);
        let disagreement = base.schedule().cell_time().as_micros().abs_diff(node.schedule().cell_time().as_micros());
        assert!(disagreement < 10_000, "cell clocks disagree by {} us", disagreement);
    }

    #[test]
    fn tick_follows_the_transceiver_clock() {
        let (clock, mut transceiver) = setup(1);
        transceiver.set_frame(transmit_frame(1, 10_000, 1_000));
        transceiver.radio_mut().set_stall_transmit(true);
        transceiver.push_normal(packet(1, 2, 3, 10)).unwrap();

        clock.set_micros(1_000);
        transceiver.tick();
        assert!(transceiver.radio_mut().is_transmitting_fragment());

        clock.set_micros(3_999);
        transceiver.tick();
        assert_eq!(count(&transceiver, Metric::TxErrors), 0);

        clock.set_micros(4_000);
        transceiver.tick();
        assert_eq!(count(&transceiver, Metric::TxErrors), 1);
        assert_eq!(transceiver.transmit_queue_size(), 0);
    }

    #[test]
    fn outgoing_channel_feeds_the_queue() {
        let channel: OutgoingPacketChannel = Channel::new();
        let (clock, mut transceiver) = setup(2);
        transceiver.attach_outgoing_channel(channel.receiver());

        channel
            .sender()
            .try_send(OutgoingPacket {
                priority: Priority::Low,
                packet: packet(2, 1, 1, 8),
            })
            .unwrap();
        step(&clock, &mut transceiver, 0);
        assert_eq!(transceiver.transmit_queue_size(), 1);
        assert_eq!(count(&transceiver, Metric::TxQueueSize), 1);
    }

    #[test]
    fn sequence_numbers_increment_and_wrap() {
        let (_clock, mut transceiver) = setup(2);
        assert_eq!(transceiver.next_sequence_number(), 0);
        assert_eq!(transceiver.next_sequence_number(), 1);
        transceiver.sequence_number = u16::MAX;
        assert_eq!(transceiver.next_sequence_number(), u16::MAX);
        assert_eq!(transceiver.next_sequence_number(), 0);
    }

    #[test]
    fn run_loop_ticks() {
        let router = RecordingRouter::new(true);
        let (_clock, mut transceiver) = setup(2);
        transceiver.add_router(&router).unwrap();
        transceiver.iterate(Instant::from_micros(0));
        deliver(&mut transceiver, 0, &packet(1, 2, 1, 8));

        block_on(select(transceiver.run(Duration::from_millis(1)), futures::future::ready(())));
        assert_eq!(router.count(), 1);
    }
}
