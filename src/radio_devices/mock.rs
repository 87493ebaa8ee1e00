//! # Mock Radio - Simulated Half-Duplex Radio for Testing
//!
//! A host-side radio that follows the [`HalfDuplexRadio`] contract with realistic timing
//! but no hardware. It runs on a shared [`MockClock`], so a test advances time once and
//! the transceiver and the radio observe the same instant.
//!
//! ## Architecture
//!
//! - **Modes**: standby, receive and transmit, exactly one at a time
//! - **Transmission**: takes `MOCK_FRAGMENT_TRANSMIT_TIME_US` of clock time; once it has
//!   elapsed the fragment is recorded in `sent_fragments()` and the radio falls back to
//!   standby
//! - **Reception**: fragments are scheduled with `add_rx_fragment(at, fragment)`. When
//!   their time comes they land in a single-fragment receive buffer if the radio is in
//!   receive mode; otherwise, or if the buffer is still occupied, they are dropped
//! - **Fault injection**: channel activity, refusing to start a transmission, and a
//!   transmission that never completes
//!
//! ## Bookkeeping
//!
//! - `dropped_fragment_count()`: arrivals the radio could not receive
//! - `corrupted_fragment_count()`: transmissions cut short by a mode change or by a new
//!   transmission
//!
//! The radio also carries an RFM69-like capability table behind [`RadioDriver`].

use std::collections::VecDeque;
use std::vec::Vec;

use embassy_time::{Duration, Instant};
use log::{Level, log};

use super::HalfDuplexRadio;
use super::settings::{AllowedValues, Capability, Function, LineCoding, ModulationScheme, RadioDriver, SettingError, SettingsTable, Value};
use crate::clock::{Clock, MockClock};
use crate::messages::Fragment;

/// Time one fragment spends on air
pub const MOCK_FRAGMENT_TRANSMIT_TIME_US: u64 = 700;

/// Time one RSSI sample takes
pub const MOCK_RSSI_MEASUREMENT_TIME_US: u64 = 500;

/// Ambient RSSI reported until a test sets another value
pub const MOCK_DEFAULT_RSSI_DBM: f32 = -110.0;

static MOCK_CAPABILITIES: [Capability; 11] = [
    Capability {
        function: Function::CarrierFrequencyHz,
        allowed: AllowedValues::FloatRange { min: 405e6, max: 510e6 },
    },
    Capability {
        function: Function::ModulationScheme,
        allowed: AllowedValues::Modulations(&[
            ModulationScheme::Ook,
            ModulationScheme::Fsk,
            ModulationScheme::Gfsk,
            ModulationScheme::Msk,
            ModulationScheme::Gmsk,
        ]),
    },
    Capability {
        function: Function::TxPowerDbm,
        allowed: AllowedValues::IntRange { min: -2, max: 20 },
    },
    Capability {
        function: Function::Mtu,
        allowed: AllowedValues::IntRange { min: 1, max: 255 },
    },
    Capability {
        function: Function::PreambleLength,
        allowed: AllowedValues::IntRange { min: 0, max: 0xFFFF },
    },
    Capability {
        function: Function::SyncWordsLength,
        allowed: AllowedValues::IntRange { min: 0, max: 8 },
    },
    Capability {
        function: Function::LineCoding,
        allowed: AllowedValues::LineCodings(&[LineCoding::None, LineCoding::Whitening, LineCoding::Manchester]),
    },
    Capability {
        function: Function::BitRate,
        allowed: AllowedValues::IntRange { min: 1_200, max: 300_000 },
    },
    Capability {
        function: Function::FrequencyDeviation,
        allowed: AllowedValues::IntRange { min: 600, max: 300_000 },
    },
    Capability {
        function: Function::ReceiveSensitivityThresholdDbm,
        allowed: AllowedValues::FloatRange { min: -127.5, max: 0.0 },
    },
    Capability {
        function: Function::ChannelActivityThresholdDbm,
        allowed: AllowedValues::FloatRange { min: -127.5, max: 0.0 },
    },
];

const MOCK_DEFAULTS: [(Function, Value); 11] = [
    (Function::CarrierFrequencyHz, Value::Float(434e6)),
    (Function::ModulationScheme, Value::Modulation(ModulationScheme::Gfsk)),
    (Function::TxPowerDbm, Value::Int(13)),
    (Function::Mtu, Value::Int(64)),
    (Function::PreambleLength, Value::Int(4)),
    (Function::SyncWordsLength, Value::Int(2)),
    (Function::LineCoding, Value::LineCoding(LineCoding::Whitening)),
    (Function::BitRate, Value::Int(250_000)),
    (Function::FrequencyDeviation, Value::Int(125_000)),
    (Function::ReceiveSensitivityThresholdDbm, Value::Float(-100.0)),
    (Function::ChannelActivityThresholdDbm, Value::Float(-90.0)),
];

/// Current operating mode of a [`MockRadio`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioMode {
    Standby,
    Receive,
    Transmit,
}

/// Simulated half-duplex radio
pub struct MockRadio<const MTU: usize> {
    clock: MockClock,
    mode: RadioMode,
    transmission: Option<(Instant, Fragment<MTU>)>,
    scheduled: VecDeque<(Instant, Fragment<MTU>)>,
    rx_buffer: Option<Fragment<MTU>>,
    sent: Vec<Fragment<MTU>>,
    dropped: usize,
    corrupted: usize,
    mode_changes: usize,
    channel_busy: bool,
    refuse_transmit: bool,
    stall_transmit: bool,
    rssi_dbm: f32,
    settings: SettingsTable<11>,
}

impl<const MTU: usize> MockRadio<MTU> {
    /// Creates a radio in standby mode
    ///
    /// # Arguments
    /// * `clock` - Shared clock; clone the one driving the transceiver
    pub fn new(clock: MockClock) -> Result<Self, SettingError> {
        Ok(MockRadio {
            clock,
            mode: RadioMode::Standby,
            transmission: None,
            scheduled: VecDeque::new(),
            rx_buffer: None,
            sent: Vec::new(),
            dropped: 0,
            corrupted: 0,
            mode_changes: 0,
            channel_busy: false,
            refuse_transmit: false,
            stall_transmit: false,
            rssi_dbm: MOCK_DEFAULT_RSSI_DBM,
            settings: SettingsTable::new(&MOCK_CAPABILITIES, &MOCK_DEFAULTS)?,
        })
    }

    /// Schedules `fragment` to arrive over the air at `at`
    pub fn add_rx_fragment(&mut self, at: Instant, fragment: Fragment<MTU>) {
        let position = self.scheduled.iter().position(|(time, _)| *time > at).unwrap_or(self.scheduled.len());
        self.scheduled.insert(position, (at, fragment));
    }

    /// Fragments whose transmission completed, oldest first
    pub fn sent_fragments(&self) -> &[Fragment<MTU>] {
        &self.sent
    }

    /// Removes and returns the completed transmissions
    pub fn take_sent_fragments(&mut self) -> Vec<Fragment<MTU>> {
        core::mem::take(&mut self.sent)
    }

    pub fn dropped_fragment_count(&self) -> usize {
        self.dropped
    }

    pub fn corrupted_fragment_count(&self) -> usize {
        self.corrupted
    }

    /// Number of actual mode transitions so far
    pub fn mode_change_count(&self) -> usize {
        self.mode_changes
    }

    pub fn mode(&mut self) -> RadioMode {
        self.update();
        self.mode
    }

    pub fn set_channel_busy(&mut self, busy: bool) {
        self.channel_busy = busy;
    }

    /// Makes `transmit_fragment` fail to start
    pub fn set_refuse_transmit(&mut self, refuse: bool) {
        self.refuse_transmit = refuse;
    }

    /// Makes started transmissions never complete
    pub fn set_stall_transmit(&mut self, stall: bool) {
        self.stall_transmit = stall;
    }

    pub fn set_rssi_dbm(&mut self, rssi_dbm: f32) {
        self.rssi_dbm = rssi_dbm;
    }

    fn update(&mut self) {
        let now = self.clock.now();

        if !self.stall_transmit {
            let finished = matches!(&self.transmission, Some((started, _)) if now.saturating_duration_since(*started).as_micros() >= MOCK_FRAGMENT_TRANSMIT_TIME_US);
            if finished {
                if let Some((_, fragment)) = self.transmission.take() {
                    self.sent.push(fragment);
                }
                self.mode = RadioMode::Standby;
            }
        }

        while self.scheduled.front().is_some_and(|(time, _)| *time <= now) {
            let Some((_, fragment)) = self.scheduled.pop_front() else {
                break;
            };
            if self.mode != RadioMode::Receive {
                log!(Level::Debug, "Mock radio not receiving, fragment lost");
                self.dropped += 1;
            } else if self.rx_buffer.is_some() {
                log!(Level::Debug, "Mock radio receive buffer occupied, fragment lost");
                self.dropped += 1;
            } else {
                self.rx_buffer = Some(fragment);
            }
        }
    }

    fn change_mode(&mut self, mode: RadioMode) {
        self.update();
        if self.mode == mode {
            return;
        }
        if self.transmission.take().is_some() {
            self.corrupted += 1;
        }
        self.mode = mode;
        self.mode_changes += 1;
    }
}

impl<const MTU: usize> HalfDuplexRadio<MTU> for MockRadio<MTU> {
    fn reset(&mut self) {
        self.update();
        self.transmission = None;
        self.rx_buffer = None;
        if self.mode != RadioMode::Standby {
            self.mode = RadioMode::Standby;
            self.mode_changes += 1;
        }
    }

    fn read_rssi_dbm(&mut self) -> f32 {
        self.rssi_dbm
    }

    fn set_standby_mode(&mut self) {
        self.change_mode(RadioMode::Standby);
    }

    fn set_receive_mode(&mut self) {
        self.change_mode(RadioMode::Receive);
    }

    fn has_fragment_available(&mut self) -> bool {
        self.update();
        self.rx_buffer.is_some()
    }

    fn read_received_fragment(&mut self) -> Option<Fragment<MTU>> {
        self.update();
        self.rx_buffer.take()
    }

    fn channel_activity_detected(&mut self) -> bool {
        self.channel_busy
    }

    fn transmit_fragment(&mut self, fragment: &Fragment<MTU>, _timeout: Duration) -> bool {
        self.update();
        if self.refuse_transmit {
            return false;
        }
        if self.transmission.is_some() {
            self.corrupted += 1;
        }
        if self.mode != RadioMode::Transmit {
            self.mode = RadioMode::Transmit;
            self.mode_changes += 1;
        }
        self.transmission = Some((self.clock.now(), fragment.clone()));
        true
    }

    fn is_transmitting_fragment(&mut self) -> bool {
        self.update();
        self.transmission.is_some()
    }

    fn rssi_measurement_time(&self) -> Duration {
        Duration::from_micros(MOCK_RSSI_MEASUREMENT_TIME_US)
    }

    fn fragment_transmit_time(&self) -> Duration {
        Duration::from_micros(MOCK_FRAGMENT_TRANSMIT_TIME_US)
    }
}

impl<const MTU: usize> RadioDriver for MockRadio<MTU> {
    fn capabilities(&self) -> &[Capability] {
        self.settings.capabilities()
    }

    fn get(&self, function: Function) -> Result<Value, SettingError> {
        self.settings.get(function)
    }

    fn set(&mut self, function: Function, value: Value) -> Result<(), SettingError> {
        self.settings.set(function, value)
    }
}
