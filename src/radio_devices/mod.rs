//! Radio device contract and implementations
//!
//! The transceiver drives any half-duplex radio through [`HalfDuplexRadio`]. Every call
//! is non-blocking: the transceiver polls the radio once per tick and never waits on it.
//!
//! - `settings`: capability-based configuration shared by all drivers ([`RadioDriver`])
//! - `mock`: simulated radio running on a [`crate::clock::MockClock`] for tests

pub mod settings;

#[cfg(feature = "std")]
pub mod mock;

use embassy_time::Duration;

use crate::messages::Fragment;

pub use settings::{AllowedValues, Capability, Function, LineCoding, ModulationScheme, RadioDriver, SettingError, SettingsTable, Value};

#[cfg(feature = "std")]
pub use mock::{MockRadio, RadioMode};

/// Non-blocking interface to a half-duplex packet radio
///
/// The radio is in exactly one of standby, receive or transmit mode at any time. Mode
/// changes are idempotent: requesting the current mode again has no effect.
pub trait HalfDuplexRadio<const MTU: usize> {
    /// Returns the radio to its power-on state in standby mode
    fn reset(&mut self);

    /// Samples the ambient signal strength, in dBm
    fn read_rssi_dbm(&mut self) -> f32;

    /// Enters standby, aborting any reception or transmission in progress
    fn set_standby_mode(&mut self);

    /// Enters receive mode
    fn set_receive_mode(&mut self);

    /// True if a received fragment is waiting to be read
    fn has_fragment_available(&mut self) -> bool;

    /// Takes the waiting fragment out of the radio
    ///
    /// # Returns
    /// The fragment, or `None` if nothing was received
    fn read_received_fragment(&mut self) -> Option<Fragment<MTU>>;

    /// True if another transmitter is currently using the channel
    fn channel_activity_detected(&mut self) -> bool;

    /// Starts transmitting `fragment` and returns immediately
    ///
    /// # Arguments
    /// * `fragment` - The fragment to send
    /// * `timeout` - Upper bound for the transmission; a radio may abort on its own once
    ///   it expires
    ///
    /// # Returns
    /// true if the transmission was started
    fn transmit_fragment(&mut self, fragment: &Fragment<MTU>, timeout: Duration) -> bool;

    /// True while a started transmission has not finished
    fn is_transmitting_fragment(&mut self) -> bool;

    /// How long an RSSI sample takes
    fn rssi_measurement_time(&self) -> Duration;

    /// How long one full-size fragment takes on air
    fn fragment_transmit_time(&self) -> Duration;
}
