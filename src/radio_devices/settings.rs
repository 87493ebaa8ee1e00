//! # Radio Settings
//!
//! Capability-based configuration of radio drivers.
//!
//! ## Architecture
//!
//! Every driver exposes the same small interface, [`RadioDriver`]:
//! - `capabilities()` lists the [`Function`]s the hardware supports together with the
//!   values each accepts ([`AllowedValues`])
//! - `get(function)` reads the current value
//! - `set(function, value)` validates against the capability map and applies the value
//!
//! A function the driver does not support is reported as
//! [`SettingError::UnsupportedFunction`]; a value outside the allowed set as
//! [`SettingError::InvalidSetting`]. Neither is ever silently ignored. A supported function
//! that has not been given a value yet reads as [`SettingError::NotConfigured`].
//!
//! [`SettingsTable`] implements the bookkeeping half of the interface (capability lookup,
//! validation, stored values) so that drivers only have to push values to hardware.

use heapless::Vec;

/// A configurable radio parameter
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum Function {
    CarrierFrequencyHz,
    ModulationScheme,
    TxPowerDbm,
    Mtu,
    PreambleLength,
    SyncWordsLength,
    LineCoding,
    BitRate,
    FrequencyDeviation,
    ReceiveSensitivityThresholdDbm,
    ChannelActivityThresholdDbm,
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum ModulationScheme {
    Ook,
    Ask,
    Fsk,
    Gfsk,
    Msk,
    Gmsk,
    Css,
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum LineCoding {
    None,
    Whitening,
    Manchester,
}

/// Value of a setting
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum Value {
    Int(i64),
    Float(f32),
    Modulation(ModulationScheme),
    LineCoding(LineCoding),
}

/// Values a driver accepts for one function
#[derive(Clone, Copy)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum AllowedValues {
    /// Inclusive integer range
    IntRange { min: i64, max: i64 },
    /// Inclusive float range
    FloatRange { min: f32, max: f32 },
    Modulations(&'static [ModulationScheme]),
    LineCodings(&'static [LineCoding]),
}

impl AllowedValues {
    /// True if `value` has the right kind and lies within the allowed set
    pub fn permits(&self, value: Value) -> bool {
        match (self, value) {
            (AllowedValues::IntRange { min, max }, Value::Int(v)) => (*min..=*max).contains(&v),
            (AllowedValues::FloatRange { min, max }, Value::Float(v)) => v >= *min && v <= *max,
            (AllowedValues::Modulations(allowed), Value::Modulation(v)) => allowed.contains(&v),
            (AllowedValues::LineCodings(allowed), Value::LineCoding(v)) => allowed.contains(&v),
            _ => false,
        }
    }
}

/// One entry of a driver's capability map
#[derive(Clone, Copy)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct Capability {
    pub function: Function,
    pub allowed: AllowedValues,
}

/// Errors while reading or changing radio settings
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum SettingError {
    /// The driver has no such function
    UnsupportedFunction(Function),
    /// The value is not in the function's allowed set
    InvalidSetting { function: Function, value: Value },
    /// The function is supported but no value has been set
    NotConfigured(Function),
    /// The table has no room for another stored value
    TableFull,
}

impl Function {
    /// Short identifier used in logs and error messages
    pub const fn name(self) -> &'static str {
        match self {
            Function::CarrierFrequencyHz => "carrier_frequency_hz",
            Function::ModulationScheme => "modulation_scheme",
            Function::TxPowerDbm => "tx_power_dbm",
            Function::Mtu => "mtu",
            Function::PreambleLength => "preamble_length",
            Function::SyncWordsLength => "sync_words_length",
            Function::LineCoding => "line_coding",
            Function::BitRate => "bit_rate",
            Function::FrequencyDeviation => "frequency_deviation",
            Function::ReceiveSensitivityThresholdDbm => "receive_sensitivity_threshold_dbm",
            Function::ChannelActivityThresholdDbm => "channel_activity_threshold_dbm",
        }
    }
}

impl core::fmt::Display for SettingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SettingError::UnsupportedFunction(function) => write!(f, "unsupported radio function {}", function.name()),
            SettingError::InvalidSetting { function, .. } => write!(f, "invalid value for radio function {}", function.name()),
            SettingError::NotConfigured(function) => write!(f, "radio function {} has no value", function.name()),
            SettingError::TableFull => write!(f, "settings table is full"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SettingError {}

/// Configuration interface shared by all radio drivers
pub trait RadioDriver {
    /// Functions supported by this driver and the values each accepts
    fn capabilities(&self) -> &[Capability];

    /// Reads the current value of `function`
    fn get(&self, function: Function) -> Result<Value, SettingError>;

    /// Validates and applies `value`
    fn set(&mut self, function: Function, value: Value) -> Result<(), SettingError>;

    fn capability(&self, function: Function) -> Option<&Capability> {
        self.capabilities().iter().find(|capability| capability.function == function)
    }

    /// Checks `value` against the capability map without applying it
    fn validate(&self, function: Function, value: Value) -> Result<(), SettingError> {
        let capability = self.capability(function).ok_or(SettingError::UnsupportedFunction(function))?;
        if capability.allowed.permits(value) {
            Ok(())
        } else {
            Err(SettingError::InvalidSetting { function, value })
        }
    }
}

/// Capability map plus current values, for drivers to embed
///
/// `N` bounds the number of stored values and must be at least the number of capabilities.
pub struct SettingsTable<const N: usize> {
    capabilities: &'static [Capability],
    values: Vec<(Function, Value), N>,
}

impl<const N: usize> SettingsTable<N> {
    /// Creates a table and applies `defaults`
    ///
    /// Defaults that fail validation are reported as errors, so a driver cannot start with
    /// an inconsistent configuration. A table smaller than the capability map is rejected
    /// with [`SettingError::TableFull`].
    pub fn new(capabilities: &'static [Capability], defaults: &[(Function, Value)]) -> Result<Self, SettingError> {
        if capabilities.len() > N {
            return Err(SettingError::TableFull);
        }
        let mut table = SettingsTable {
            capabilities,
            values: Vec::new(),
        };
        for (function, value) in defaults {
            table.set(*function, *value)?;
        }
        Ok(table)
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        self.capabilities
    }

    pub fn get(&self, function: Function) -> Result<Value, SettingError> {
        if !self.capabilities.iter().any(|capability| capability.function == function) {
            return Err(SettingError::UnsupportedFunction(function));
        }
        self.values
            .iter()
            .find(|(stored, _)| *stored == function)
            .map(|(_, value)| *value)
            .ok_or(SettingError::NotConfigured(function))
    }

    pub fn set(&mut self, function: Function, value: Value) -> Result<(), SettingError> {
        let capability = self
            .capabilities
            .iter()
            .find(|capability| capability.function == function)
            .ok_or(SettingError::UnsupportedFunction(function))?;
        if !capability.allowed.permits(value) {
            return Err(SettingError::InvalidSetting { function, value });
        }

        if let Some(entry) = self.values.iter_mut().find(|(stored, _)| *stored == function) {
            entry.1 = value;
            return Ok(());
        }
        self.values.push((function, value)).map_err(|_| SettingError::TableFull)
    }
}
