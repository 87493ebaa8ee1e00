//! # Telemetry Module
//!
//! Counters and gauges describing the health of the radio link.
//!
//! ## Architecture
//!
//! - **TelemetrySink**: what the transceiver reports into; one method per event
//! - **TelemetryAccumulator**: keeps one [`TelemetryEvent`] per [`Metric`] and hands them
//!   out as a report on request
//!
//! Formatting and transport of reports is left to the application. The accumulator is
//! only mutated by the transceiver's tick loop.

use embassy_time::Instant;

use crate::clock::Clock;

/// RSSI reported before the first measurement, in dBm
pub const DEFAULT_RSSI_DBM: f32 = -127.0;

/// Identifies a telemetry value
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
#[repr(u8)]
pub enum Metric {
    /// Time the report was generated
    Time = 0,
    FragmentsRx = 1,
    FragmentsTx = 2,
    DroppedFragments = 3,
    TxErrors = 4,
    /// Packets waiting in the transmit queue
    TxQueueSize = 5,
    /// Most recent ambient RSSI sample
    RssiDbm = 6,
    PowerW = 7,
}

const METRIC_COUNT: usize = 8;
const ALL_METRICS: [Metric; METRIC_COUNT] = [
    Metric::Time,
    Metric::FragmentsRx,
    Metric::FragmentsTx,
    Metric::DroppedFragments,
    Metric::TxErrors,
    Metric::TxQueueSize,
    Metric::RssiDbm,
    Metric::PowerW,
];

/// Value of one metric
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum Measurement {
    Count(u32),
    Millis(u64),
    Dbm(f32),
    Watts(f32),
}

/// One metric value with its source and timestamp
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct TelemetryEvent {
    pub device_id: u32,
    /// When the value last changed
    pub time: Instant,
    pub metric: Metric,
    pub measurement: Measurement,
}

/// Receiver of link telemetry
pub trait TelemetrySink {
    fn increment_fragments_received(&mut self);
    fn increment_fragments_transmitted(&mut self);
    fn increment_fragments_dropped(&mut self);
    fn increment_transmit_errors(&mut self);
    fn set_rssi_dbm(&mut self, rssi_dbm: f32);
    fn set_transmit_queue_size(&mut self, size: u32);
    /// Power currently consumed by the radio, in Watts
    fn set_power_usage_w(&mut self, power_w: f32);

    /// Counts `count` dropped fragments at once
    fn add_fragments_dropped(&mut self, count: usize) {
        for _ in 0..count {
            self.increment_fragments_dropped();
        }
    }
}

/// In-memory telemetry store producing reports on request
pub struct TelemetryAccumulator<C: Clock> {
    clock: C,
    report: [TelemetryEvent; METRIC_COUNT],
}

impl<C: Clock> TelemetryAccumulator<C> {
    /// Creates an accumulator with all counters at zero
    ///
    /// # Arguments
    /// * `device_id` - Identifies the reporting device in every event
    /// * `clock` - Used to timestamp updates
    pub fn new(device_id: u32, clock: C) -> Self {
        let now = clock.now();
        let report = ALL_METRICS.map(|metric| TelemetryEvent {
            device_id,
            time: now,
            metric,
            measurement: match metric {
                Metric::Time => Measurement::Millis(now.as_millis()),
                Metric::RssiDbm => Measurement::Dbm(DEFAULT_RSSI_DBM),
                Metric::PowerW => Measurement::Watts(0.0),
                _ => Measurement::Count(0),
            },
        });
        TelemetryAccumulator { clock, report }
    }

    /// Looks up the current value of `metric`
    pub fn find_event(&self, metric: Metric) -> &TelemetryEvent {
        &self.report[metric as usize]
    }

    /// Current count of a counter or gauge metric
    ///
    /// # Returns
    /// `None` for metrics that are not counts (time, RSSI, power)
    pub fn count(&self, metric: Metric) -> Option<u32> {
        match self.find_event(metric).measurement {
            Measurement::Count(count) => Some(count),
            _ => None,
        }
    }

    pub fn rssi_dbm(&self) -> f32 {
        match self.find_event(Metric::RssiDbm).measurement {
            Measurement::Dbm(rssi) => rssi,
            _ => DEFAULT_RSSI_DBM,
        }
    }

    /// Refreshes the report timestamp and returns all events
    pub fn generate_telemetry_report(&mut self) -> &[TelemetryEvent] {
        let now = self.clock.now();
        let event = &mut self.report[Metric::Time as usize];
        event.time = now;
        event.measurement = Measurement::Millis(now.as_millis());
        &self.report
    }

    fn increment(&mut self, metric: Metric) {
        let now = self.clock.now();
        let event = &mut self.report[metric as usize];
        if let Measurement::Count(count) = event.measurement {
            event.measurement = Measurement::Count(count.saturating_add(1));
        }
        event.time = now;
    }

    fn set(&mut self, metric: Metric, measurement: Measurement) {
        let now = self.clock.now();
        let event = &mut self.report[metric as usize];
        event.measurement = measurement;
        event.time = now;
    }
}

impl<C: Clock> TelemetrySink for TelemetryAccumulator<C> {
    fn increment_fragments_received(&mut self) {
        self.increment(Metric::FragmentsRx);
    }

    fn increment_fragments_transmitted(&mut self) {
        self.increment(Metric::FragmentsTx);
    }

    fn increment_fragments_dropped(&mut self) {
        self.increment(Metric::DroppedFragments);
    }

    fn increment_transmit_errors(&mut self) {
        self.increment(Metric::TxErrors);
    }

    fn set_rssi_dbm(&mut self, rssi_dbm: f32) {
        self.set(Metric::RssiDbm, Measurement::Dbm(rssi_dbm));
    }

    fn set_transmit_queue_size(&mut self, size: u32) {
        self.set(Metric::TxQueueSize, Measurement::Count(size));
    }

    fn set_power_usage_w(&mut self, power_w: f32) {
        self.set(Metric::PowerW, Measurement::Watts(power_w));
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use embassy_time::Duration;

    #[test]
    fn starts_with_defaults() {
        let clock = MockClock::new();
        let telemetry = TelemetryAccumulator::new(17, clock);
        assert_eq!(telemetry.count(Metric::FragmentsRx), Some(0));
        assert_eq!(telemetry.count(Metric::TxQueueSize), Some(0));
        assert_eq!(telemetry.rssi_dbm(), DEFAULT_RSSI_DBM);
        assert_eq!(telemetry.find_event(Metric::PowerW).measurement, Measurement::Watts(0.0));
        assert_eq!(telemetry.count(Metric::Time), None);
        assert_eq!(telemetry.find_event(Metric::TxErrors).device_id, 17);
    }

    #[test]
    fn counters_accumulate_and_are_stamped() {
        let clock = MockClock::new();
        let mut telemetry = TelemetryAccumulator::new(1, clock.clone());

        clock.advance(Duration::from_millis(5));
        telemetry.increment_fragments_received();
        telemetry.increment_fragments_received();
        telemetry.add_fragments_dropped(3);
        telemetry.increment_transmit_errors();
        telemetry.increment_fragments_transmitted();

        assert_eq!(telemetry.count(Metric::FragmentsRx), Some(2));
        assert_eq!(telemetry.count(Metric::DroppedFragments), Some(3));
        assert_eq!(telemetry.count(Metric::TxErrors), Some(1));
        assert_eq!(telemetry.count(Metric::FragmentsTx), Some(1));
        assert_eq!(telemetry.find_event(Metric::FragmentsRx).time, Instant::from_millis(5));
        assert_eq!(telemetry.find_event(Metric::FragmentsTx).time, Instant::from_millis(5));
    }

    #[test]
    fn gauges_replace_their_value() {
        let clock = MockClock::new();
        let mut telemetry = TelemetryAccumulator::new(1, clock);
        telemetry.set_transmit_queue_size(4);
        telemetry.set_transmit_queue_size(2);
        telemetry.set_rssi_dbm(-88.5);
        telemetry.set_power_usage_w(0.25);
        assert_eq!(telemetry.count(Metric::TxQueueSize), Some(2));
        assert_eq!(telemetry.rssi_dbm(), -88.5);
        assert_eq!(telemetry.find_event(Metric::PowerW).measurement, Measurement::Watts(0.25));
    }

    #[test]
    fn report_carries_every_metric() {
        let clock = MockClock::new();
        let mut telemetry = TelemetryAccumulator::new(1, clock.clone());
        clock.set_micros(42_000);
        let report = telemetry.generate_telemetry_report();
        assert_eq!(report.len(), METRIC_COUNT);
        for (event, metric) in report.iter().zip(ALL_METRICS) {
            assert_eq!(event.metric, metric);
        }
        assert_eq!(report[0].measurement, Measurement::Millis(42));
    }
}
