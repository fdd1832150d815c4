//! Metric types, accumulators, and the per-epoch registry
//!
//! This module holds everything between the wire parsers and the flush
//! serializer: the closed set of metric types, the per-type accumulators
//! (moment tracking, quantile sketch, HyperLogLog, fixed-grid histogram),
//! and the name → accumulator table that ingress mutates.

pub mod accumulator;
pub mod histogram;
pub mod hll;
pub mod registry;
pub mod sketch;

pub use accumulator::{Accumulator, GaugeAcc, KeyValAcc, Moments, SetAcc, TimerAcc};
pub use histogram::{HistogramBins, HistogramResolver, HistogramRule};
pub use hll::HyperLogLog;
pub use registry::MetricsRegistry;
pub use sketch::QuantileSketch;

/// The quantiles reported for every timer
pub const QUANTILES: [f64; 4] = [0.5, 0.9, 0.95, 0.99];

/// The closed set of metric types accepted on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Counter,
    Timer,
    Gauge,
    GaugeDelta,
    Set,
    KeyVal,
}

impl MetricType {
    /// Wire code shared by the binary ingress protocol and the binary
    /// flush format
    pub fn wire_code(self) -> u8 {
        match self {
            MetricType::KeyVal => 0x1,
            MetricType::Counter => 0x2,
            MetricType::Timer => 0x3,
            MetricType::Set => 0x4,
            MetricType::Gauge => 0x5,
            MetricType::GaugeDelta => 0x6,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0x1 => Some(MetricType::KeyVal),
            0x2 => Some(MetricType::Counter),
            0x3 => Some(MetricType::Timer),
            0x4 => Some(MetricType::Set),
            0x5 => Some(MetricType::Gauge),
            0x6 => Some(MetricType::GaugeDelta),
            _ => None,
        }
    }
}

/// One parsed sample, borrowing the wire buffer it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<'a> {
    pub metric_type: MetricType,
    pub name: &'a str,
    pub value: SampleValue<'a>,
}

/// Sample payload: a measurement for numeric types, a member for sets
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue<'a> {
    Measure(f64),
    Member(&'a str),
}

/// Destination for accepted samples. Implemented by the registry itself
/// and by the flush controller, which routes to the current epoch's
/// registry.
pub trait SampleSink {
    fn add_sample(&self, metric_type: MetricType, name: &str, value: f64);
    fn set_update(&self, name: &str, member: &str);
}
