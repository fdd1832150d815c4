//! Per-metric accumulators
//!
//! Each metric name folds its samples into one of these. Counters and
//! timers share the moment tracking used to derive mean and standard
//! deviation; timers additionally feed a quantile sketch and, when a
//! histogram rule matches the name, a fixed-grid histogram.

use crate::metrics::{HistogramBins, HyperLogLog, MetricType, QuantileSketch};

/// Running moments over a stream of values
#[derive(Debug, Clone, Default)]
pub struct Moments {
    sum: f64,
    sum_sq: f64,
    count: u64,
    min: f64,
    max: f64,
}

impl Moments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            if value < self.min {
                self.min = value;
            }
            if value > self.max {
                self.max = value;
            }
        }
        self.sum += value;
        self.sum_sq += value * value;
        self.count += 1;
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn sum_sq(&self) -> f64 {
        self.sum_sq
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Sample standard deviation; 0 with fewer than two values
    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let variance = (self.sum_sq - (self.sum * self.sum) / n) / (n - 1.0);
        variance.max(0.0).sqrt()
    }
}

/// Timer state: moments plus the quantile sketch and optional histogram
#[derive(Debug, Clone)]
pub struct TimerAcc {
    pub moments: Moments,
    pub sketch: QuantileSketch,
    pub histogram: Option<HistogramBins>,
}

impl TimerAcc {
    pub fn new(epsilon: f64, histogram: Option<HistogramBins>) -> Self {
        Self {
            moments: Moments::new(),
            sketch: QuantileSketch::new(epsilon),
            histogram,
        }
    }

    pub fn record(&mut self, value: f64) {
        self.moments.add(value);
        self.sketch.insert(value);
        if let Some(bins) = &mut self.histogram {
            bins.record(value);
        }
    }
}

/// Gauge state: the latest absolute value with deltas applied
#[derive(Debug, Clone, Default)]
pub struct GaugeAcc {
    pub value: f64,
}

impl GaugeAcc {
    /// `Gauge` replaces the value, `GaugeDelta` adds to it
    pub fn apply(&mut self, metric_type: MetricType, value: f64) {
        match metric_type {
            MetricType::GaugeDelta => self.value += value,
            _ => self.value = value,
        }
    }
}

/// Set state: probabilistic distinct-member count
#[derive(Debug, Clone)]
pub struct SetAcc {
    pub hll: HyperLogLog,
}

impl SetAcc {
    pub fn new(precision: u8) -> Self {
        Self {
            hll: HyperLogLog::new(precision),
        }
    }

    pub fn insert(&mut self, member: &str) {
        self.hll.insert(member.as_bytes());
    }

    pub fn cardinality(&self) -> u64 {
        self.hll.cardinality().round() as u64
    }
}

/// Key/value state: every observed value, in arrival order
#[derive(Debug, Clone, Default)]
pub struct KeyValAcc {
    pub values: Vec<f64>,
}

/// Tagged accumulator; the variant is fixed at first insertion
#[derive(Debug, Clone)]
pub enum Accumulator {
    Counter(Moments),
    Timer(TimerAcc),
    Gauge(GaugeAcc),
    Set(SetAcc),
    KeyVal(KeyValAcc),
}

impl Accumulator {
    /// The type this accumulator reports as; gauge deltas fold into `Gauge`
    pub fn metric_type(&self) -> MetricType {
        match self {
            Accumulator::Counter(_) => MetricType::Counter,
            Accumulator::Timer(_) => MetricType::Timer,
            Accumulator::Gauge(_) => MetricType::Gauge,
            Accumulator::Set(_) => MetricType::Set,
            Accumulator::KeyVal(_) => MetricType::KeyVal,
        }
    }

    /// Whether a sample of `metric_type` may fold into this accumulator
    pub fn accepts(&self, metric_type: MetricType) -> bool {
        match self {
            Accumulator::Gauge(_) => {
                matches!(metric_type, MetricType::Gauge | MetricType::GaugeDelta)
            }
            other => other.metric_type() == metric_type,
        }
    }
}
