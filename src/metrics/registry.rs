//! The per-epoch metrics table
//!
//! A registry maps metric names to typed accumulators. Ingress threads
//! mutate it concurrently through `&self` (the map shards its locks);
//! after rotation the flush worker owns it exclusively and drains it.

use crate::config::MetricsConfig;
use crate::metrics::{
    Accumulator, GaugeAcc, HistogramBins, HistogramResolver, KeyValAcc, MetricType, Moments,
    SampleSink, SetAcc, TimerAcc,
};
use dashmap::DashMap;
use tracing::debug;

/// Name → accumulator table for one epoch
#[derive(Debug)]
pub struct MetricsRegistry {
    entries: DashMap<String, Accumulator>,
    created_at: u64,
    timer_eps: f64,
    set_precision: u8,
    histograms: HistogramResolver,
}

impl MetricsRegistry {
    /// Create an empty registry stamped with the start of its epoch
    pub fn new(config: &MetricsConfig, created_at: u64) -> Self {
        Self::with_resolver(config, HistogramResolver::new(&config.histograms), created_at)
    }

    /// Like `new`, but reuses an already-built histogram resolver. The
    /// flush controller builds the resolver once per process and hands a
    /// clone to each epoch rather than re-sorting the rule set on every
    /// rotation.
    pub fn with_resolver(
        config: &MetricsConfig,
        histograms: HistogramResolver,
        created_at: u64,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            created_at,
            timer_eps: config.timer_eps,
            set_precision: config.set_precision,
            histograms,
        }
    }

    /// Unix seconds at which this epoch began
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold one numeric sample into the named accumulator, creating it on
    /// first sight. A name already bound to a different type ignores the
    /// sample.
    pub fn add_sample(&self, metric_type: MetricType, name: &str, value: f64) {
        if metric_type == MetricType::Set {
            debug!(name, "set samples must go through set_update, ignoring");
            return;
        }
        match self.entries.get_mut(name) {
            Some(mut entry) => Self::apply(entry.value_mut(), metric_type, name, value),
            None => {
                let mut entry = self
                    .entries
                    .entry(name.to_string())
                    .or_insert_with(|| self.fresh_accumulator(metric_type, name));
                Self::apply(entry.value_mut(), metric_type, name, value);
            }
        }
    }

    /// Fold one member into the named set accumulator
    pub fn set_update(&self, name: &str, member: &str) {
        match self.entries.get_mut(name) {
            Some(mut entry) => match entry.value_mut() {
                Accumulator::Set(set) => set.insert(member),
                other => {
                    debug!(
                        name,
                        existing = ?other.metric_type(),
                        "metric name re-used with conflicting type, ignoring sample"
                    );
                }
            },
            None => {
                let mut entry = self
                    .entries
                    .entry(name.to_string())
                    .or_insert_with(|| Accumulator::Set(SetAcc::new(self.set_precision)));
                if let Accumulator::Set(set) = entry.value_mut() {
                    set.insert(member);
                }
            }
        }
    }

    /// Visit every accumulator mutably. Quantile queries need mutable
    /// access, so this is the serializer-facing iteration as well.
    pub fn for_each_mut<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &mut Accumulator),
    {
        for mut entry in self.entries.iter_mut() {
            let (name, accumulator) = entry.pair_mut();
            visit(name, accumulator);
        }
    }

    /// Drain the table for serialization; order is unspecified
    pub fn into_entries(self) -> Vec<(String, Accumulator)> {
        self.entries.into_iter().collect()
    }

    fn fresh_accumulator(&self, metric_type: MetricType, name: &str) -> Accumulator {
        match metric_type {
            MetricType::Counter => Accumulator::Counter(Moments::new()),
            MetricType::Timer => {
                let histogram = self
                    .histograms
                    .resolve(name)
                    .map(HistogramBins::new);
                Accumulator::Timer(TimerAcc::new(self.timer_eps, histogram))
            }
            MetricType::Gauge | MetricType::GaugeDelta => Accumulator::Gauge(GaugeAcc::default()),
            MetricType::KeyVal => Accumulator::KeyVal(KeyValAcc::default()),
            MetricType::Set => Accumulator::Set(SetAcc::new(self.set_precision)),
        }
    }

    fn apply(accumulator: &mut Accumulator, metric_type: MetricType, name: &str, value: f64) {
        if !accumulator.accepts(metric_type) {
            debug!(
                name,
                existing = ?accumulator.metric_type(),
                incoming = ?metric_type,
                "metric name re-used with conflicting type, ignoring sample"
            );
            return;
        }
        match accumulator {
            Accumulator::Counter(moments) => moments.add(value),
            Accumulator::Timer(timer) => timer.record(value),
            Accumulator::Gauge(gauge) => gauge.apply(metric_type, value),
            Accumulator::KeyVal(kv) => kv.values.push(value),
            Accumulator::Set(_) => {}
        }
    }
}

impl SampleSink for MetricsRegistry {
    fn add_sample(&self, metric_type: MetricType, name: &str, value: f64) {
        MetricsRegistry::add_sample(self, metric_type, name, value);
    }

    fn set_update(&self, name: &str, member: &str) {
        MetricsRegistry::set_update(self, name, member);
    }
}
