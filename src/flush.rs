//! Double-buffered flush control
//!
//! The controller owns the pointer to the current epoch's registry.
//! Ingress holds the read lock for the duration of one sample, so the
//! write-locked swap in `rotate` is a single point in time: every sample
//! commits to exactly one epoch, and by the time the retired registry
//! reaches the flush worker no ingress handle can still touch it.
//! Workers are detached from ingress but their handles are retained so
//! `final_flush` can drain them on shutdown.

use crate::config::Config;
use crate::metrics::{HistogramResolver, MetricType, MetricsRegistry, SampleSink};
use crate::sink::stream_to_command;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Wall-clock seconds since the Unix epoch
pub fn epoch_seconds() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Owns the current registry and runs the rotation protocol
#[derive(Debug)]
pub struct FlushController {
    config: Arc<Config>,
    /// Built once; each epoch gets a clone instead of re-sorting the
    /// configured rules on the rotation path
    resolver: HistogramResolver,
    current: RwLock<Option<MetricsRegistry>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl FlushController {
    pub fn new(config: Arc<Config>) -> Self {
        let resolver = HistogramResolver::new(&config.metrics.histograms);
        let registry =
            MetricsRegistry::with_resolver(&config.metrics, resolver.clone(), epoch_seconds());
        Self {
            config,
            resolver,
            current: RwLock::new(Some(registry)),
            workers: Mutex::new(Vec::new()),
        }
    }

    fn fresh_registry(&self) -> MetricsRegistry {
        MetricsRegistry::with_resolver(&self.config.metrics, self.resolver.clone(), epoch_seconds())
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Fold one numeric sample into the current epoch. A no-op after
    /// `final_flush`.
    pub fn add_sample(&self, metric_type: MetricType, name: &str, value: f64) {
        let guard = self.current.read().unwrap();
        if let Some(registry) = guard.as_ref() {
            registry.add_sample(metric_type, name, value);
        }
    }

    /// Fold one set member into the current epoch. A no-op after
    /// `final_flush`.
    pub fn set_update(&self, name: &str, member: &str) {
        let guard = self.current.read().unwrap();
        if let Some(registry) = guard.as_ref() {
            registry.set_update(name, member);
        }
    }

    /// Inspect the current registry (primarily for tests and stats)
    pub fn with_current<R>(&self, inspect: impl FnOnce(&MetricsRegistry) -> R) -> Option<R> {
        let guard = self.current.read().unwrap();
        guard.as_ref().map(inspect)
    }

    /// Swap in a fresh registry and hand the retired one to a background
    /// flush worker. Returns false once the controller has been shut
    /// down by `final_flush`.
    pub fn rotate(&self) -> bool {
        let fresh = self.fresh_registry();
        let retired = {
            let mut current = self.current.write().unwrap();
            match current.take() {
                Some(old) => {
                    *current = Some(fresh);
                    old
                }
                None => return false,
            }
        };
        self.spawn_flush(retired);
        true
    }

    /// One last rotation: the current registry is flushed, the slot is
    /// left empty so later samples are dropped, and every outstanding
    /// flush worker is awaited.
    pub async fn final_flush(&self) {
        let retired = self.current.write().unwrap().take();
        if let Some(registry) = retired {
            self.spawn_flush(registry);
        }
        self.drain_workers().await;
        info!("final flush complete");
    }

    /// Await every flush worker spawned so far
    pub async fn drain_workers(&self) {
        let handles: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn spawn_flush(&self, registry: MetricsRegistry) {
        let timestamp = epoch_seconds();
        let config = Arc::clone(&self.config);
        let handle = tokio::spawn(async move {
            let metrics = registry.len();
            let entries = registry.into_entries();
            if let Err(e) = stream_to_command(entries, timestamp, &config.sink).await {
                e.log();
            } else {
                debug!(metrics, timestamp, "flush worker finished");
            }
        });
        self.workers.lock().unwrap().push(handle);
    }
}

impl SampleSink for FlushController {
    fn add_sample(&self, metric_type: MetricType, name: &str, value: f64) {
        FlushController::add_sample(self, metric_type, name, value);
    }

    fn set_update(&self, name: &str, member: &str) {
        FlushController::set_update(self, name, member);
    }
}
