//! RustyStats - A statsd-compatible metrics aggregation daemon
//!
//! Clients push metric samples over TCP in the statsd text protocol or a
//! packed binary protocol. Samples fold into per-metric accumulators
//! (counter moments, timer quantile sketches and histograms, gauges,
//! HyperLogLog sets, key/value lists). On every flush interval the
//! metrics table is atomically rotated and the retired epoch is
//! serialized to a child process's standard input.

// Core modules
pub mod config;
pub mod error;
pub mod logging;

// Feature modules
pub mod flush;
pub mod metrics;
pub mod network;
pub mod sink;

// Public API exports
pub use config::Config;
pub use error::{Result, RustyStatsError};

// Re-export commonly used types
pub use flush::FlushController;
pub use metrics::{Accumulator, MetricType, MetricsRegistry};
pub use network::TcpServer;
pub use sink::FlushRecord;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Daemon handle carrying the configuration, the flush controller, and
/// the TCP server. The controller's registry swap is the only shared
/// mutable state between ingress and flushing.
pub struct RustyStatsDaemon {
    config: Arc<Config>,
    controller: Arc<FlushController>,
    tcp_server: Option<TcpServer>,
    flush_timer: Option<JoinHandle<()>>,
}

impl RustyStatsDaemon {
    /// Create a daemon from a validated configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let controller = Arc::new(FlushController::new(Arc::clone(&config)));
        let tcp_server = TcpServer::new(Arc::clone(&config), Arc::clone(&controller));

        Ok(Self {
            config,
            controller,
            tcp_server: Some(tcp_server),
            flush_timer: None,
        })
    }

    /// Start the flush timer and serve connections until shutdown
    pub async fn start(&mut self) -> Result<()> {
        let mut tcp_server = self.take_server()?;
        self.spawn_flush_timer();
        tcp_server.start().await
    }

    /// Start in the background and return the listening address
    /// (useful for testing against an ephemeral port)
    pub async fn start_with_addr(&mut self) -> Result<SocketAddr> {
        let mut tcp_server = self.take_server()?;
        self.spawn_flush_timer();
        let addr = tcp_server.start_with_addr().await?;
        self.tcp_server = Some(tcp_server);
        Ok(addr)
    }

    /// Stop accepting samples, flush the last epoch, and wait for every
    /// flush worker to drain
    pub async fn shutdown(&mut self) {
        if let Some(timer) = self.flush_timer.take() {
            timer.abort();
        }
        if let Some(server) = &self.tcp_server {
            server.shutdown();
        }
        self.controller.final_flush().await;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &Arc<FlushController> {
        &self.controller
    }

    fn take_server(&mut self) -> Result<TcpServer> {
        self.tcp_server
            .take()
            .ok_or_else(|| RustyStatsError::InternalError {
                message: "Server already started or not properly initialized".to_string(),
                component: Some("daemon".to_string()),
            })
    }

    fn spawn_flush_timer(&mut self) {
        let controller = Arc::clone(&self.controller);
        let period = Duration::from_secs(self.config.flush.interval_secs);
        self.flush_timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // the first tick fires immediately
            loop {
                interval.tick().await;
                if !controller.rotate() {
                    break;
                }
            }
        }));
    }
}
