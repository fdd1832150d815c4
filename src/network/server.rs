//! TCP listener and per-connection ingest loop
//!
//! Accepts connections, reads bytes straight into each connection's
//! driver buffer, and lets the driver feed the current registry. A
//! protocol error closes the offending connection; the daemon keeps
//! serving everyone else.

use crate::config::Config;
use crate::error::{Result, RustyStatsError};
use crate::flush::FlushController;
use crate::network::{ConnectionDriver, ConnectionPool};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// TCP ingest server
pub struct TcpServer {
    config: Arc<Config>,
    controller: Arc<FlushController>,
    pool: Arc<ConnectionPool>,
    shutdown_tx: broadcast::Sender<()>,
    listening_addr: Option<SocketAddr>,
}

impl TcpServer {
    pub fn new(config: Arc<Config>, controller: Arc<FlushController>) -> Self {
        let pool = Arc::new(ConnectionPool::new(config.server.max_connections));
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            controller,
            pool,
            shutdown_tx,
            listening_addr: None,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// The bound address, once the server has started
    pub fn listening_addr(&self) -> Option<SocketAddr> {
        self.listening_addr
    }

    /// Signal every connection task and the accept loop to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind and serve until shutdown
    pub async fn start(&mut self) -> Result<()> {
        let listener = self.bind().await?;
        self.accept_loop(listener).await
    }

    /// Bind, spawn the accept loop, and return the listening address
    /// (used by tests that need the ephemeral port)
    pub async fn start_with_addr(&mut self) -> Result<SocketAddr> {
        let listener = self.bind().await?;
        let addr = self
            .listening_addr
            .ok_or_else(|| RustyStatsError::InternalError {
                message: "listener bound without an address".to_string(),
                component: Some("network".to_string()),
            })?;

        let config = Arc::clone(&self.config);
        let controller = Arc::clone(&self.controller);
        let pool = Arc::clone(&self.pool);
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = accept_loop(listener, config, controller, pool, shutdown_tx).await {
                error!("accept loop failed: {}", e);
            }
        });
        Ok(addr)
    }

    async fn bind(&mut self) -> Result<TcpListener> {
        let bind_addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        );
        let listener =
            TcpListener::bind(&bind_addr)
                .await
                .map_err(|e| RustyStatsError::NetworkError {
                    message: format!("Failed to bind to {}: {}", bind_addr, e),
                    source: Some(Box::new(e)),
                    connection_id: None,
                })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RustyStatsError::NetworkError {
                message: format!("Failed to get local address: {}", e),
                source: Some(Box::new(e)),
                connection_id: None,
            })?;
        self.listening_addr = Some(local_addr);
        info!("RustyStats listening on {}", local_addr);
        Ok(listener)
    }

    async fn accept_loop(&mut self, listener: TcpListener) -> Result<()> {
        accept_loop(
            listener,
            Arc::clone(&self.config),
            Arc::clone(&self.controller),
            Arc::clone(&self.pool),
            self.shutdown_tx.clone(),
        )
        .await
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<Config>,
    controller: Arc<FlushController>,
    pool: Arc<ConnectionPool>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<()> {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        spawn_connection(
                            stream,
                            addr,
                            Arc::clone(&config),
                            Arc::clone(&controller),
                            Arc::clone(&pool),
                            shutdown_tx.subscribe(),
                        );
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Received shutdown signal, stopping server");
                break;
            }
        }
    }
    Ok(())
}

fn spawn_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: Arc<Config>,
    controller: Arc<FlushController>,
    pool: Arc<ConnectionPool>,
    shutdown_rx: broadcast::Receiver<()>,
) {
    let client_id = Uuid::new_v4();
    if !pool.try_register(client_id, addr) {
        // Clients get no replies on this protocol; a rejected
        // connection is simply closed.
        drop(stream);
        return;
    }

    if config.server.tcp_nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }
    }

    debug!(%client_id, %addr, active = pool.active_connections(), "client connected");
    tokio::spawn(async move {
        let result =
            handle_connection(stream, client_id, &config, &controller, shutdown_rx).await;
        pool.deregister(client_id);
        match result {
            Ok(samples) => {
                debug!(%client_id, %addr, samples, "client disconnected cleanly");
            }
            Err(e) => {
                if e.is_protocol_error() {
                    warn!(%client_id, %addr, "closing connection on protocol error: {}", e);
                } else {
                    warn!(%client_id, %addr, "connection failed: {}", e);
                }
            }
        }
    });
}

async fn handle_connection(
    mut stream: TcpStream,
    client_id: Uuid,
    config: &Config,
    controller: &FlushController,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<u64> {
    let mut driver = ConnectionDriver::new();
    let input_counter = config.metrics.input_counter.as_deref();

    loop {
        tokio::select! {
            result = stream.read_buf(driver.stream_mut().bytes_mut()) => {
                match result {
                    Ok(0) => break, // client closed
                    Ok(_) => {
                        driver.drive(controller, input_counter)?;
                    }
                    Err(e) => {
                        return Err(RustyStatsError::ConnectionError {
                            message: format!("read failed: {}", e),
                            connection_id: Some(client_id.to_string()),
                        });
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(%client_id, "shutdown signal received, closing connection");
                break;
            }
        }
    }
    Ok(driver.samples_accepted())
}
