//! RustyStats server binary
//!
//! Loads configuration, initializes logging, starts the daemon, and
//! handles SIGINT/SIGTERM by flushing the final epoch before exit.

use clap::{Arg, ArgAction, Command};
use rustystats::logging::LoggingSystem;
use rustystats::{Config, Result, RustyStatsDaemon};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Command::new("rustystats-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A statsd-compatible metrics aggregation daemon")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to a JSON configuration file"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Listener port (overrides the config file)"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind-address")
                .value_name("ADDR")
                .help("Listener bind address (overrides the config file)"),
        )
        .arg(
            Arg::new("flush-interval")
                .long("flush-interval")
                .value_name("SECS")
                .help("Seconds between flushes (overrides the config file)"),
        )
        .arg(
            Arg::new("stream-cmd")
                .long("stream-cmd")
                .value_name("CMD")
                .help("Shell command receiving flush output on stdin"),
        )
        .arg(
            Arg::new("binary-stream")
                .long("binary-stream")
                .action(ArgAction::SetTrue)
                .help("Emit the packed binary flush format"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("trace, debug, info, warn, or error"),
        )
        .get_matches();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };

    let logging = LoggingSystem::new(config.clone());
    if let Err(e) = logging.initialize() {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(config).await {
        error!("Server failed: {}", e);
        process::exit(1);
    }
}

fn build_config(args: &clap::ArgMatches) -> Result<Config> {
    let mut config = match args.get_one::<String>("config") {
        Some(path) => Config::load_from(&PathBuf::from(path))?,
        None => Config::load()?,
    };

    if let Some(port) = args.get_one::<String>("port") {
        config.server.port = port.parse().map_err(|_| {
            rustystats::RustyStatsError::ConfigError {
                message: format!("Invalid port: {}", port),
                config_key: Some("server.port".to_string()),
            }
        })?;
    }
    if let Some(addr) = args.get_one::<String>("bind") {
        config.server.bind_address = addr.clone();
    }
    if let Some(interval) = args.get_one::<String>("flush-interval") {
        config.flush.interval_secs = interval.parse().map_err(|_| {
            rustystats::RustyStatsError::ConfigError {
                message: format!("Invalid flush interval: {}", interval),
                config_key: Some("flush.interval_secs".to_string()),
            }
        })?;
    }
    if let Some(cmd) = args.get_one::<String>("stream-cmd") {
        config.sink.stream_cmd = cmd.clone();
    }
    if args.get_flag("binary-stream") {
        config.sink.binary_stream = true;
    }
    if let Some(level) = args.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: Config) -> Result<()> {
    info!(
        "Starting RustyStats v{} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.server.bind_address,
        config.server.port
    );

    let mut daemon = RustyStatsDaemon::new(config)?;
    let addr = daemon.start_with_addr().await?;
    info!("Accepting samples on {}", addr);

    wait_for_shutdown_signal().await;

    info!("Shutting down, flushing final epoch");
    daemon.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
    }
}
