//! Child-process flush sink
//!
//! Each flush spawns the configured shell command and streams the
//! serialized registry to its standard input. A failed write aborts the
//! flush; the child's exit status is logged either way.

use crate::config::SinkConfig;
use crate::error::{Result, RustyStatsError};
use crate::metrics::Accumulator;
use crate::sink::{binary, text};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Serialize `entries` into a fresh instance of `stream_cmd`
pub async fn stream_to_command(
    mut entries: Vec<(String, Accumulator)>,
    timestamp: u64,
    config: &SinkConfig,
) -> Result<()> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&config.stream_cmd)
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|e| RustyStatsError::SinkError {
            message: format!("failed to spawn stream command '{}'", config.stream_cmd),
            source: Some(e),
        })?;

    let mut stdin = child.stdin.take().ok_or_else(|| RustyStatsError::SinkError {
        message: "stream command has no stdin".to_string(),
        source: None,
    })?;

    let write_result = if config.binary_stream {
        binary::write_all(&mut stdin, &mut entries, timestamp).await
    } else {
        text::write_all(&mut stdin, &mut entries, timestamp).await
    };
    if let Err(e) = &write_result {
        warn!("flush aborted, write to stream command failed: {}", e);
    }
    // Close the pipe so the child sees EOF.
    let _ = stdin.shutdown().await;
    drop(stdin);

    match child.wait().await {
        Ok(status) if status.success() => {
            debug!(metrics = entries.len(), timestamp, "flush streamed");
        }
        Ok(status) => {
            warn!("stream command exited with status {}", status);
        }
        Err(e) => {
            warn!("failed to await stream command: {}", e);
        }
    }

    write_result.map_err(RustyStatsError::from)
}
