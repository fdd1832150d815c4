//! Integration tests for the TCP ingest server
//!
//! These start the daemon on an ephemeral port, push real bytes over a
//! socket, and verify the aggregation state and the flushed output.

use rustystats::{Config, MetricType, RustyStatsDaemon};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.port = 0;
    config.sink.stream_cmd = "cat > /dev/null".to_string();
    // Keep the timer out of the way; tests rotate explicitly.
    config.flush.interval_secs = 3600;
    config
}

async fn start_daemon(config: Config) -> (RustyStatsDaemon, std::net::SocketAddr) {
    let mut daemon = RustyStatsDaemon::new(config).unwrap();
    let addr = daemon.start_with_addr().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    (daemon, addr)
}

/// Poll the current registry until the expected number of metrics shows
/// up; ingestion is asynchronous to the write.
async fn wait_for_metrics(daemon: &RustyStatsDaemon, expected: usize) {
    for _ in 0..100 {
        let len = daemon
            .controller()
            .with_current(|r| r.len())
            .unwrap_or(0);
        if len >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("metrics never arrived (expected {})", expected);
}

#[tokio::test]
async fn test_text_samples_over_tcp() {
    let (mut daemon, addr) = start_daemon(test_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"hits:1|c\nhits:2|c\ntemp:21.5|g\n").await.unwrap();
    stream.flush().await.unwrap();
    stream.shutdown().await.unwrap();

    wait_for_metrics(&daemon, 2).await;
    daemon.controller().with_current(|reg| {
        reg.for_each_mut(|name, acc| match (name, acc) {
            ("hits", rustystats::Accumulator::Counter(m)) => {
                assert_eq!(m.sum(), 3.0);
                assert_eq!(m.count(), 2);
            }
            ("temp", rustystats::Accumulator::Gauge(g)) => {
                assert_eq!(g.value, 21.5);
            }
            (name, _) => panic!("unexpected metric {}", name),
        });
    });

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_binary_samples_over_tcp() {
    let (mut daemon, addr) = start_daemon(test_config()).await;

    let mut frame = vec![0xAAu8, MetricType::Gauge.wire_code()];
    frame.extend_from_slice(&2u16.to_le_bytes());
    frame.extend_from_slice(&42.0f64.to_le_bytes());
    frame.extend_from_slice(b"g\0");

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&frame).await.unwrap();
    stream.flush().await.unwrap();

    wait_for_metrics(&daemon, 1).await;
    daemon.controller().with_current(|reg| {
        reg.for_each_mut(|name, acc| match acc {
            rustystats::Accumulator::Gauge(g) => {
                assert_eq!(name, "g");
                assert_eq!(g.value, 42.0);
            }
            _ => panic!("expected gauge"),
        });
    });

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_split_writes_parse_identically() {
    let (mut daemon, addr) = start_daemon(test_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    // A line delivered one fragment at a time.
    for chunk in [&b"lat"[..], &b"ency:4"[..], &b".5|"[..], &b"m\n"[..]] {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    wait_for_metrics(&daemon, 1).await;
    daemon.controller().with_current(|reg| {
        reg.for_each_mut(|name, acc| match acc {
            rustystats::Accumulator::Timer(t) => {
                assert_eq!(name, "latency");
                assert_eq!(t.moments.sum(), 4.5);
            }
            _ => panic!("expected timer"),
        });
    });

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_malformed_line_closes_connection_but_not_server() {
    let (mut daemon, addr) = start_daemon(test_config()).await;

    let mut bad = TcpStream::connect(addr).await.unwrap();
    bad.write_all(b"good:1|c\nthis is not a metric\n").await.unwrap();
    bad.flush().await.unwrap();

    wait_for_metrics(&daemon, 1).await;

    // The server keeps accepting new clients afterwards.
    let mut good = TcpStream::connect(addr).await.unwrap();
    good.write_all(b"after:1|c\n").await.unwrap();
    good.flush().await.unwrap();

    wait_for_metrics(&daemon, 2).await;
    daemon.controller().with_current(|reg| {
        assert_eq!(reg.len(), 2);
    });

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_input_counter_over_tcp() {
    let mut config = test_config();
    config.metrics.input_counter = Some("statsd.inputs".to_string());
    let (mut daemon, addr) = start_daemon(config).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"a:1|c\nb:2|m\nc:3|g\n").await.unwrap();
    stream.flush().await.unwrap();

    wait_for_metrics(&daemon, 4).await;
    daemon.controller().with_current(|reg| {
        reg.for_each_mut(|name, acc| {
            if name == "statsd.inputs" {
                match acc {
                    rustystats::Accumulator::Counter(m) => assert_eq!(m.count(), 3),
                    _ => panic!("expected counter"),
                }
            }
        });
    });

    daemon.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_flushes_pending_samples() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shutdown.out");
    let mut config = test_config();
    config.sink.stream_cmd = format!("cat >> {}", path.display());
    let (mut daemon, addr) = start_daemon(config).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"final:7|c\n").await.unwrap();
    stream.flush().await.unwrap();

    wait_for_metrics(&daemon, 1).await;
    daemon.shutdown().await;

    let output = std::fs::read_to_string(&path).unwrap();
    assert!(output.contains("final|7.000000|"));
}
