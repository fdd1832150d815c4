//! Text flush format
//!
//! One `name|value|timestamp` line per derived statistic, mirroring the
//! format statsd sinks expect. Floats carry six decimal places; counts
//! and set cardinalities are integers. Timer statistics are emitted
//! under `timers.<name>.<stat>` and histogram buckets under
//! `<name>.histogram.bin_*`.

use crate::metrics::{Accumulator, QUANTILES};
use std::fmt::Write as _;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Serialize every metric in `entries` to the sink
pub async fn write_all<W: AsyncWrite + Unpin>(
    out: &mut W,
    entries: &mut [(String, Accumulator)],
    timestamp: u64,
) -> io::Result<()> {
    let mut buf = String::new();
    for (name, accumulator) in entries.iter_mut() {
        buf.clear();
        format_metric(&mut buf, name, accumulator, timestamp);
        out.write_all(buf.as_bytes()).await?;
    }
    out.flush().await
}

/// Append the record lines for one metric
fn format_metric(buf: &mut String, name: &str, accumulator: &mut Accumulator, ts: u64) {
    match accumulator {
        Accumulator::KeyVal(kv) => {
            for value in &kv.values {
                let _ = writeln!(buf, "{}|{:.6}|{}", name, value, ts);
            }
        }
        Accumulator::Gauge(gauge) => {
            let _ = writeln!(buf, "{}|{:.6}|{}", name, gauge.value, ts);
        }
        Accumulator::Counter(moments) => {
            let _ = writeln!(buf, "{}|{:.6}|{}", name, moments.sum(), ts);
        }
        Accumulator::Set(set) => {
            let _ = writeln!(buf, "{}|{}|{}", name, set.cardinality(), ts);
        }
        Accumulator::Timer(timer) => {
            let m = &timer.moments;
            let _ = writeln!(buf, "timers.{}.sum|{:.6}|{}", name, m.sum(), ts);
            let _ = writeln!(buf, "timers.{}.sum_sq|{:.6}|{}", name, m.sum_sq(), ts);
            let _ = writeln!(buf, "timers.{}.mean|{:.6}|{}", name, m.mean(), ts);
            let _ = writeln!(buf, "timers.{}.lower|{:.6}|{}", name, m.min(), ts);
            let _ = writeln!(buf, "timers.{}.upper|{:.6}|{}", name, m.max(), ts);
            let _ = writeln!(buf, "timers.{}.count|{}|{}", name, m.count(), ts);
            let _ = writeln!(buf, "timers.{}.stdev|{:.6}|{}", name, m.stddev(), ts);
            let labels = ["median", "upper_90", "upper_95", "upper_99"];
            for (label, q) in labels.iter().zip(QUANTILES) {
                let _ = writeln!(
                    buf,
                    "timers.{}.{}|{:.6}|{}",
                    name,
                    label,
                    timer.sketch.query(q),
                    ts
                );
            }

            if let Some(bins) = &timer.histogram {
                let _ = writeln!(
                    buf,
                    "{}.histogram.bin_<{:.2}|{}|{}",
                    name,
                    bins.min_val(),
                    bins.floor_count(),
                    ts
                );
                for (edge, count) in bins.linear_bins() {
                    let _ = writeln!(buf, "{}.histogram.bin_{:.2}|{}|{}", name, edge, count, ts);
                }
                let _ = writeln!(
                    buf,
                    "{}.histogram.bin_>{:.2}|{}|{}",
                    name,
                    bins.max_val(),
                    bins.ceil_count(),
                    ts
                );
            }
        }
    }
}
