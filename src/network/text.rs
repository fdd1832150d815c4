//! Text (statsd-compatible) wire protocol
//!
//! One record per `\n`-terminated line:
//!
//! ```text
//! name ":" value "|" type [ "@" sample_rate ]
//! ```
//!
//! Type letters: `c` counter, `m` timer, `k` key/value, `g` gauge,
//! `s` set. A gauge value starting with `+` or `-` is a delta; the `+`
//! is consumed, the `-` kept for the sign. The sample-rate marker is
//! scanned from the byte after the type letter, so `c@0.5` and `c|@0.5`
//! both parse.

use crate::error::{Result, RustyStatsError};
use crate::metrics::{MetricType, Sample, SampleSink, SampleValue};
use crate::network::stream::StreamBuffer;
use tracing::warn;

/// Pull every complete line out of the stream and feed it to the sink.
/// Returns the number of accepted samples; a malformed line is an error
/// (the driver closes the connection).
pub fn drive<S: SampleSink>(
    stream: &mut StreamBuffer,
    sink: &S,
    input_counter: Option<&str>,
) -> Result<u64> {
    let mut accepted = 0u64;
    while let Some(line) = stream.extract_line(b'\n') {
        let sample = match parse_line(&line) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(
                    input = %String::from_utf8_lossy(&line),
                    "failed to parse metric line: {}",
                    e
                );
                return Err(e);
            }
        };
        if let Some(counter) = input_counter {
            sink.add_sample(MetricType::Counter, counter, 1.0);
        }
        match sample.value {
            SampleValue::Measure(value) => sink.add_sample(sample.metric_type, sample.name, value),
            SampleValue::Member(member) => sink.set_update(sample.name, member),
        }
        accepted += 1;
    }
    Ok(accepted)
}

/// Parse one line (without its terminator) into a sample
pub fn parse_line(line: &[u8]) -> Result<Sample<'_>> {
    let colon = find(line, b':').ok_or_else(|| parse_error("missing ':' separator", line))?;
    let (name_bytes, rest) = (&line[..colon], &line[colon + 1..]);

    if name_bytes.is_empty() {
        return Err(parse_error("empty metric name", line));
    }
    if name_bytes.contains(&0) {
        return Err(parse_error("metric name contains NUL", line));
    }
    let name = std::str::from_utf8(name_bytes)?;

    let pipe = find(rest, b'|').ok_or_else(|| parse_error("missing '|' separator", line))?;
    let (mut value_bytes, after) = (&rest[..pipe], &rest[pipe + 1..]);

    let &type_byte = after.first().ok_or_else(|| parse_error("missing type", line))?;
    let mut metric_type = match type_byte {
        b'c' => MetricType::Counter,
        b'm' => MetricType::Timer,
        b'k' => MetricType::KeyVal,
        b'g' => MetricType::Gauge,
        b's' => MetricType::Set,
        _ => return Err(parse_error("unknown metric type", line)),
    };

    // Sets carry opaque members, never numbers.
    if metric_type == MetricType::Set {
        let member = std::str::from_utf8(value_bytes)?;
        return Ok(Sample {
            metric_type,
            name,
            value: SampleValue::Member(member),
        });
    }

    if metric_type == MetricType::Gauge {
        match value_bytes.first() {
            Some(b'+') => {
                value_bytes = &value_bytes[1..];
                metric_type = MetricType::GaugeDelta;
            }
            Some(b'-') => {
                metric_type = MetricType::GaugeDelta;
            }
            _ => {}
        }
    }

    let mut value =
        parse_decimal(value_bytes).ok_or_else(|| parse_error("invalid numeric value", line))?;

    // Client-side sampling applies to counters only.
    if metric_type == MetricType::Counter {
        if let Some(at) = find(&after[1..], b'@') {
            let rate_bytes = &after[1 + at + 1..];
            let rate = parse_decimal(rate_bytes)
                .ok_or_else(|| parse_error("invalid sample rate", line))?;
            if rate > 0.0 && rate <= 1.0 {
                value *= 1.0 / rate;
            }
        }
    }

    Ok(Sample {
        metric_type,
        name,
        value: SampleValue::Measure(value),
    })
}

/// Permissive decimal grammar: optional leading `-`, digits, optional
/// `.` and more digits. No exponents; trailing bytes are ignored.
/// `None` when no digit is consumed.
fn parse_decimal(bytes: &[u8]) -> Option<f64> {
    let mut i = 0;
    let negative = bytes.first() == Some(&b'-');
    if negative {
        i = 1;
    }

    let mut value = 0.0f64;
    let mut digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        value = value * 10.0 + f64::from(bytes[i] - b'0');
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let mut fraction = 0.0f64;
        let mut scale = 1.0f64;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            fraction = fraction * 10.0 + f64::from(bytes[i] - b'0');
            scale *= 10.0;
            i += 1;
            digits += 1;
        }
        value += fraction / scale;
    }

    if digits == 0 {
        return None;
    }
    Some(if negative { -value } else { value })
}

fn find(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

fn parse_error(message: &str, line: &[u8]) -> RustyStatsError {
    RustyStatsError::ParseError {
        message: message.to_string(),
        input: Some(String::from_utf8_lossy(line).into_owned()),
    }
}
