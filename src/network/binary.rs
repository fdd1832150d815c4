//! Binary wire protocol
//!
//! Fixed-layout, little-endian, packed. Every command opens with a
//! 4-byte preamble:
//!
//! ```text
//! magic:u8 = 0xAA | metric_type:u8 | key_len:u16
//! ```
//!
//! Numeric commands follow with an 8-byte double and the NUL-terminated
//! key. Set commands follow with a 2-byte member length and two
//! NUL-terminated strings (key, member). Records are consumed atomically:
//! until every byte of a command has arrived, nothing is consumed.

use crate::error::{Result, RustyStatsError};
use crate::metrics::{MetricType, SampleSink};
use crate::network::stream::StreamBuffer;
use bytes::Buf;
use tracing::warn;

/// First byte of every binary command; anything else on a fresh
/// connection selects the text protocol.
pub const BINARY_MAGIC: u8 = 0xAA;

/// Preamble plus the set member length
const SET_HEADER_LEN: usize = 6;
/// Preamble plus the 8-byte value
const VALUE_HEADER_LEN: usize = 12;

/// Pull every complete command out of the stream and feed it to the
/// sink. Returns the number of accepted samples; a malformed frame is an
/// error (the driver closes the connection).
pub fn drive<S: SampleSink>(
    stream: &mut StreamBuffer,
    sink: &S,
    input_counter: Option<&str>,
) -> Result<u64> {
    let mut accepted = 0u64;
    loop {
        // Enough header to know the command's full length?
        let Some(header) = stream.peek(SET_HEADER_LEN) else {
            return Ok(accepted);
        };

        if header[0] != BINARY_MAGIC {
            warn!(byte = header[0], "binary stream without magic byte");
            return Err(framing_error("missing magic byte"));
        }
        let Some(metric_type) = MetricType::from_wire_code(header[1]) else {
            warn!(code = header[1], "binary stream with unknown metric type");
            return Err(framing_error("unknown metric type code"));
        };
        let key_len = u16::from_le_bytes([header[2], header[3]]) as usize;

        if metric_type == MetricType::Set {
            let member_len = u16::from_le_bytes([header[4], header[5]]) as usize;
            let Some(frame) = stream.read_exact(SET_HEADER_LEN + key_len + member_len) else {
                return Ok(accepted);
            };
            let name = terminated_str(&frame[SET_HEADER_LEN..SET_HEADER_LEN + key_len], "key")?;
            let member = terminated_str(&frame[SET_HEADER_LEN + key_len..], "set member")?;
            if let Some(counter) = input_counter {
                sink.add_sample(MetricType::Counter, counter, 1.0);
            }
            sink.set_update(name, member);
        } else {
            let Some(frame) = stream.read_exact(VALUE_HEADER_LEN + key_len) else {
                return Ok(accepted);
            };
            let value = (&frame[4..VALUE_HEADER_LEN]).get_f64_le();
            let name = terminated_str(&frame[VALUE_HEADER_LEN..], "key")?;
            if let Some(counter) = input_counter {
                sink.add_sample(MetricType::Counter, counter, 1.0);
            }
            sink.add_sample(metric_type, name, value);
        }
        accepted += 1;
    }
}

/// A declared-length string must fill its slot and end in NUL
fn terminated_str<'a>(bytes: &'a [u8], what: &str) -> Result<&'a str> {
    match bytes.split_last() {
        Some((&0, name)) if !name.is_empty() && !name.contains(&0) => std::str::from_utf8(name)
            .map_err(|_| {
                warn!("binary stream with non-UTF-8 {}", what);
                framing_error("string is not valid UTF-8")
            }),
        _ => {
            warn!(
                input = %String::from_utf8_lossy(bytes),
                "binary stream with non-NUL-terminated {}",
                what
            );
            Err(framing_error("string is not NUL-terminated"))
        }
    }
}

fn framing_error(message: &str) -> RustyStatsError {
    RustyStatsError::FramingError {
        message: message.to_string(),
    }
}
