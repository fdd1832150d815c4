//! Binary flush format
//!
//! Each record is a packed little-endian prefix followed by the
//! NUL-terminated metric name and, for histogram records, a `u32` bucket
//! count:
//!
//! ```text
//! timestamp:u64 | type:u8 | value_type:u8 | key_len:u16 | value:f64
//! ```
//!
//! `type` reuses the ingress wire codes; `value_type` says what the
//! double means (sum, mean, a percentile, a histogram bucket edge, ...).

use crate::error::{Result, RustyStatsError};
use crate::metrics::{Accumulator, MetricType, QUANTILES};
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const OUT_NO_TYPE: u8 = 0x00;
pub const OUT_SUM: u8 = 0x01;
pub const OUT_SUM_SQ: u8 = 0x02;
pub const OUT_MEAN: u8 = 0x03;
pub const OUT_COUNT: u8 = 0x04;
pub const OUT_STDDEV: u8 = 0x05;
pub const OUT_MIN: u8 = 0x06;
pub const OUT_MAX: u8 = 0x07;
pub const OUT_HIST_FLOOR: u8 = 0x08;
pub const OUT_HIST_BIN: u8 = 0x09;
pub const OUT_HIST_CEIL: u8 = 0x0A;
/// High bit plus the percentile in [0, 100]
pub const OUT_PERCENTILE: u8 = 0x80;

const PREFIX_LEN: usize = 8 + 1 + 1 + 2 + 8;

/// One decoded flush record; also the unit the serializer emits
#[derive(Debug, Clone, PartialEq)]
pub struct FlushRecord {
    pub timestamp: u64,
    pub metric_type: MetricType,
    pub value_type: u8,
    pub name: String,
    pub value: f64,
    /// Present exactly for the three histogram record kinds
    pub bucket_count: Option<u32>,
}

impl FlushRecord {
    fn has_bucket_count(value_type: u8) -> bool {
        matches!(value_type, OUT_HIST_FLOOR | OUT_HIST_BIN | OUT_HIST_CEIL)
    }

    /// Append the packed wire form to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.timestamp);
        buf.put_u8(self.metric_type.wire_code());
        buf.put_u8(self.value_type);
        buf.put_u16_le(self.name.len() as u16 + 1);
        buf.put_f64_le(self.value);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(0);
        if let Some(count) = self.bucket_count {
            buf.put_u32_le(count);
        }
    }

    /// Read one record back out of a buffer. `Ok(None)` when the buffer
    /// holds less than a full record; nothing is consumed in that case.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<FlushRecord>> {
        if buf.len() < PREFIX_LEN {
            return Ok(None);
        }
        let mut peek = &buf[..];
        let timestamp = peek.get_u64_le();
        let type_code = peek.get_u8();
        let value_type = peek.get_u8();
        let key_len = peek.get_u16_le() as usize;
        let value = peek.get_f64_le();

        let mut total = PREFIX_LEN + key_len;
        if Self::has_bucket_count(value_type) {
            total += 4;
        }
        if buf.len() < total {
            return Ok(None);
        }

        let metric_type = MetricType::from_wire_code(type_code).ok_or_else(|| {
            RustyStatsError::FramingError {
                message: format!("unknown metric type code in flush record: {}", type_code),
            }
        })?;

        buf.advance(PREFIX_LEN);
        let key = buf.split_to(key_len);
        let name = match key.split_last() {
            Some((&0, name)) => std::str::from_utf8(name)
                .map_err(|_| RustyStatsError::FramingError {
                    message: "flush record name is not valid UTF-8".to_string(),
                })?
                .to_string(),
            _ => {
                return Err(RustyStatsError::FramingError {
                    message: "flush record name is not NUL-terminated".to_string(),
                })
            }
        };
        let bucket_count = if Self::has_bucket_count(value_type) {
            Some(buf.get_u32_le())
        } else {
            None
        };

        Ok(Some(FlushRecord {
            timestamp,
            metric_type,
            value_type,
            name,
            value,
            bucket_count,
        }))
    }
}

/// Serialize every metric in `entries` to the sink
pub async fn write_all<W: AsyncWrite + Unpin>(
    out: &mut W,
    entries: &mut [(String, Accumulator)],
    timestamp: u64,
) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(4096);
    for (name, accumulator) in entries.iter_mut() {
        buf.clear();
        encode_metric(&mut buf, name, accumulator, timestamp);
        out.write_all(&buf).await?;
    }
    out.flush().await
}

/// Append all records for one metric
fn encode_metric(buf: &mut BytesMut, name: &str, accumulator: &mut Accumulator, ts: u64) {
    let mut put = |metric_type: MetricType, value_type: u8, value: f64, count: Option<u32>| {
        FlushRecord {
            timestamp: ts,
            metric_type,
            value_type,
            name: name.to_string(),
            value,
            bucket_count: count,
        }
        .encode(buf);
    };

    match accumulator {
        Accumulator::KeyVal(kv) => {
            for &value in &kv.values {
                put(MetricType::KeyVal, OUT_NO_TYPE, value, None);
            }
        }
        Accumulator::Gauge(gauge) => {
            put(MetricType::Gauge, OUT_NO_TYPE, gauge.value, None);
        }
        Accumulator::Set(set) => {
            put(MetricType::Set, OUT_SUM, set.cardinality() as f64, None);
        }
        Accumulator::Counter(m) => {
            put(MetricType::Counter, OUT_SUM, m.sum(), None);
            put(MetricType::Counter, OUT_SUM_SQ, m.sum_sq(), None);
            put(MetricType::Counter, OUT_MEAN, m.mean(), None);
            put(MetricType::Counter, OUT_COUNT, m.count() as f64, None);
            put(MetricType::Counter, OUT_STDDEV, m.stddev(), None);
            put(MetricType::Counter, OUT_MIN, m.min(), None);
            put(MetricType::Counter, OUT_MAX, m.max(), None);
        }
        Accumulator::Timer(timer) => {
            let m = &timer.moments;
            put(MetricType::Timer, OUT_SUM, m.sum(), None);
            put(MetricType::Timer, OUT_SUM_SQ, m.sum_sq(), None);
            put(MetricType::Timer, OUT_MEAN, m.mean(), None);
            put(MetricType::Timer, OUT_COUNT, m.count() as f64, None);
            put(MetricType::Timer, OUT_STDDEV, m.stddev(), None);
            put(MetricType::Timer, OUT_MIN, m.min(), None);
            put(MetricType::Timer, OUT_MAX, m.max(), None);
            for q in QUANTILES {
                let pct = (q * 100.0) as u8;
                put(
                    MetricType::Timer,
                    OUT_PERCENTILE | pct,
                    timer.sketch.query(q),
                    None,
                );
            }
            if let Some(bins) = &timer.histogram {
                put(
                    MetricType::Timer,
                    OUT_HIST_FLOOR,
                    bins.min_val(),
                    Some(bins.floor_count()),
                );
                for (edge, count) in bins.linear_bins() {
                    put(MetricType::Timer, OUT_HIST_BIN, edge, Some(count));
                }
                put(
                    MetricType::Timer,
                    OUT_HIST_CEIL,
                    bins.max_val(),
                    Some(bins.ceil_count()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::{HistogramRule, MetricsRegistry};

    async fn serialize(registry: MetricsRegistry, ts: u64) -> Vec<FlushRecord> {
        let mut entries = registry.into_entries();
        let mut out = Vec::new();
        write_all(&mut out, &mut entries, ts).await.unwrap();

        let mut buf = BytesMut::from(&out[..]);
        let mut records = Vec::new();
        while let Some(record) = FlushRecord::decode(&mut buf).unwrap() {
            records.push(record);
        }
        assert!(buf.is_empty(), "trailing bytes after last record");
        records
    }

    #[test]
    fn test_record_round_trip_is_bit_exact() {
        let record = FlushRecord {
            timestamp: 1234567890,
            metric_type: MetricType::Timer,
            value_type: OUT_PERCENTILE | 99,
            name: "api.latency".to_string(),
            value: f64::from_bits(0x400921FB54442D18),
            bucket_count: None,
        };
        let mut buf = BytesMut::new();
        record.encode(&mut buf);
        let decoded = FlushRecord::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.timestamp, record.timestamp);
        assert_eq!(decoded.metric_type, record.metric_type);
        assert_eq!(decoded.value_type, record.value_type);
        assert_eq!(decoded.name, record.name);
        assert_eq!(decoded.value.to_bits(), record.value.to_bits());
        assert_eq!(decoded.bucket_count, None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_histogram_record_round_trip() {
        let record = FlushRecord {
            timestamp: 50,
            metric_type: MetricType::Timer,
            value_type: OUT_HIST_BIN,
            name: "a".to_string(),
            value: 5.0,
            bucket_count: Some(17),
        };
        let mut buf = BytesMut::new();
        record.encode(&mut buf);
        let decoded = FlushRecord::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_partial_consumes_nothing() {
        let record = FlushRecord {
            timestamp: 1,
            metric_type: MetricType::Gauge,
            value_type: OUT_NO_TYPE,
            name: "g".to_string(),
            value: 42.0,
            bucket_count: None,
        };
        let mut full = BytesMut::new();
        record.encode(&mut full);

        for split in 1..full.len() {
            let mut partial = BytesMut::from(&full[..split]);
            assert_eq!(FlushRecord::decode(&mut partial).unwrap(), None);
            assert_eq!(partial.len(), split);
        }
    }

    #[test]
    fn test_wire_layout_is_packed_little_endian() {
        let record = FlushRecord {
            timestamp: 0x0102030405060708,
            metric_type: MetricType::Gauge,
            value_type: OUT_NO_TYPE,
            name: "g".to_string(),
            value: 42.0,
            bucket_count: None,
        };
        let mut buf = BytesMut::new();
        record.encode(&mut buf);

        // timestamp, little-endian
        assert_eq!(&buf[0..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(buf[8], 0x5); // gauge wire code
        assert_eq!(buf[9], 0x0); // no sub-type
        assert_eq!(&buf[10..12], &[2, 0]); // key_len includes the NUL
        assert_eq!(&buf[12..20], &42.0f64.to_le_bytes());
        assert_eq!(&buf[20..22], b"g\0");
        assert_eq!(buf.len(), 22);
    }

    #[tokio::test]
    async fn test_counter_record_sequence() {
        let reg = MetricsRegistry::new(&MetricsConfig::default(), 0);
        reg.add_sample(MetricType::Counter, "c", 2.0);
        reg.add_sample(MetricType::Counter, "c", 4.0);

        let records = serialize(reg, 77).await;
        let kinds: Vec<u8> = records.iter().map(|r| r.value_type).collect();
        assert_eq!(
            kinds,
            vec![OUT_SUM, OUT_SUM_SQ, OUT_MEAN, OUT_COUNT, OUT_STDDEV, OUT_MIN, OUT_MAX]
        );
        assert!(records.iter().all(|r| r.timestamp == 77));
        assert!(records.iter().all(|r| r.metric_type == MetricType::Counter));
        assert_eq!(records[0].value, 6.0); // sum
        assert_eq!(records[3].value, 2.0); // count
    }

    #[tokio::test]
    async fn test_timer_records_include_percentiles_and_histogram() {
        let mut config = MetricsConfig::default();
        config.histograms.push(HistogramRule {
            prefix: "t".to_string(),
            min_val: 0.0,
            max_val: 10.0,
            bin_width: 5.0,
        });
        let reg = MetricsRegistry::new(&config, 0);
        for v in [1.0, 6.0, 15.0] {
            reg.add_sample(MetricType::Timer, "t", v);
        }

        let records = serialize(reg, 50).await;
        let kinds: Vec<u8> = records.iter().map(|r| r.value_type).collect();
        assert_eq!(
            kinds,
            vec![
                OUT_SUM,
                OUT_SUM_SQ,
                OUT_MEAN,
                OUT_COUNT,
                OUT_STDDEV,
                OUT_MIN,
                OUT_MAX,
                OUT_PERCENTILE | 50,
                OUT_PERCENTILE | 90,
                OUT_PERCENTILE | 95,
                OUT_PERCENTILE | 99,
                OUT_HIST_FLOOR,
                OUT_HIST_BIN,
                OUT_HIST_BIN,
                OUT_HIST_CEIL,
            ]
        );

        let floor = &records[11];
        assert_eq!(floor.value, 0.0);
        assert_eq!(floor.bucket_count, Some(0));
        let ceil = &records[14];
        assert_eq!(ceil.value, 10.0);
        assert_eq!(ceil.bucket_count, Some(1));
    }

    #[tokio::test]
    async fn test_set_emits_single_sum_record() {
        let reg = MetricsRegistry::new(&MetricsConfig::default(), 0);
        reg.set_update("u", "alice");
        reg.set_update("u", "bob");

        let records = serialize(reg, 5).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric_type, MetricType::Set);
        assert_eq!(records[0].value_type, OUT_SUM);
        assert_eq!(records[0].value, 2.0);
    }

    #[tokio::test]
    async fn test_gauge_record() {
        let reg = MetricsRegistry::new(&MetricsConfig::default(), 0);
        reg.add_sample(MetricType::Gauge, "g", 42.0);

        let records = serialize(reg, 3).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric_type, MetricType::Gauge);
        assert_eq!(records[0].value_type, OUT_NO_TYPE);
        assert_eq!(records[0].name, "g");
        assert_eq!(records[0].value, 42.0);
    }
}
