//! Streaming quantile estimation for timers
//!
//! A Greenwald-Khanna summary: the stream is folded into a sorted list of
//! `(value, g, delta)` tuples maintained under the invariant
//! `g + delta <= 2*epsilon*n`, which bounds the rank error of any query
//! by `epsilon * n`. Inserts are buffered and merged in batches so the
//! hot path is a push onto a Vec.

/// One summary tuple: `g` is the rank gap to the previous tuple, `delta`
/// the uncertainty in this tuple's rank.
#[derive(Debug, Clone)]
struct Tuple {
    value: f64,
    g: u64,
    delta: u64,
}

/// Quantile sketch with configurable rank error
#[derive(Debug, Clone)]
pub struct QuantileSketch {
    epsilon: f64,
    count: u64,
    summary: Vec<Tuple>,
    buffer: Vec<f64>,
    buffer_cap: usize,
}

impl QuantileSketch {
    /// Create a sketch targeting the given rank error bound (0 < epsilon < 1)
    pub fn new(epsilon: f64) -> Self {
        let buffer_cap = ((1.0 / (2.0 * epsilon)) as usize).max(16);
        Self {
            epsilon,
            count: 0,
            summary: Vec::new(),
            buffer: Vec::with_capacity(buffer_cap),
            buffer_cap,
        }
    }

    /// Number of values inserted so far
    pub fn count(&self) -> u64 {
        self.count + self.buffer.len() as u64
    }

    /// Insert one value
    pub fn insert(&mut self, value: f64) {
        self.buffer.push(value);
        if self.buffer.len() >= self.buffer_cap {
            self.flush_buffer();
        }
    }

    /// Estimate the value at quantile `q` in [0, 1]. Returns 0 for an
    /// empty sketch.
    pub fn query(&mut self, q: f64) -> f64 {
        self.flush_buffer();
        if self.count == 0 {
            return 0.0;
        }
        if q <= 0.0 {
            return self.summary[0].value;
        }
        let last = self.summary[self.summary.len() - 1].value;
        if q >= 1.0 {
            return last;
        }

        let n = self.count as f64;
        let target = (q * n).ceil().max(1.0);
        let allow = self.epsilon * n;

        let mut rank_min = 0u64;
        let mut prev = self.summary[0].value;
        for tuple in &self.summary {
            rank_min += tuple.g;
            if (rank_min + tuple.delta) as f64 > target + allow {
                return prev;
            }
            prev = tuple.value;
        }
        last
    }

    /// Tuples currently held; sub-linear in the number of inserts
    pub fn summary_len(&self) -> usize {
        self.summary.len()
    }

    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut pending = std::mem::take(&mut self.buffer);
        pending.sort_by(f64::total_cmp);
        for value in pending.drain(..) {
            self.insert_tuple(value);
        }
        self.buffer = pending;
        self.compress();
    }

    fn insert_tuple(&mut self, value: f64) {
        self.count += 1;
        let idx = self.summary.partition_point(|t| t.value <= value);
        // New extremes carry zero uncertainty so min/max stay exact.
        let delta = if idx == 0 || idx == self.summary.len() {
            0
        } else {
            self.threshold().saturating_sub(1)
        };
        self.summary.insert(
            idx,
            Tuple {
                value,
                g: 1,
                delta,
            },
        );
    }

    fn compress(&mut self) {
        if self.summary.len() < 3 {
            return;
        }
        let threshold = self.threshold();
        let mut i = self.summary.len() - 2;
        while i >= 1 {
            let merged_g = self.summary[i].g + self.summary[i + 1].g;
            if merged_g + self.summary[i + 1].delta <= threshold {
                self.summary[i + 1].g = merged_g;
                self.summary.remove(i);
            }
            i -= 1;
        }
    }

    fn threshold(&self) -> u64 {
        (2.0 * self.epsilon * self.count as f64).floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sketch_queries_zero() {
        let mut sketch = QuantileSketch::new(0.01);
        assert_eq!(sketch.query(0.5), 0.0);
        assert_eq!(sketch.query(0.99), 0.0);
        assert_eq!(sketch.count(), 0);
    }

    #[test]
    fn test_single_value() {
        let mut sketch = QuantileSketch::new(0.01);
        sketch.insert(42.0);
        assert_eq!(sketch.query(0.5), 42.0);
        assert_eq!(sketch.query(0.99), 42.0);
        assert_eq!(sketch.count(), 1);
    }

    #[test]
    fn test_small_stream_is_exact() {
        let mut sketch = QuantileSketch::new(0.01);
        for v in [5.0, 1.0, 3.0, 2.0, 4.0] {
            sketch.insert(v);
        }
        assert_eq!(sketch.query(0.5), 3.0);
        assert_eq!(sketch.query(0.0), 1.0);
        assert_eq!(sketch.query(1.0), 5.0);
    }

    #[test]
    fn test_rank_error_bound_uniform() {
        let eps = 0.01;
        let n = 10_000u64;
        let mut sketch = QuantileSketch::new(eps);
        // Shuffled-ish insertion order via a multiplicative stride.
        for i in 0..n {
            let v = ((i * 7919) % n) as f64;
            sketch.insert(v);
        }
        for q in [0.5, 0.9, 0.95, 0.99] {
            let estimate = sketch.query(q);
            // Values are 0..n, so value == rank.
            let target_rank = q * n as f64;
            let err = (estimate - target_rank).abs();
            assert!(
                err <= eps * n as f64 + 1.0,
                "q={}: estimate {} vs target {} (err {})",
                q,
                estimate,
                target_rank,
                err
            );
        }
    }

    #[test]
    fn test_summary_is_sublinear() {
        let mut sketch = QuantileSketch::new(0.01);
        for i in 0..100_000u64 {
            sketch.insert(i as f64);
        }
        sketch.query(0.5);
        assert!(
            sketch.summary_len() < 10_000,
            "summary holds {} tuples",
            sketch.summary_len()
        );
    }

    #[test]
    fn test_duplicate_heavy_stream() {
        let mut sketch = QuantileSketch::new(0.05);
        for _ in 0..1000 {
            sketch.insert(7.0);
        }
        for _ in 0..10 {
            sketch.insert(100.0);
        }
        assert_eq!(sketch.query(0.5), 7.0);
        assert_eq!(sketch.query(1.0), 100.0);
    }
}
