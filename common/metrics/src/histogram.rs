//! Fixed-bucket latency histogram.
//!
//! Memory is constant regardless of how many values are observed: only the
//! per-bucket counts, the running sum and the observed extremes are kept.
//! Percentiles are therefore estimates, answered from the bucket boundaries.

use serde::{Serialize, Serializer};

/// Upper bounds (inclusive, in milliseconds) of the finite buckets. A final
/// `+Inf` bucket catches everything above the last bound.
pub const DURATION_BUCKETS_MS: [f64; 8] = [10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0];

const BUCKET_COUNT: usize = DURATION_BUCKETS_MS.len() + 1;

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    counts: [u64; BUCKET_COUNT],
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            counts: [0; BUCKET_COUNT],
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Callers are expected to pass finite, non-negative values.
    pub fn observe(&mut self, value: f64) {
        let idx = DURATION_BUCKETS_MS
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(BUCKET_COUNT - 1);
        self.counts[idx] += 1;
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        if self.count == 0 {
            return HistogramSnapshot::empty();
        }

        let mut cumulative = 0;
        let buckets = self
            .counts
            .iter()
            .enumerate()
            .map(|(idx, c)| {
                cumulative += c;
                BucketCount {
                    le: DURATION_BUCKETS_MS
                        .get(idx)
                        .copied()
                        .unwrap_or(f64::INFINITY),
                    cumulative,
                }
            })
            .collect();

        HistogramSnapshot {
            count: self.count,
            sum: self.sum,
            min: self.min,
            max: self.max,
            mean: self.sum / self.count as f64,
            p50: self.estimate_quantile(50),
            p95: self.estimate_quantile(95),
            p99: self.estimate_quantile(99),
            buckets,
        }
    }

    /// Nearest-rank estimate: the upper bound of the first bucket whose
    /// cumulative count reaches the rank, clamped to the observed range.
    fn estimate_quantile(&self, percent: u64) -> f64 {
        let rank = (self.count * percent).div_ceil(100).clamp(1, self.count);

        let mut cumulative = 0;
        for (idx, c) in self.counts.iter().enumerate() {
            cumulative += c;
            if cumulative >= rank {
                return match DURATION_BUCKETS_MS.get(idx) {
                    Some(bound) => bound.clamp(self.min, self.max),
                    None => self.max,
                };
            }
        }
        self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketCount {
    #[serde(serialize_with = "serialize_bound")]
    pub le: f64,
    pub cumulative: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    /// Cumulative counts, one entry per bucket including `+Inf`.
    pub buckets: Vec<BucketCount>,
}

impl HistogramSnapshot {
    fn empty() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            p50: 0.0,
            p95: 0.0,
            p99: 0.0,
            buckets: DURATION_BUCKETS_MS
                .iter()
                .copied()
                .chain(std::iter::once(f64::INFINITY))
                .map(|le| BucketCount { le, cumulative: 0 })
                .collect(),
        }
    }

    /// Cumulative count of the bucket bounded by `le`, if such a bucket exists.
    pub fn cumulative_at(&self, le: f64) -> Option<u64> {
        self.buckets
            .iter()
            .find(|b| b.le == le)
            .map(|b| b.cumulative)
    }
}

pub(crate) fn format_bound(le: f64) -> String {
    if le.is_infinite() {
        "+Inf".to_string()
    } else {
        le.to_string()
    }
}

fn serialize_bound<S: Serializer>(le: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_bound(*le))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram_of(values: &[f64]) -> Histogram {
        let mut h = Histogram::new();
        for v in values {
            h.observe(*v);
        }
        h
    }

    #[test]
    fn empty_snapshot_has_every_bucket() {
        let snapshot = Histogram::new().snapshot();
        assert_eq!(snapshot.count, 0);
        assert_eq!(snapshot.buckets.len(), 9);
        assert_eq!(snapshot.cumulative_at(f64::INFINITY), Some(0));
        assert_eq!(snapshot.p99, 0.0);
    }

    #[test]
    fn boundaries_are_inclusive() {
        let snapshot = histogram_of(&[10.0, 10.5, 5000.0, 5000.1]).snapshot();
        assert_eq!(snapshot.cumulative_at(10.0), Some(1));
        assert_eq!(snapshot.cumulative_at(50.0), Some(2));
        assert_eq!(snapshot.cumulative_at(5000.0), Some(3));
        assert_eq!(snapshot.cumulative_at(f64::INFINITY), Some(4));
    }

    #[test]
    fn cumulative_counts_never_decrease() {
        // Deterministic pseudo-random walk over a wide range of durations
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut h = Histogram::new();
        for _ in 0..5_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            h.observe((seed % 8_000) as f64 + (seed % 7) as f64 / 10.0);

            let snapshot = h.snapshot();
            for pair in snapshot.buckets.windows(2) {
                assert!(pair[1].cumulative >= pair[0].cumulative);
            }
            assert_eq!(snapshot.buckets.last().unwrap().cumulative, snapshot.count);
        }
    }

    #[test]
    fn three_requests_land_in_expected_buckets() {
        let snapshot = histogram_of(&[100.0, 300.0, 1200.0]).snapshot();
        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.cumulative_at(250.0), Some(1));
        assert_eq!(snapshot.cumulative_at(500.0), Some(2));
        assert_eq!(snapshot.cumulative_at(2500.0), Some(3));
        assert_eq!(snapshot.min, 100.0);
        assert_eq!(snapshot.max, 1200.0);
        assert_eq!(snapshot.sum, 1600.0);
    }

    #[test]
    fn percentiles_come_from_bucket_bounds() {
        let mut values = vec![20.0; 90];
        values.extend(vec![700.0; 9]);
        values.push(4000.0);
        let snapshot = histogram_of(&values).snapshot();

        assert_eq!(snapshot.p50, 50.0);
        assert_eq!(snapshot.p95, 1000.0);
        // rank 99 is still inside the 1000ms bucket
        assert_eq!(snapshot.p99, 1000.0);
    }

    #[test]
    fn percentiles_are_clamped_to_observed_range() {
        let snapshot = histogram_of(&[3.0, 4.0]).snapshot();
        assert_eq!(snapshot.p50, 4.0);

        let snapshot = histogram_of(&[7_500.0, 9_000.0]).snapshot();
        // +Inf bucket answers with the observed max
        assert_eq!(snapshot.p99, 9_000.0);
        // finite bound above the observed max is lowered to it
        let snapshot = histogram_of(&[60.0, 70.0]).snapshot();
        assert_eq!(snapshot.p50, 70.0);
    }

    #[test]
    fn infinite_bound_serializes_as_string() {
        let snapshot = histogram_of(&[1.0]).snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["buckets"][8]["le"], "+Inf");
        assert_eq!(json["buckets"][0]["le"], "10");
    }
}
