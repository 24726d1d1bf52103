//! Derived network metrics.

use serde::{Deserialize, Serialize};

/// Network-level metrics computed from the most recent blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    /// Mean seconds per block over the sampled blocks.
    pub average_block_time: f64,
    /// Round-trip time of a lightweight call to the primary node, in
    /// milliseconds. `None` when the primary did not answer.
    pub network_latency: Option<f64>,
    /// Head block number at the time of sampling.
    pub latest_block: u64,
    /// Number of blocks the average was computed over.
    pub blocks_sampled: usize,
    pub node_count: usize,
}

/// Mean seconds per block from `(number, unix_timestamp)` samples.
///
/// The span between the lowest and highest sampled block is divided by the
/// number of blocks it covers, so a missing block in the middle of the
/// window does not skew the result. Fewer than two samples average to 0.0.
pub fn average_block_time(samples: &[(u64, i64)]) -> f64 {
    let Some(&(low_n, low_t)) = samples.iter().min_by_key(|(n, _)| *n) else {
        return 0.0;
    };
    let Some(&(high_n, high_t)) = samples.iter().max_by_key(|(n, _)| *n) else {
        return 0.0;
    };
    if high_n == low_n {
        return 0.0;
    }
    (high_t - low_t) as f64 / (high_n - low_n) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_over_contiguous_blocks() {
        let samples = [(12, 130), (11, 115), (10, 100)];
        assert!((average_block_time(&samples) - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gaps_do_not_skew_the_average() {
        let samples = [(20, 200), (17, 170), (16, 160)];
        assert!((average_block_time(&samples) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn degenerate_inputs_average_to_zero() {
        assert_eq!(average_block_time(&[]), 0.0);
        assert_eq!(average_block_time(&[(4, 100)]), 0.0);
    }

    #[test]
    fn serializes_camel_case() {
        let m = NetworkMetrics {
            average_block_time: 5.0,
            network_latency: Some(1.25),
            latest_block: 9,
            blocks_sampled: 3,
            node_count: 4,
        };
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["averageBlockTime"], 5.0);
        assert_eq!(v["networkLatency"], 1.25);
        assert_eq!(v["blocksSampled"], 3);
    }
}
