use std::sync::Arc;

use ethws_cluster::{ChainReader, ClusterError, FailoverPolicy, ReaderConfig};
use ethws_nullables::null_cluster;

fn reader(count: usize, head: u64, block_time: u64) -> (ChainReader, Vec<Arc<ethws_nullables::NullNode>>) {
    let (set, nulls) = null_cluster(count, head, block_time);
    (ChainReader::new(Arc::new(set), ReaderConfig::default()), nulls)
}

#[tokio::test]
async fn latest_blocks_are_contiguous_and_descending() {
    let (reader, _nulls) = reader(3, 20, 15);
    let blocks = reader.get_latest_blocks(5).await.unwrap();

    let numbers: Vec<u64> = blocks.iter().map(|b| b.number).collect();
    assert_eq!(numbers, vec![20, 19, 18, 17, 16]);
    for pair in blocks.windows(2) {
        assert_eq!(pair[0].parent_hash, pair[1].hash);
    }
}

#[tokio::test]
async fn count_outside_bounds_names_the_field() {
    let (reader, _nulls) = reader(1, 20, 15);

    let err = reader.get_latest_blocks(0).await.unwrap_err();
    assert_eq!(err.field(), Some("count"));

    let err = reader.get_latest_blocks(101).await.unwrap_err();
    assert!(matches!(err, ClusterError::InvalidArgument { field: "count", .. }));
}

#[tokio::test]
async fn short_chain_is_insufficient_data() {
    let (reader, _nulls) = reader(2, 2, 15);
    let err = reader.get_latest_blocks(5).await.unwrap_err();
    assert_eq!(
        err,
        ClusterError::InsufficientData {
            requested: 5,
            retrieved: 3
        }
    );
}

#[tokio::test]
async fn gap_in_the_chain_stops_the_walk() {
    let (reader, nulls) = reader(2, 10, 15);
    for null in &nulls {
        null.remove_block(8);
    }
    let err = reader.get_latest_blocks(5).await.unwrap_err();
    assert_eq!(
        err,
        ClusterError::InsufficientData {
            requested: 5,
            retrieved: 2
        }
    );
}

#[tokio::test]
async fn reads_fail_over_and_stick_to_the_healthy_node() {
    let (reader, nulls) = reader(3, 10, 15);
    nulls[0].set_unreachable(true);

    let block = reader.get_block_by_number(3).await.unwrap();
    assert_eq!(block.hash, "0xblock3");
    assert_eq!(reader.cursor(), 1);

    reader.get_block_by_number(4).await.unwrap();
    assert_eq!(nulls[0].call_count("eth_getBlockByNumber"), 1);
    assert_eq!(nulls[1].call_count("eth_getBlockByNumber"), 2);
}

#[tokio::test]
async fn default_policy_spreads_reads_across_healthy_nodes() {
    let (reader, nulls) = reader(3, 10, 15);
    for n in 0..9 {
        reader.get_block_by_number(n).await.unwrap();
    }
    let counts: Vec<usize> = nulls
        .iter()
        .map(|null| null.call_count("eth_getBlockByNumber"))
        .collect();
    assert_eq!(counts, vec![3, 3, 3]);
}

#[tokio::test]
async fn rotation_resumes_from_the_node_that_answered_after_failover() {
    let (reader, nulls) = reader(3, 10, 15);
    nulls[1].set_unreachable(true);

    // starts at 0, moves to 1
    reader.get_block_by_number(1).await.unwrap();
    assert_eq!(reader.cursor(), 1);
    // 1 fails, 2 answers and becomes the next start
    reader.get_block_by_number(2).await.unwrap();
    assert_eq!(reader.cursor(), 2);
    // 2 answers cleanly, rotation continues at 0
    reader.get_block_by_number(3).await.unwrap();
    assert_eq!(reader.cursor(), 0);

    assert_eq!(nulls[0].call_count("eth_getBlockByNumber"), 1);
    assert_eq!(nulls[1].call_count("eth_getBlockByNumber"), 1);
    assert_eq!(nulls[2].call_count("eth_getBlockByNumber"), 2);
}

#[tokio::test]
async fn sticky_policy_pins_reads_to_one_node() {
    let (set, nulls) = null_cluster(3, 10, 15);
    let reader = ChainReader::new(
        Arc::new(set),
        ReaderConfig {
            failover: FailoverPolicy::Sticky,
            ..ReaderConfig::default()
        },
    );
    for n in 0..4 {
        reader.get_block_by_number(n).await.unwrap();
    }
    assert_eq!(nulls[0].call_count("eth_getBlockByNumber"), 4);
    assert_eq!(reader.cursor(), 0);
}

#[tokio::test]
async fn unreachable_primary_still_serves_latest_blocks() {
    let (reader, nulls) = reader(2, 10, 15);
    nulls[0].set_unreachable(true);
    let blocks = reader.get_latest_blocks(3).await.unwrap();
    assert_eq!(blocks[0].number, 10);
}

#[tokio::test]
async fn round_robin_spreads_reads() {
    let (set, nulls) = null_cluster(3, 10, 15);
    let reader = ChainReader::new(
        Arc::new(set),
        ReaderConfig {
            failover: FailoverPolicy::RoundRobin,
            ..ReaderConfig::default()
        },
    );
    for n in 0..3 {
        reader.get_block_by_number(n).await.unwrap();
    }
    for null in &nulls {
        assert_eq!(null.call_count("eth_getBlockByNumber"), 1);
    }
}

#[tokio::test]
async fn missing_everywhere_is_not_found() {
    let (reader, nulls) = reader(2, 10, 15);
    for null in &nulls {
        null.remove_block(3);
    }
    assert_eq!(
        reader.get_block_by_number(3).await.unwrap_err(),
        ClusterError::NotFound(3)
    );
}

#[tokio::test]
async fn every_node_down_reports_attempts() {
    let (reader, nulls) = reader(3, 10, 15);
    for null in &nulls {
        null.set_unreachable(true);
    }
    match reader.get_block_by_number(3).await.unwrap_err() {
        ClusterError::Upstream { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(last.is_transient());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn fees_are_exact_or_approximated() {
    // block 2 carries two 21000-gas transactions at 1 gwei
    let expected = 2.0 * 21_000.0 * 1e9 / 1e18;

    let (reader, nulls) = reader(1, 5, 15);
    let exact = reader.get_block_by_number(2).await.unwrap();
    assert!((exact.total_fees - expected).abs() < 1e-15);
    assert_eq!(exact.transaction_count, 2);
    assert_eq!(exact.transactions[1].to, "");

    nulls[0].set_receipts_supported(false);
    let approx = reader.get_block_by_number(2).await.unwrap();
    assert!((approx.total_fees - expected).abs() < 1e-15);

    let empty = reader.get_block_by_number(3).await.unwrap();
    assert_eq!(empty.total_fees, 0.0);
    assert_eq!(nulls[0].call_count("eth_getBlockReceipts"), 2);
}

#[tokio::test]
async fn zero_coinbase_resolves_to_the_signer() {
    let (reader, _nulls) = reader(1, 5, 15);
    let block = reader.get_block_by_number(3).await.unwrap();
    assert_eq!(block.validator, "0x00000000000000000000000000000000000000a2");
}

#[tokio::test]
async fn validators_come_from_the_first_responding_node() {
    let (reader, nulls) = reader(2, 5, 15);
    nulls[0].set_unreachable(true);
    nulls[1].set_validators(vec!["0xabc".into()]);
    assert_eq!(reader.get_validators().await.unwrap(), vec!["0xabc".to_string()]);
}

#[tokio::test]
async fn metrics_average_over_the_window() {
    let (reader, _nulls) = reader(2, 30, 12);
    let metrics = reader.get_network_metrics().await.unwrap();
    assert_eq!(metrics.latest_block, 30);
    assert_eq!(metrics.blocks_sampled, 10);
    assert_eq!(metrics.node_count, 2);
    assert!((metrics.average_block_time - 12.0).abs() < f64::EPSILON);
    assert!(metrics.network_latency.is_some());
}

#[tokio::test]
async fn metrics_use_only_retrievable_blocks() {
    let (reader, nulls) = reader(2, 9, 5);
    for null in &nulls {
        for n in 0..=6 {
            null.remove_block(n);
        }
    }
    let metrics = reader.get_network_metrics().await.unwrap();
    assert_eq!(metrics.blocks_sampled, 3);
    assert!((metrics.average_block_time - 5.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn metrics_without_primary_have_no_latency() {
    let (reader, nulls) = reader(2, 9, 5);
    nulls[0].set_unreachable(true);
    let metrics = reader.get_network_metrics().await.unwrap();
    assert_eq!(metrics.network_latency, None);
    assert_eq!(metrics.latest_block, 9);
}
