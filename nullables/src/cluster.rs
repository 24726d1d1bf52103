//! Node sets made of nullable nodes.

use std::sync::Arc;
use std::time::Duration;

use ethws_types::NodeEndpoint;
use ethws_upstream::{Node, NodeSet, UpstreamTimeouts};

use crate::NullNode;

/// Build a node set of `count` nullable nodes sharing the same synthetic
/// chain (`0..=head`, `block_time` seconds apart). Node 0 supports head
/// subscriptions. Request deadlines are short so stalled-node tests finish
/// quickly.
pub fn null_cluster(count: usize, head: u64, block_time: u64) -> (NodeSet, Vec<Arc<NullNode>>) {
    let timeouts = UpstreamTimeouts {
        request: Duration::from_millis(500),
        connect: Duration::from_millis(500),
    };
    let nulls: Vec<Arc<NullNode>> = (0..count)
        .map(|_| Arc::new(NullNode::with_chain(head, block_time)))
        .collect();
    let nodes = nulls
        .iter()
        .enumerate()
        .map(|(index, null)| {
            let endpoint = NodeEndpoint::new(index, format!("null{index}"), 8545 + index as u16)
                .expect("synthetic endpoints are valid");
            let node = Node::new(endpoint, null.clone()).with_timeouts(timeouts.clone());
            if index == 0 {
                node.with_head_subscriber(null.clone())
            } else {
                node
            }
        })
        .collect();
    let set = NodeSet::new(nodes).expect("synthetic node set is well-formed");
    (set, nulls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_node_zero_subscribes() {
        let (set, _nulls) = null_cluster(3, 10, 5);
        assert_eq!(set.len(), 3);
        assert!(set.primary().subscribe_new_heads().await.is_ok());
        assert!(set.get(1).unwrap().subscribe_new_heads().await.is_err());
        assert_eq!(set.get(2).unwrap().block_number().await.unwrap(), 10);
    }
}
