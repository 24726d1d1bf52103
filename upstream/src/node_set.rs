//! The configured cluster of upstream nodes.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ethws_types::{NodeEndpoint, NodeRole};

use crate::{
    HeadStream, HeadSubscriber, HttpRpcClient, RpcTransport, UpstreamError, WsRpcClient,
};

/// Deadlines applied to upstream calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamTimeouts {
    /// Per-request deadline; a node that exceeds it yields `Timeout`.
    pub request: Duration,
    /// Deadline for establishing a subscription.
    pub connect: Duration,
}

impl Default for UpstreamTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(10),
            connect: Duration::from_secs(5),
        }
    }
}

/// One upstream node: its endpoint, its request transport, and (primary
/// only) its head subscriber.
#[derive(Clone)]
pub struct Node {
    endpoint: NodeEndpoint,
    transport: Arc<dyn RpcTransport>,
    heads: Option<Arc<dyn HeadSubscriber>>,
    timeouts: UpstreamTimeouts,
}

impl Node {
    pub fn new(endpoint: NodeEndpoint, transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            endpoint,
            transport,
            heads: None,
            timeouts: UpstreamTimeouts::default(),
        }
    }

    pub fn with_head_subscriber(mut self, heads: Arc<dyn HeadSubscriber>) -> Self {
        self.heads = Some(heads);
        self
    }

    pub fn with_timeouts(mut self, timeouts: UpstreamTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    pub fn index(&self) -> usize {
        self.endpoint.index
    }

    /// Issue a raw JSON-RPC call bounded by the request deadline.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let deadline = self.timeouts.request;
        match tokio::time::timeout(deadline, self.transport.request(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(deadline)),
        }
    }

    /// Open a `newHeads` subscription. Only the primary node supports it.
    pub async fn subscribe_new_heads(&self) -> Result<HeadStream, UpstreamError> {
        let heads = self
            .heads
            .as_ref()
            .ok_or(UpstreamError::SubscriptionUnsupported)?;
        let deadline = self.timeouts.connect.max(self.timeouts.request);
        match tokio::time::timeout(deadline, heads.subscribe_new_heads()).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(deadline)),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("endpoint", &self.endpoint)
            .field("subscribable", &self.heads.is_some())
            .finish()
    }
}

/// The ordered set of configured nodes. Index order equals configuration
/// order; node 0 is the primary.
#[derive(Clone, Debug)]
pub struct NodeSet {
    nodes: Vec<Node>,
}

impl NodeSet {
    /// Build a node set from prepared nodes, checking the role layout.
    pub fn new(nodes: Vec<Node>) -> Result<Self, UpstreamError> {
        if nodes.is_empty() {
            return Err(UpstreamError::InvalidNodeSet("no nodes configured".into()));
        }
        for (position, node) in nodes.iter().enumerate() {
            if node.index() != position {
                return Err(UpstreamError::InvalidNodeSet(format!(
                    "node at position {position} carries index {}",
                    node.index()
                )));
            }
            if node.endpoint().role != NodeRole::for_index(position) {
                return Err(UpstreamError::InvalidNodeSet(format!(
                    "node {position} has role {}",
                    node.endpoint().role.as_str()
                )));
            }
        }
        Ok(Self { nodes })
    }

    /// Build real clients for `endpoints`: a websocket client for the
    /// primary, HTTP clients for the rest. No I/O happens here; the primary
    /// connects on first use.
    pub fn connect(
        endpoints: &[NodeEndpoint],
        timeouts: &UpstreamTimeouts,
    ) -> Result<Self, UpstreamError> {
        let nodes = endpoints
            .iter()
            .map(|endpoint| {
                let url = endpoint.url();
                match endpoint.role {
                    NodeRole::Primary => {
                        let client = Arc::new(WsRpcClient::with_connect_timeout(
                            url,
                            timeouts.connect,
                        ));
                        Node::new(endpoint.clone(), client.clone() as Arc<dyn RpcTransport>)
                            .with_head_subscriber(client)
                            .with_timeouts(timeouts.clone())
                    }
                    NodeRole::Secondary => Node::new(
                        endpoint.clone(),
                        Arc::new(HttpRpcClient::with_timeout(url, timeouts.request)),
                    )
                    .with_timeouts(timeouts.clone()),
                }
            })
            .collect();
        Self::new(nodes)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn primary(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn get(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Nodes in ring order starting at `start` (wrapping).
    pub fn ring_from(&self, start: usize) -> impl Iterator<Item = &Node> {
        let len = self.nodes.len();
        (0..len).map(move |offset| &self.nodes[(start + offset) % len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl RpcTransport for Echo {
        async fn request(&self, method: &str, _params: Value) -> Result<Value, UpstreamError> {
            Ok(Value::String(method.to_string()))
        }
    }

    struct Stall;

    #[async_trait]
    impl RpcTransport for Stall {
        async fn request(&self, _method: &str, _params: Value) -> Result<Value, UpstreamError> {
            std::future::pending().await
        }
    }

    fn node(index: usize, transport: Arc<dyn RpcTransport>) -> Node {
        Node::new(NodeEndpoint::new(index, "127.0.0.1", 8545).unwrap(), transport)
    }

    #[test]
    fn rejects_empty_and_misordered_sets() {
        assert!(NodeSet::new(vec![]).is_err());
        let err = NodeSet::new(vec![node(1, Arc::new(Echo))]).unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidNodeSet(_)));
    }

    #[test]
    fn connect_assigns_schemes_by_position() {
        let endpoints = vec![
            NodeEndpoint::new(0, "10.0.0.1", 8546).unwrap(),
            NodeEndpoint::new(1, "10.0.0.2", 8545).unwrap(),
        ];
        let set = NodeSet::connect(&endpoints, &UpstreamTimeouts::default()).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.primary().endpoint().is_primary());
        assert_eq!(set.get(1).unwrap().endpoint().url(), "http://10.0.0.2:8545");
    }

    #[test]
    fn ring_wraps_around() {
        let set = NodeSet::new((0..3).map(|i| node(i, Arc::new(Echo))).collect()).unwrap();
        let order: Vec<usize> = set.ring_from(2).map(Node::index).collect();
        assert_eq!(order, vec![2, 0, 1]);
    }

    #[tokio::test]
    async fn stalled_node_times_out() {
        let n = node(0, Arc::new(Stall)).with_timeouts(UpstreamTimeouts {
            request: Duration::from_millis(20),
            connect: Duration::from_millis(20),
        });
        let err = n.call("eth_blockNumber", Value::Null).await.unwrap_err();
        assert_eq!(err, UpstreamError::Timeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn secondary_cannot_subscribe() {
        let n = node(1, Arc::new(Echo));
        assert_eq!(
            n.subscribe_new_heads().await.unwrap_err(),
            UpstreamError::SubscriptionUnsupported
        );
    }
}
