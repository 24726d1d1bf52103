//! Command handlers backed by the node cluster.

use std::sync::Arc;
use tracing::debug;

use ethws_cluster::{ChainReader, ClusterError, MiningCoordinator};

use crate::messages::{ClientMessage, ServerMessage};

/// Routes upstream-bound client commands to the chain reader and the
/// mining coordinator. Subscription commands and `ping` never reach it;
/// the hub answers those itself.
pub struct Dispatcher {
    reader: Arc<ChainReader>,
    mining: Arc<MiningCoordinator>,
}

impl Dispatcher {
    pub fn new(reader: Arc<ChainReader>, mining: Arc<MiningCoordinator>) -> Self {
        Self { reader, mining }
    }

    pub fn reader(&self) -> &Arc<ChainReader> {
        &self.reader
    }

    pub fn mining(&self) -> &Arc<MiningCoordinator> {
        &self.mining
    }

    /// Run one command and build its reply. Failures become error replies.
    pub async fn handle(&self, command: ClientMessage) -> ServerMessage {
        let kind = command.kind();
        match self.execute(command).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(kind, error = %e, "command failed");
                ServerMessage::error(e.to_string())
            }
        }
    }

    async fn execute(&self, command: ClientMessage) -> Result<ServerMessage, ClusterError> {
        Ok(match command {
            ClientMessage::GetLatestBlocks { count } => {
                ServerMessage::GetLatestBlocks(self.reader.get_latest_blocks(count).await?)
            }
            ClientMessage::GetBlock { number } => {
                ServerMessage::GetBlock(self.reader.get_block_by_number(number).await?)
            }
            ClientMessage::GetMiningStatus => {
                ServerMessage::GetMiningStatus(self.mining.get_mining_status().await)
            }
            ClientMessage::ToggleMining { start } => {
                ServerMessage::ToggleMining(self.mining.toggle_mining(start).await?)
            }
            ClientMessage::GetValidators => {
                ServerMessage::GetValidators(self.reader.get_validators().await?)
            }
            ClientMessage::GetNetworkMetrics => {
                ServerMessage::GetNetworkMetrics(self.reader.get_network_metrics().await?)
            }
            ClientMessage::Ping => ServerMessage::Pong,
            ClientMessage::SubscribeBlocks | ClientMessage::UnsubscribeBlocks => {
                ServerMessage::error("subscriptions are handled by the hub")
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethws_cluster::{MiningConfig, ReaderConfig};
    use ethws_nullables::null_cluster;

    fn dispatcher() -> (Dispatcher, Vec<Arc<ethws_nullables::NullNode>>) {
        let (set, nulls) = null_cluster(2, 12, 15);
        let set = Arc::new(set);
        let reader = Arc::new(ChainReader::new(set.clone(), ReaderConfig::default()));
        let mining = Arc::new(MiningCoordinator::new(set, MiningConfig::default()));
        (Dispatcher::new(reader, mining), nulls)
    }

    #[tokio::test]
    async fn reads_are_answered_under_the_request_type() {
        let (dispatcher, _nulls) = dispatcher();
        match dispatcher.handle(ClientMessage::GetBlock { number: 4 }).await {
            ServerMessage::GetBlock(block) => assert_eq!(block.number, 4),
            other => panic!("unexpected reply {other:?}"),
        }
        match dispatcher.handle(ClientMessage::GetValidators).await {
            ServerMessage::GetValidators(v) => assert_eq!(v.len(), 2),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn cluster_failures_become_error_replies() {
        let (dispatcher, nulls) = dispatcher();
        for null in &nulls {
            null.remove_block(9);
        }
        match dispatcher.handle(ClientMessage::GetBlock { number: 9 }).await {
            ServerMessage::Error(e) => assert!(e.message.contains("block 9")),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn mining_commands_reach_every_node() {
        let (dispatcher, nulls) = dispatcher();
        let reply = dispatcher.handle(ClientMessage::ToggleMining { start: true }).await;
        assert_eq!(reply, ServerMessage::ToggleMining(vec![true, true]));
        assert!(nulls.iter().all(|n| n.is_mining()));
        assert_eq!(
            dispatcher.handle(ClientMessage::GetMiningStatus).await,
            ServerMessage::GetMiningStatus(vec![true, true])
        );
    }
}
