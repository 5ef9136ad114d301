//! Inbound ports (driving side - API)

use crate::block::Block;
use crate::config::VmContext;
use crate::domain::ConsensusMessage;
use crate::error::Result;
use crate::ports::KeyValueStore;
use async_trait::async_trait;
use shared_types::Id;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Primary port: the contract the consensus engine drives
#[async_trait]
pub trait ChainVm: Send + Sync {
    /// Bring up the chain from genesis or the persisted last accepted block
    async fn initialize(
        &self,
        ctx: VmContext,
        db: Arc<dyn KeyValueStore>,
        genesis_bytes: &[u8],
        config_bytes: &[u8],
        to_engine: mpsc::Sender<ConsensusMessage>,
    ) -> Result<()>;

    /// Build a block on the preferred tail
    async fn build_block(&self) -> Result<Block>;

    /// Parse and verify a block received from the network
    async fn parse_block(&self, bytes: &[u8]) -> Result<Block>;

    /// Look up a known block
    async fn get_block(&self, id: &Id) -> Result<Block>;

    /// Set the block new blocks build on
    async fn set_preference(&self, id: &Id) -> Result<()>;

    /// Id of the last accepted block
    fn last_accepted(&self) -> Result<Id>;

    /// Consensus started bootstrapping
    async fn bootstrapping(&self) -> Result<()>;

    /// Consensus finished bootstrapping
    async fn bootstrapped(&self) -> Result<()>;

    /// Stop background work and wait for it to exit
    async fn shutdown(&self) -> Result<()>;
}
