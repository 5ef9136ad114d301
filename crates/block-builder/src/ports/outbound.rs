//! Outbound ports (driven side - SPI)
//!
//! The execution engine, the callbacks it invokes during block assembly,
//! and the key-value store.

use crate::config::Genesis;
use crate::domain::{EthBlock, EthHeader, EthTransaction, MinedBlockEvent};
use crate::error::Result;
use async_trait::async_trait;
use atomic_tx::StateDb;
use shared_types::Hash;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Port: the EVM execution engine
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Number of ordinary transactions waiting in the pool
    fn pending_size(&self) -> Result<usize>;

    /// Look up a block the engine has built or verified
    fn block_by_hash(&self, hash: &Hash) -> Option<EthBlock>;

    /// Genesis block
    fn genesis_block(&self) -> EthBlock;

    /// World state after `block`
    fn block_state(&self, block: &EthBlock) -> Result<Box<dyn StateDb>>;

    /// Make `hash` the block new blocks build on
    fn set_tail(&self, hash: &Hash) -> Result<()>;

    /// Feed of blocks the pool has absorbed
    fn subscribe_mined_blocks(&self) -> broadcast::Receiver<MinedBlockEvent>;

    /// Feed of ordinary transaction submissions
    fn subscribe_submitted_txs(&self) -> broadcast::Receiver<()>;

    /// Assemble and seal one block, invoking the hooks in order
    async fn gen_block(&self) -> Result<()>;

    /// Re-execute a block received from the network
    async fn verify_block(&self, block: &EthBlock) -> Result<()>;

    /// Stop background work
    fn stop(&self);
}

/// Port: constructs the execution engine with its assembly hooks
pub trait EngineFactory: Send + Sync {
    /// Create an engine for `genesis` that calls back into `hooks`
    fn create(
        &self,
        genesis: &Genesis,
        hooks: Arc<dyn BlockAssemblyHooks>,
    ) -> Result<Arc<dyn ExecutionEngine>>;
}

/// Capability interface the execution engine calls during block assembly,
/// sealing and replay.
///
/// Order within one build: `on_header_new`, `on_finalize_and_assemble`,
/// `on_seal_finish`.
pub trait BlockAssemblyHooks: Send + Sync {
    /// Decorate a new header
    fn on_header_new(&self, header: &mut EthHeader);

    /// Finish the body of the block `header` opens; returns the extra-data bytes
    fn on_finalize_and_assemble(
        &self,
        header: &EthHeader,
        state: &mut dyn StateDb,
        txs: &[EthTransaction],
    ) -> Result<Vec<u8>>;

    /// The block has been sealed
    fn on_seal_finish(&self, block: &EthBlock) -> Result<()>;

    /// Last accepted block
    fn on_query_accepted(&self) -> Result<EthBlock>;

    /// Apply a block's extra-data state changes during verification or replay
    fn on_extra_state_change(&self, block: &EthBlock, state: &mut dyn StateDb) -> Result<()>;
}

/// Port: versioned key-value storage
pub trait KeyValueStore: Send + Sync {
    /// Read a key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a key
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
}
