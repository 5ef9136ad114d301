//! Block Assembly Coordinator
//!
//! Implements the hooks the execution engine calls while assembling,
//! sealing and replaying blocks. Queued atomic transactions whose UTXOs an
//! undecided ancestor already spends are dropped during assembly. Every build attempt publishes exactly one
//! outcome on the new-block channel: the sealed block, or `None` when
//! assembly failed before sealing.

use crate::block::{extract_atomic_tx, Block};
use crate::chain_state::ChainState;
use crate::domain::{EthBlock, EthHeader, EthTransaction, HEADER_TAG_LEN};
use crate::error::{Result, VmError};
use crate::ports::BlockAssemblyHooks;
use crate::queue::AtomicTxQueue;
use crate::stabilizer::PoolStabilizer;
use atomic_tx::{apply_state_transfer, AtomicContext, StateDb};
use rand::RngCore;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Outcome of one build attempt
pub type BuildOutcome = Option<Block>;

/// Assembly hooks wired to the atomic queue, the stabilizer and the chain
pub struct AssemblyCoordinator {
    queue: Arc<AtomicTxQueue>,
    stabilizer: Arc<PoolStabilizer>,
    atomic_ctx: AtomicContext,
    new_blocks: mpsc::UnboundedSender<BuildOutcome>,
    chain: OnceLock<Arc<ChainState>>,
}

impl AssemblyCoordinator {
    /// Create the coordinator; the chain is attached once the engine exists
    pub fn new(
        queue: Arc<AtomicTxQueue>,
        stabilizer: Arc<PoolStabilizer>,
        atomic_ctx: AtomicContext,
        new_blocks: mpsc::UnboundedSender<BuildOutcome>,
    ) -> Self {
        Self {
            queue,
            stabilizer,
            atomic_ctx,
            new_blocks,
            chain: OnceLock::new(),
        }
    }

    /// Attach the chain state
    pub fn attach_chain(&self, chain: Arc<ChainState>) -> Result<()> {
        self.chain.set(chain).map_err(|_| VmError::AlreadyInitialized)
    }

    fn chain(&self) -> Result<&Arc<ChainState>> {
        self.chain.get().ok_or(VmError::NotInitialized)
    }

    fn publish(&self, outcome: BuildOutcome) {
        // A closed receiver means the VM is shutting down
        if self.new_blocks.send(outcome).is_err() {
            debug!("[evm] New block receiver closed");
        }
    }
}

impl BlockAssemblyHooks for AssemblyCoordinator {
    fn on_header_new(&self, header: &mut EthHeader) {
        let mut tag = [0u8; HEADER_TAG_LEN];
        rand::thread_rng().fill_bytes(&mut tag);
        header.extra.extend_from_slice(&tag);
    }

    fn on_finalize_and_assemble(
        &self,
        header: &EthHeader,
        state: &mut dyn StateDb,
        txs: &[EthTransaction],
    ) -> Result<Vec<u8>> {
        let chain = match self.chain() {
            Ok(chain) => chain,
            Err(e) => {
                self.publish(None);
                return Err(e);
            }
        };
        while let Some(tx) = self.queue.drain_one() {
            let inputs = tx.unsigned.input_utxos();
            if let Some(spent) = chain.conflicting_input(&header.parent_hash, &inputs) {
                warn!(
                    "[evm] Dropping atomic tx {}: utxo {}:{} already spent by a processing block",
                    tx.id(),
                    spent.tx_id,
                    spent.output_index
                );
                continue;
            }
            if let Err(e) = apply_state_transfer(&tx.unsigned, &self.atomic_ctx, state) {
                warn!("[evm] Dropping atomic tx {}: {}", tx.id(), e);
                self.publish(None);
                return Err(e.into());
            }
            debug!("[evm] Including atomic {} tx {}", tx.unsigned.kind(), tx.id());
            return Ok(tx.bytes().to_vec());
        }
        if txs.is_empty() {
            self.publish(None);
            return Err(VmError::EmptyBlock);
        }
        Ok(Vec::new())
    }

    fn on_seal_finish(&self, block: &EthBlock) -> Result<()> {
        let chain = match self.chain() {
            Ok(chain) => chain,
            Err(e) => {
                self.publish(None);
                return Err(e);
            }
        };
        let wrapped = Block::new(block.clone(), Arc::clone(chain));
        if let Err(e) = wrapped.verify() {
            error!("[evm] Sealed block #{} failed verification: {}", block.number(), e);
            self.publish(None);
            return Err(VmError::InvalidBlock(e.to_string()));
        }
        // The expected head must be set before the block is published
        self.stabilizer.expect(block.hash());
        self.publish(Some(wrapped));
        Ok(())
    }

    fn on_query_accepted(&self) -> Result<EthBlock> {
        Ok(self.chain()?.last_accepted())
    }

    fn on_extra_state_change(&self, block: &EthBlock, state: &mut dyn StateDb) -> Result<()> {
        match extract_atomic_tx(block)? {
            Some(tx) => Ok(apply_state_transfer(&tx.unsigned, &self.atomic_ctx, state)?),
            None => Ok(()),
        }
    }
}
