//! Consensus-facing block handle
//!
//! Wraps an execution engine block with its identifier and the chain
//! bookkeeping needed to verify, accept and reject it.

use crate::chain_state::ChainState;
use crate::domain::{BlockStatus, EthBlock, BURN_ADDRESS};
use crate::error::{Result, VmError};
use atomic_tx::{atomic_requests, decode_tx, semantic_verify, Tx};
use shared_types::Id;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A block as seen by consensus
#[derive(Clone)]
pub struct Block {
    id: Id,
    eth: EthBlock,
    chain: Arc<ChainState>,
}

impl Block {
    /// Wrap an execution engine block
    pub fn new(eth: EthBlock, chain: Arc<ChainState>) -> Self {
        Self {
            id: Id(eth.hash()),
            eth,
            chain,
        }
    }

    /// Block identifier (the block hash)
    pub fn id(&self) -> Id {
        self.id
    }

    /// Underlying execution engine block
    pub fn eth_block(&self) -> &EthBlock {
        &self.eth
    }

    /// Parent identifier
    pub fn parent(&self) -> Id {
        Id(self.eth.parent_hash())
    }

    /// Block number
    pub fn height(&self) -> u64 {
        self.eth.number()
    }

    /// Header timestamp (seconds)
    pub fn timestamp(&self) -> u64 {
        self.eth.header.timestamp
    }

    /// Wire encoding
    pub fn bytes(&self) -> Result<Vec<u8>> {
        self.eth.encode()
    }

    /// The atomic transaction carried in extra data, if any
    pub fn atomic_tx(&self) -> Result<Option<Tx>> {
        extract_atomic_tx(&self.eth)
    }

    /// Consensus status
    pub fn status(&self) -> BlockStatus {
        self.chain.status(&self.id.0)
    }

    /// Check the rules this VM adds on top of execution.
    ///
    /// Non-genesis blocks must pay the burn address. An embedded atomic
    /// transaction must pass full verification at the block's timestamp and
    /// must not spend a UTXO an undecided ancestor already spends. A block
    /// that passes and is still undecided is tracked for its descendants.
    pub fn verify(&self) -> Result<()> {
        if self.id.0 == self.chain.genesis_hash() {
            return Ok(());
        }
        if self.eth.header.coinbase != BURN_ADDRESS {
            return Err(VmError::InvalidBlock("invalid coinbase".into()));
        }
        let mut inputs = Vec::new();
        if let Some(tx) = self.atomic_tx()? {
            semantic_verify(
                &tx,
                self.chain.atomic_ctx(),
                self.chain.shared_memory(),
                self.timestamp(),
            )?;
            inputs = tx.unsigned.input_utxos();
            if let Some(spent) = self.chain.conflicting_input(&self.eth.parent_hash(), &inputs) {
                return Err(VmError::conflicting_input(spent));
            }
        }
        if self.status() == BlockStatus::Processing {
            self.chain.track_processing(&self.eth, inputs);
        }
        debug!("[evm] Verified block #{} ({})", self.height(), self.id);
        Ok(())
    }

    /// Commit the block: apply its shared-memory effects, persist its atomic
    /// transaction and make it the last accepted block.
    ///
    /// Shared memory is applied all-or-nothing before anything is written,
    /// so a failed accept leaves no trace.
    pub fn accept(&self) -> Result<()> {
        match self.status() {
            BlockStatus::Accepted => return Ok(()),
            BlockStatus::Rejected => {
                return Err(VmError::InvalidBlock("block already rejected".into()))
            }
            BlockStatus::Processing => {}
        }
        if self.eth.parent_hash() != self.chain.last_accepted_hash() {
            return Err(VmError::InvalidBlock(
                "parent is not the last accepted block".into(),
            ));
        }

        if let Some(tx) = self.atomic_tx()? {
            self.chain
                .shared_memory()
                .apply(vec![atomic_requests(&tx)])?;
            self.chain.put_atomic_tx(&tx)?;
            info!(
                "[evm] Accepted atomic {} tx {} in block #{}",
                tx.unsigned.kind(),
                tx.id(),
                self.height()
            );
        }

        self.chain.set_last_accepted(self.eth.clone())?;
        self.chain.metrics().record_decision(true);
        info!("[evm] Accepted block #{} ({})", self.height(), self.id);
        Ok(())
    }

    /// Mark the block rejected
    pub fn reject(&self) -> Result<()> {
        if self.status() == BlockStatus::Accepted {
            return Err(VmError::InvalidBlock("block already accepted".into()));
        }
        self.chain.set_status(self.id.0, BlockStatus::Rejected);
        self.chain.untrack_processing(&self.id.0);
        self.chain.metrics().record_decision(false);
        info!("[evm] Rejected block #{} ({})", self.height(), self.id);
        Ok(())
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("height", &self.height())
            .field("txs", &self.eth.transactions.len())
            .field("atomic", &!self.eth.ext_data.is_empty())
            .finish()
    }
}

/// Decode the atomic transaction in `block`'s extra data, if any
pub(crate) fn extract_atomic_tx(block: &EthBlock) -> Result<Option<Tx>> {
    if block.ext_data.is_empty() {
        return Ok(None);
    }
    decode_tx(&block.ext_data)
        .map(Some)
        .map_err(|e| VmError::InvalidBlock(format!("bad atomic tx in extra data: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryDatabase;
    use crate::domain::EthHeader;
    use crate::metrics::VmMetrics;
    use crate::ports::KeyValueStore;
    use atomic_tx::{
        address_of, new_export_tx, new_import_tx, short_id_of, AtomicContext, AtomicRequests,
        AtomicTxError, ExportRequest, MemorySharedMemory, MemoryState, SharedMemory, SigningKey,
        TransferOutput, Utxo, UtxoId, DEFAULT_TX_FEE, X2C_RATE,
    };
    use shared_types::{ShortId, U256};

    fn ctx() -> AtomicContext {
        AtomicContext {
            network_id: 12345,
            chain_id: Id([1; 32]),
            peer_chain_id: Id([2; 32]),
            native_asset_id: Id([3; 32]),
            tx_fee: DEFAULT_TX_FEE,
        }
    }

    fn genesis() -> EthBlock {
        EthBlock {
            header: EthHeader {
                parent_hash: [0; 32],
                number: 0,
                timestamp: 0,
                coinbase: [0; 20],
                extra: vec![],
            },
            transactions: vec![],
            ext_data: vec![],
        }
    }

    struct Fixture {
        chain: Arc<ChainState>,
        db: Arc<MemoryDatabase>,
        shared_memory: Arc<MemorySharedMemory>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(MemoryDatabase::new());
        let shared_memory = Arc::new(MemorySharedMemory::new());
        let genesis = genesis();
        let chain = Arc::new(ChainState::with_last_accepted(
            ctx(),
            shared_memory.clone(),
            db.clone(),
            genesis.hash(),
            genesis,
            16,
            Arc::new(VmMetrics::new()),
        ));
        Fixture {
            chain,
            db,
            shared_memory,
        }
    }

    fn export_tx() -> Tx {
        let key = SigningKey::from_slice(&[5; 32]).unwrap();
        let addr = address_of(key.verifying_key());
        let state = MemoryState::new().with_balance(addr, U256::from(10 * DEFAULT_TX_FEE) * X2C_RATE);
        let request = ExportRequest {
            asset_id: Id([3; 32]),
            amount: DEFAULT_TX_FEE,
            destination_chain: Id([2; 32]),
            to: ShortId([9; 20]),
        };
        new_export_tx(&state, &MemorySharedMemory::new(), &ctx(), &request, &[key], 0).unwrap()
    }

    /// Seed one native UTXO owned by `key` and build two imports of it
    fn double_import(f: &Fixture, key: &SigningKey) -> (Tx, Tx) {
        f.shared_memory.insert_inbound(
            Id([2; 32]),
            Utxo {
                utxo_id: UtxoId {
                    tx_id: Id([7; 32]),
                    output_index: 0,
                },
                asset_id: Id([3; 32]),
                out: TransferOutput {
                    amount: 5 * DEFAULT_TX_FEE,
                    locktime: 0,
                    threshold: 1,
                    addrs: vec![short_id_of(key)],
                },
            },
        );
        let import_to = |to| {
            new_import_tx(f.shared_memory.as_ref(), &ctx(), Id([2; 32]), to, &[key.clone()], 16, 0)
                .unwrap()
        };
        (import_to([0xc; 20]), import_to([0xd; 20]))
    }

    fn child(parent: &EthBlock, ext_data: Vec<u8>) -> EthBlock {
        EthBlock {
            header: EthHeader {
                parent_hash: parent.hash(),
                number: parent.number() + 1,
                timestamp: 10,
                coinbase: BURN_ADDRESS,
                extra: vec![1; 32],
            },
            transactions: vec![],
            ext_data,
        }
    }

    #[test]
    fn test_verify_rejects_wrong_coinbase() {
        let f = fixture();
        let mut eth = child(&f.chain.last_accepted(), vec![]);
        eth.header.coinbase = [2; 20];
        let block = Block::new(eth, f.chain.clone());
        assert!(matches!(block.verify(), Err(VmError::InvalidBlock(_))));
    }

    #[test]
    fn test_verify_rejects_undecodable_ext_data() {
        let f = fixture();
        let block = Block::new(child(&f.chain.last_accepted(), vec![0, 0, 1, 2, 3]), f.chain.clone());
        assert!(matches!(block.verify(), Err(VmError::InvalidBlock(_))));
    }

    #[test]
    fn test_verify_genesis_skips_coinbase() {
        let f = fixture();
        let block = Block::new(f.chain.last_accepted(), f.chain.clone());
        block.verify().unwrap();
        assert_eq!(block.status(), BlockStatus::Accepted);
    }

    #[test]
    fn test_accept_export_persists_and_puts_utxo() {
        let f = fixture();
        let tx = export_tx();
        let block = Block::new(child(&f.chain.last_accepted(), tx.bytes().to_vec()), f.chain.clone());
        block.verify().unwrap();
        block.accept().unwrap();

        assert_eq!(block.status(), BlockStatus::Accepted);
        assert_eq!(f.chain.last_accepted_hash(), block.id().0);
        assert_eq!(f.chain.get_accepted_atomic_tx(&tx.id()).unwrap(), Some(tx.clone()));
        assert_eq!(
            f.db.get(crate::chain_state::LAST_ACCEPTED_KEY).unwrap(),
            Some(block.id().0.to_vec())
        );

        let outbound = f.shared_memory.outbound(&Id([2; 32]));
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].utxo_id.tx_id, tx.id());
        assert_eq!(f.chain.metrics().get_blocks_accepted(), 1);
    }

    #[test]
    fn test_verify_rejects_input_spent_by_undecided_ancestor() {
        let f = fixture();
        let key = SigningKey::from_slice(&[6; 32]).unwrap();
        let (to_carol, to_dave) = double_import(&f, &key);
        assert_ne!(to_carol.id(), to_dave.id());

        let genesis = f.chain.last_accepted();
        let b1 = Block::new(child(&genesis, to_carol.bytes().to_vec()), f.chain.clone());
        b1.verify().unwrap();

        // Shared memory still holds the UTXO; only b1's tracking catches the reuse
        let b2 = Block::new(child(b1.eth_block(), to_dave.bytes().to_vec()), f.chain.clone());
        assert!(matches!(
            b2.verify(),
            Err(VmError::ConflictingAtomicInputs { output_index: 0, .. })
        ));

        // A competing sibling of b1 may spend it
        let sibling = Block::new(child(&genesis, to_dave.bytes().to_vec()), f.chain.clone());
        sibling.verify().unwrap();
    }

    #[test]
    fn test_failed_accept_writes_nothing() {
        let f = fixture();
        let key = SigningKey::from_slice(&[6; 32]).unwrap();
        let (import, _) = double_import(&f, &key);
        let genesis_hash = f.chain.last_accepted_hash();
        let block = Block::new(child(&f.chain.last_accepted(), import.bytes().to_vec()), f.chain.clone());
        block.verify().unwrap();

        // The UTXO disappears between verify and accept
        f.shared_memory
            .apply(vec![(
                Id([2; 32]),
                AtomicRequests {
                    remove: import.unsigned.input_utxos(),
                    put: vec![],
                },
            )])
            .unwrap();

        assert!(matches!(
            block.accept(),
            Err(VmError::Atomic(AtomicTxError::UtxoNotFound { .. }))
        ));
        assert_eq!(f.chain.get_accepted_atomic_tx(&import.id()).unwrap(), None);
        assert_eq!(f.chain.last_accepted_hash(), genesis_hash);
        assert_eq!(block.status(), BlockStatus::Processing);
        assert_eq!(f.chain.metrics().get_blocks_accepted(), 0);
    }

    #[test]
    fn test_accept_out_of_order_fails() {
        let f = fixture();
        let first = child(&f.chain.last_accepted(), vec![]);
        let second = Block::new(child(&first, vec![]), f.chain.clone());
        assert!(matches!(second.accept(), Err(VmError::InvalidBlock(_))));
    }

    #[test]
    fn test_reject_then_accept_fails() {
        let f = fixture();
        let block = Block::new(child(&f.chain.last_accepted(), vec![]), f.chain.clone());
        block.reject().unwrap();
        assert_eq!(block.status(), BlockStatus::Rejected);
        assert!(block.accept().is_err());
    }
}
