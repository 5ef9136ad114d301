//! Accepted-chain bookkeeping
//!
//! Tracks the last accepted block, persists it and accepted atomic
//! transactions, and remembers consensus decisions for recent blocks.
//!
//! Verified blocks that consensus has not decided yet are tracked with the
//! peer-chain UTXOs their atomic transaction consumes. Shared memory only
//! changes on accept, so a descendant spending one of those UTXOs again is
//! caught here.

use crate::domain::{BlockStatus, EthBlock};
use crate::error::{Result, VmError};
use crate::metrics::VmMetrics;
use crate::ports::{ExecutionEngine, KeyValueStore};
use atomic_tx::{decode_tx, AtomicContext, SharedMemory, Tx, UtxoId};
use parking_lot::{Mutex, RwLock};
use shared_types::{Hash, Id};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{info, warn};

/// Key holding the hash of the last accepted block
pub const LAST_ACCEPTED_KEY: &[u8] = b"snowman_lastAccepted";

/// Prefix of keys holding accepted atomic transactions
pub const ATOMIC_TX_PREFIX: &[u8] = b"atomicTx";

/// Bounded map of recent consensus decisions, oldest evicted first
struct DecisionCache {
    order: VecDeque<Hash>,
    statuses: HashMap<Hash, BlockStatus>,
    capacity: usize,
}

impl DecisionCache {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            statuses: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, hash: &Hash) -> Option<BlockStatus> {
        self.statuses.get(hash).copied()
    }

    fn insert(&mut self, hash: Hash, status: BlockStatus) {
        if self.statuses.insert(hash, status).is_none() {
            self.order.push_back(hash);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.statuses.remove(&evicted);
            }
        }
    }
}

/// Atomic inputs of a verified, undecided block
struct ProcessingBlock {
    parent: Hash,
    height: u64,
    inputs: HashSet<UtxoId>,
}

/// State shared by every block handle
pub struct ChainState {
    atomic_ctx: AtomicContext,
    shared_memory: Arc<dyn SharedMemory>,
    db: Arc<dyn KeyValueStore>,
    genesis_hash: Hash,
    last_accepted: RwLock<EthBlock>,
    decisions: Mutex<DecisionCache>,
    processing: Mutex<HashMap<Hash, ProcessingBlock>>,
    metrics: Arc<VmMetrics>,
}

impl ChainState {
    /// Load the last accepted block from `db`, falling back to genesis
    pub fn load(
        atomic_ctx: AtomicContext,
        shared_memory: Arc<dyn SharedMemory>,
        db: Arc<dyn KeyValueStore>,
        engine: &dyn ExecutionEngine,
        cache_size: usize,
        metrics: Arc<VmMetrics>,
    ) -> Result<Self> {
        let genesis = engine.genesis_block();
        let genesis_hash = genesis.hash();

        let last_accepted = match db.get(LAST_ACCEPTED_KEY)? {
            Some(bytes) => {
                let hash: Hash = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| VmError::Storage("malformed last accepted hash".into()))?;
                match engine.block_by_hash(&hash) {
                    Some(block) => block,
                    None => {
                        warn!(
                            "[evm] Persisted last accepted block {} unknown to engine, using genesis",
                            Id(hash)
                        );
                        genesis
                    }
                }
            }
            None => genesis,
        };

        info!(
            "[evm] Last accepted block #{} ({})",
            last_accepted.number(),
            Id(last_accepted.hash())
        );

        Ok(Self::with_last_accepted(
            atomic_ctx,
            shared_memory,
            db,
            genesis_hash,
            last_accepted,
            cache_size,
            metrics,
        ))
    }

    pub(crate) fn with_last_accepted(
        atomic_ctx: AtomicContext,
        shared_memory: Arc<dyn SharedMemory>,
        db: Arc<dyn KeyValueStore>,
        genesis_hash: Hash,
        last_accepted: EthBlock,
        cache_size: usize,
        metrics: Arc<VmMetrics>,
    ) -> Self {
        let mut decisions = DecisionCache::new(cache_size);
        decisions.insert(last_accepted.hash(), BlockStatus::Accepted);

        Self {
            atomic_ctx,
            shared_memory,
            db,
            genesis_hash,
            last_accepted: RwLock::new(last_accepted),
            decisions: Mutex::new(decisions),
            processing: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Atomic transaction context of this chain
    pub fn atomic_ctx(&self) -> &AtomicContext {
        &self.atomic_ctx
    }

    /// UTXO exchange with the peer chain
    pub fn shared_memory(&self) -> &dyn SharedMemory {
        self.shared_memory.as_ref()
    }

    /// Hash of the genesis block
    pub fn genesis_hash(&self) -> Hash {
        self.genesis_hash
    }

    /// Last accepted block
    pub fn last_accepted(&self) -> EthBlock {
        self.last_accepted.read().clone()
    }

    /// Hash of the last accepted block
    pub fn last_accepted_hash(&self) -> Hash {
        self.last_accepted.read().hash()
    }

    /// Record and persist a newly accepted block.
    ///
    /// Processing blocks at or below its height can no longer extend the
    /// accepted chain and stop being tracked.
    pub fn set_last_accepted(&self, block: EthBlock) -> Result<()> {
        let hash = block.hash();
        let height = block.number();
        self.db.put(LAST_ACCEPTED_KEY, &hash)?;
        *self.last_accepted.write() = block;
        self.set_status(hash, BlockStatus::Accepted);
        self.processing.lock().retain(|_, b| b.height > height);
        Ok(())
    }

    /// Track a verified block that consensus has not decided yet
    pub fn track_processing(&self, block: &EthBlock, inputs: Vec<UtxoId>) {
        self.processing.lock().insert(
            block.hash(),
            ProcessingBlock {
                parent: block.parent_hash(),
                height: block.number(),
                inputs: inputs.into_iter().collect(),
            },
        );
    }

    /// Stop tracking a rejected block
    pub fn untrack_processing(&self, hash: &Hash) {
        self.processing.lock().remove(hash);
    }

    /// First of `inputs` already consumed by `parent` or one of its
    /// undecided ancestors
    pub fn conflicting_input(&self, parent: &Hash, inputs: &[UtxoId]) -> Option<UtxoId> {
        if inputs.is_empty() {
            return None;
        }
        let accepted = self.last_accepted_hash();
        let processing = self.processing.lock();
        let mut cursor = *parent;
        while cursor != accepted {
            let Some(block) = processing.get(&cursor) else {
                break;
            };
            if let Some(spent) = inputs.iter().find(|i| block.inputs.contains(i)) {
                return Some(*spent);
            }
            cursor = block.parent;
        }
        None
    }

    /// Consensus decision for `hash`, `Processing` if none is remembered
    pub fn status(&self, hash: &Hash) -> BlockStatus {
        self.decisions.lock().get(hash).unwrap_or(BlockStatus::Processing)
    }

    /// Remember a consensus decision
    pub fn set_status(&self, hash: Hash, status: BlockStatus) {
        self.decisions.lock().insert(hash, status);
    }

    /// Persist an accepted atomic transaction
    pub fn put_atomic_tx(&self, tx: &Tx) -> Result<()> {
        self.db.put(&atomic_tx_key(&tx.id()), tx.bytes())
    }

    /// Look up an accepted atomic transaction
    pub fn get_accepted_atomic_tx(&self, id: &Id) -> Result<Option<Tx>> {
        match self.db.get(&atomic_tx_key(id))? {
            Some(bytes) => Ok(Some(decode_tx(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Counters
    pub fn metrics(&self) -> &VmMetrics {
        &self.metrics
    }
}

fn atomic_tx_key(id: &Id) -> Vec<u8> {
    let mut key = Vec::with_capacity(ATOMIC_TX_PREFIX.len() + 32);
    key.extend_from_slice(ATOMIC_TX_PREFIX);
    key.extend_from_slice(id.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryDatabase;
    use crate::domain::EthHeader;
    use atomic_tx::{MemorySharedMemory, DEFAULT_TX_FEE};

    fn block(parent: Option<&EthBlock>, tag: u8) -> EthBlock {
        EthBlock {
            header: EthHeader {
                parent_hash: parent.map(EthBlock::hash).unwrap_or([0; 32]),
                number: parent.map(|p| p.number() + 1).unwrap_or(0),
                timestamp: 0,
                coinbase: [0; 20],
                extra: vec![tag],
            },
            transactions: vec![],
            ext_data: vec![],
        }
    }

    fn chain(genesis: &EthBlock) -> ChainState {
        let ctx = AtomicContext {
            network_id: 1,
            chain_id: Id([1; 32]),
            peer_chain_id: Id([2; 32]),
            native_asset_id: Id([3; 32]),
            tx_fee: DEFAULT_TX_FEE,
        };
        ChainState::with_last_accepted(
            ctx,
            Arc::new(MemorySharedMemory::new()),
            Arc::new(MemoryDatabase::new()),
            genesis.hash(),
            genesis.clone(),
            16,
            Arc::new(VmMetrics::new()),
        )
    }

    fn utxo(index: u32) -> UtxoId {
        UtxoId {
            tx_id: Id([7; 32]),
            output_index: index,
        }
    }

    #[test]
    fn test_conflict_found_through_undecided_ancestors() {
        let genesis = block(None, 0);
        let chain = chain(&genesis);
        let b1 = block(Some(&genesis), 1);
        let b2 = block(Some(&b1), 2);
        chain.track_processing(&b1, vec![utxo(0)]);
        chain.track_processing(&b2, vec![]);

        assert_eq!(chain.conflicting_input(&b2.hash(), &[utxo(1), utxo(0)]), Some(utxo(0)));
        assert_eq!(chain.conflicting_input(&b2.hash(), &[utxo(1)]), None);
        // A sibling of b1 builds on genesis and sees no conflict
        assert_eq!(chain.conflicting_input(&genesis.hash(), &[utxo(0)]), None);
    }

    #[test]
    fn test_accept_and_reject_stop_tracking() {
        let genesis = block(None, 0);
        let chain = chain(&genesis);
        let b1 = block(Some(&genesis), 1);
        let sibling = block(Some(&genesis), 9);
        chain.track_processing(&b1, vec![utxo(0)]);
        chain.track_processing(&sibling, vec![utxo(1)]);

        chain.untrack_processing(&sibling.hash());
        assert_eq!(chain.conflicting_input(&sibling.hash(), &[utxo(1)]), None);

        chain.set_last_accepted(b1.clone()).unwrap();
        assert_eq!(chain.conflicting_input(&b1.hash(), &[utxo(0)]), None);
        assert!(chain.processing.lock().is_empty());
    }

    #[test]
    fn test_decision_cache_evicts_oldest() {
        let mut cache = DecisionCache::new(2);
        cache.insert([1; 32], BlockStatus::Accepted);
        cache.insert([2; 32], BlockStatus::Rejected);
        cache.insert([3; 32], BlockStatus::Accepted);

        assert_eq!(cache.get(&[1; 32]), None);
        assert_eq!(cache.get(&[2; 32]), Some(BlockStatus::Rejected));
        assert_eq!(cache.get(&[3; 32]), Some(BlockStatus::Accepted));
    }

    #[test]
    fn test_decision_cache_update_keeps_slot() {
        let mut cache = DecisionCache::new(2);
        cache.insert([1; 32], BlockStatus::Processing);
        cache.insert([1; 32], BlockStatus::Accepted);
        cache.insert([2; 32], BlockStatus::Accepted);
        assert_eq!(cache.get(&[1; 32]), Some(BlockStatus::Accepted));
    }

    #[test]
    fn test_atomic_tx_key_layout() {
        let key = atomic_tx_key(&Id([7; 32]));
        assert!(key.starts_with(b"atomicTx"));
        assert_eq!(&key[8..], &[7u8; 32]);
    }
}
