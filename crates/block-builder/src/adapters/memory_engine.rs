//! In-memory execution engine
//!
//! A deterministic value-transfer engine implementing `ExecutionEngine`.
//! It keeps every built or verified block with its post-state, a FIFO
//! pending pool, and broadcasts mined-block and submission events the way a
//! real transaction pool does.

use crate::config::Genesis;
use crate::domain::{unix_now, EthBlock, EthHeader, EthTransaction, MinedBlockEvent, BURN_ADDRESS};
use crate::error::{Result, VmError};
use crate::ports::{BlockAssemblyHooks, EngineFactory, ExecutionEngine};
use async_trait::async_trait;
use atomic_tx::{MemoryState, StateDb};
use parking_lot::{Mutex, RwLock};
use shared_types::{Hash, Id};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 64;

struct EngineState {
    blocks: HashMap<Hash, (EthBlock, MemoryState)>,
    pending: Vec<EthTransaction>,
    tail: Hash,
}

/// Value-transfer execution engine held in memory
pub struct MemoryExecutionEngine {
    hooks: Arc<dyn BlockAssemblyHooks>,
    genesis: EthBlock,
    state: RwLock<EngineState>,
    // Serializes block generation
    building: Mutex<()>,
    mined: broadcast::Sender<MinedBlockEvent>,
    submitted: broadcast::Sender<()>,
    stopped: AtomicBool,
}

impl MemoryExecutionEngine {
    /// Build the genesis block from `genesis` and start with it as tail
    pub fn new(genesis: &Genesis, hooks: Arc<dyn BlockAssemblyHooks>) -> Result<Self> {
        let mut state = MemoryState::new();
        for (address, account) in genesis.accounts()? {
            state.add_balance(&address, account.balance);
            state.set_nonce(&address, account.nonce);
        }
        let block = EthBlock {
            header: EthHeader {
                parent_hash: [0u8; 32],
                number: 0,
                timestamp: genesis.timestamp,
                coinbase: [0u8; 20],
                extra: Vec::new(),
            },
            transactions: Vec::new(),
            ext_data: Vec::new(),
        };
        let hash = block.hash();
        info!("[evm] Genesis block {}", Id(hash));

        let mut blocks = HashMap::new();
        blocks.insert(hash, (block.clone(), state));
        let (mined, _) = broadcast::channel(EVENT_CAPACITY);
        let (submitted, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            hooks,
            genesis: block,
            state: RwLock::new(EngineState {
                blocks,
                pending: Vec::new(),
                tail: hash,
            }),
            building: Mutex::new(()),
            mined,
            submitted,
            stopped: AtomicBool::new(false),
        })
    }

    /// Add an ordinary transaction to the pending pool
    pub fn submit_transaction(&self, tx: EthTransaction) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(VmError::Shutdown);
        }
        {
            let mut state = self.state.write();
            let hash = tx.hash();
            if state.pending.iter().any(|p| p.hash() == hash) {
                return Err(VmError::Engine("transaction already pending".into()));
            }
            state.pending.push(tx);
        }
        // No subscribers is not an error
        let _ = self.submitted.send(());
        Ok(())
    }

    /// Current tail hash
    pub fn tail(&self) -> Hash {
        self.state.read().tail
    }

    fn state_of(&self, hash: &Hash) -> Result<MemoryState> {
        self.state
            .read()
            .blocks
            .get(hash)
            .map(|(_, state)| state.clone())
            .ok_or(VmError::UnknownBlock)
    }

    /// Drop pending txs whose nonce the accepted state has already passed
    fn prune_stale(&self, accepted: &EthBlock) {
        let Ok(accepted_state) = self.state_of(&accepted.hash()) else {
            return;
        };
        let mut state = self.state.write();
        let before = state.pending.len();
        state
            .pending
            .retain(|tx| tx.nonce >= accepted_state.nonce(&tx.from));
        let dropped = before - state.pending.len();
        if dropped > 0 {
            debug!("[evm] Pruned {} stale pending txs", dropped);
        }
    }
}

/// Apply a value transfer if its nonce and balance allow it
fn execute(state: &mut MemoryState, tx: &EthTransaction) -> bool {
    if state.nonce(&tx.from) != tx.nonce || state.balance(&tx.from) < tx.value {
        return false;
    }
    let Some(next) = tx.nonce.checked_add(1) else {
        return false;
    };
    state.sub_balance(&tx.from, tx.value);
    state.add_balance(&tx.to, tx.value);
    state.set_nonce(&tx.from, next);
    true
}

#[async_trait]
impl ExecutionEngine for MemoryExecutionEngine {
    fn pending_size(&self) -> Result<usize> {
        Ok(self.state.read().pending.len())
    }

    fn block_by_hash(&self, hash: &Hash) -> Option<EthBlock> {
        self.state.read().blocks.get(hash).map(|(block, _)| block.clone())
    }

    fn genesis_block(&self) -> EthBlock {
        self.genesis.clone()
    }

    fn block_state(&self, block: &EthBlock) -> Result<Box<dyn StateDb>> {
        Ok(Box::new(self.state_of(&block.hash())?))
    }

    fn set_tail(&self, hash: &Hash) -> Result<()> {
        let mut state = self.state.write();
        if !state.blocks.contains_key(hash) {
            return Err(VmError::UnknownBlock);
        }
        state.tail = *hash;
        Ok(())
    }

    fn subscribe_mined_blocks(&self) -> broadcast::Receiver<MinedBlockEvent> {
        self.mined.subscribe()
    }

    fn subscribe_submitted_txs(&self) -> broadcast::Receiver<()> {
        self.submitted.subscribe()
    }

    async fn gen_block(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(VmError::Shutdown);
        }
        let _building = self.building.lock();

        let accepted = self.hooks.on_query_accepted()?;
        self.prune_stale(&accepted);

        let (parent, mut state, pending) = {
            let engine = self.state.read();
            let (parent, state) = engine.blocks.get(&engine.tail).ok_or(VmError::UnknownBlock)?;
            (parent.clone(), state.clone(), engine.pending.clone())
        };

        let mut header = EthHeader {
            parent_hash: parent.hash(),
            number: parent.number() + 1,
            timestamp: unix_now().max(parent.header.timestamp),
            coinbase: BURN_ADDRESS,
            extra: Vec::new(),
        };
        self.hooks.on_header_new(&mut header);

        let included: Vec<EthTransaction> = pending
            .into_iter()
            .filter(|tx| execute(&mut state, tx))
            .collect();

        let ext_data = self.hooks.on_finalize_and_assemble(&header, &mut state, &included)?;
        let block = EthBlock {
            header,
            transactions: included,
            ext_data,
        };
        self.hooks.on_seal_finish(&block)?;

        let hash = block.hash();
        let number = block.number();
        let tx_count = block.transactions.len();
        {
            let mut engine = self.state.write();
            let included: HashSet<Hash> = block.transactions.iter().map(|tx| tx.hash()).collect();
            engine.pending.retain(|tx| !included.contains(&tx.hash()));
            engine.blocks.insert(hash, (block, state));
        }
        debug!("[evm] Sealed block #{} with {} txs", number, tx_count);

        let _ = self.mined.send(MinedBlockEvent { hash });
        Ok(())
    }

    async fn verify_block(&self, block: &EthBlock) -> Result<()> {
        let hash = block.hash();
        if self.block_by_hash(&hash).is_some() {
            return Ok(());
        }
        let parent = self
            .block_by_hash(&block.parent_hash())
            .ok_or(VmError::UnknownBlock)?;
        if block.number() != parent.number() + 1 {
            return Err(VmError::InvalidBlock("non-sequential block number".into()));
        }
        if block.header.timestamp < parent.header.timestamp {
            return Err(VmError::InvalidBlock("timestamp before parent".into()));
        }

        let mut state = self.state_of(&parent.hash())?;
        for tx in &block.transactions {
            if !execute(&mut state, tx) {
                return Err(VmError::InvalidBlock(format!(
                    "transaction {} not executable",
                    Id(tx.hash())
                )));
            }
        }
        self.hooks.on_extra_state_change(block, &mut state)?;

        self.state.write().blocks.insert(hash, (block.clone(), state));
        debug!("[evm] Verified block #{} ({})", block.number(), Id(hash));
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

/// Factory creating a single `MemoryExecutionEngine` and keeping a handle to it
#[derive(Default)]
pub struct MemoryEngineFactory {
    engine: OnceLock<Arc<MemoryExecutionEngine>>,
}

impl MemoryEngineFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine, once created
    pub fn engine(&self) -> Option<Arc<MemoryExecutionEngine>> {
        self.engine.get().cloned()
    }
}

impl EngineFactory for MemoryEngineFactory {
    fn create(
        &self,
        genesis: &Genesis,
        hooks: Arc<dyn BlockAssemblyHooks>,
    ) -> Result<Arc<dyn ExecutionEngine>> {
        let engine = Arc::new(MemoryExecutionEngine::new(genesis, hooks)?);
        self.engine
            .set(Arc::clone(&engine))
            .map_err(|_| VmError::AlreadyInitialized)?;
        Ok(engine)
    }
}
