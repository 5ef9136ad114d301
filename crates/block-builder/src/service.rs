//! Chain VM Service
//!
//! Wires the scheduler, the atomic queue, the stabilizer and the assembly
//! coordinator around an execution engine and exposes the consensus
//! contract.
//!
//! ## Background tasks
//!
//! | Task | Wakes on | Does |
//! |------|----------|------|
//! | block delay timer | deadline | advances the scheduler, retries a proposal |
//! | pool stabilization listener | mined-block event | releases the builder's wait |
//! | submission listener | new tx, new atomic tx, idle interval | attempts a proposal |
//!
//! All three exit on shutdown, and `shutdown` waits for them.
//!
//! ## Locks
//!
//! The generation lock (async) is always taken before the scheduler lock
//! (sync). The scheduler lock is never held across an await.

use crate::adapters::BlockDelayTimer;
use crate::block::Block;
use crate::chain_state::ChainState;
use crate::config::{Genesis, VmConfig, VmContext};
use crate::coordinator::{AssemblyCoordinator, BuildOutcome};
use crate::domain::{
    unix_now, ConsensusMessage, EthBlock, MinedBlockEvent, ProposalDecision, SchedulerState,
};
use crate::error::{Result, VmError};
use crate::metrics::VmMetrics;
use crate::ports::{ChainVm, EngineFactory, ExecutionEngine, KeyValueStore};
use crate::queue::AtomicTxQueue;
use crate::stabilizer::PoolStabilizer;
use async_trait::async_trait;
use atomic_tx::{
    new_export_tx, new_import_tx, select_spendable_funds, semantic_verify, AtomicContext,
    AtomicTxError, ExportRequest, SelectedFunds, SigningKey, StateDb, Tx, UtxoCursor, UtxoPage,
};
use shared_types::{Address, Id, ShortId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Chain VM driven by a consensus engine
pub struct EvmChainVm {
    factory: Arc<dyn EngineFactory>,
    runtime: OnceLock<Arc<VmRuntime>>,
    metrics: Arc<VmMetrics>,
}

/// Everything that exists once the VM is initialized
struct VmRuntime {
    config: VmConfig,
    ctx: VmContext,
    atomic_ctx: AtomicContext,
    engine: Arc<dyn ExecutionEngine>,
    chain: Arc<ChainState>,
    queue: Arc<AtomicTxQueue>,
    stabilizer: Arc<PoolStabilizer>,
    scheduler: parking_lot::Mutex<SchedulerState>,
    gen_lock: AsyncMutex<()>,
    new_blocks: AsyncMutex<mpsc::UnboundedReceiver<BuildOutcome>>,
    to_engine: mpsc::Sender<ConsensusMessage>,
    timer: OnceLock<BlockDelayTimer>,
    shutdown_tx: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<VmMetrics>,
    bootstrapped: AtomicBool,
}

impl EvmChainVm {
    /// Create a VM that builds its execution engine with `factory`
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            runtime: OnceLock::new(),
            metrics: Arc::new(VmMetrics::new()),
        }
    }

    fn runtime(&self) -> Result<&Arc<VmRuntime>> {
        self.runtime.get().ok_or(VmError::NotInitialized)
    }

    /// Counters
    pub fn metrics(&self) -> &VmMetrics {
        &self.metrics
    }

    /// Consensus has finished bootstrapping
    pub fn is_bootstrapped(&self) -> bool {
        self.runtime
            .get()
            .map(|rt| rt.bootstrapped.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Atomic transactions waiting for a block
    pub fn pending_atomic_txs(&self) -> usize {
        self.runtime.get().map(|rt| rt.queue.len()).unwrap_or(0)
    }

    /// Verify an atomic transaction and queue it for the next block
    pub fn issue_tx(&self, tx: Tx) -> Result<Id> {
        let rt = self.runtime()?;
        let id = tx.id();
        semantic_verify(&tx, &rt.atomic_ctx, rt.ctx.shared_memory.as_ref(), unix_now())?;
        match rt.queue.submit(tx) {
            Ok(()) => {
                self.metrics.record_atomic_submission(true);
                info!("[evm] Issued atomic tx {}", id);
                Ok(id)
            }
            Err(e) => {
                self.metrics.record_atomic_submission(false);
                Err(e)
            }
        }
    }

    /// An accepted atomic transaction
    pub fn get_atomic_tx(&self, id: &Id) -> Result<Option<Tx>> {
        self.runtime()?.chain.get_accepted_atomic_tx(id)
    }

    /// One page of UTXOs on `source_chain` owned by any of `addrs`.
    ///
    /// Pages resume strictly after `start`; pass the returned `last` as the
    /// next `start`. A zero or oversized `limit` is clamped to the configured
    /// maximum.
    pub fn get_atomic_utxos(
        &self,
        source_chain: &Id,
        addrs: &[ShortId],
        start: Option<UtxoCursor>,
        limit: usize,
    ) -> Result<UtxoPage> {
        let rt = self.runtime()?;
        if *source_chain != rt.atomic_ctx.peer_chain_id {
            return Err(AtomicTxError::WrongChainId.into());
        }
        let max = rt.config.max_utxos_to_fetch;
        let limit = if limit == 0 || limit > max { max } else { limit };
        Ok(rt.ctx.shared_memory.indexed(source_chain, addrs, start, limit)?)
    }

    /// Select inputs covering `amount` of `asset_id` at the last accepted block
    pub fn get_spendable_funds(&self, keys: &[SigningKey], asset_id: &Id, amount: u64) -> Result<SelectedFunds> {
        let rt = self.runtime()?;
        let state = rt.accepted_state()?;
        Ok(select_spendable_funds(&*state, &rt.atomic_ctx, keys, asset_id, amount)?)
    }

    /// Nonce of `address` at the last accepted block
    pub fn get_accepted_nonce(&self, address: &Address) -> Result<u64> {
        Ok(self.runtime()?.accepted_state()?.nonce(address))
    }

    /// Build a signed export of `amount` of `asset_id` to `to` on `destination_chain`
    pub fn new_export_tx(
        &self,
        asset_id: Id,
        amount: u64,
        destination_chain: Id,
        to: ShortId,
        keys: &[SigningKey],
    ) -> Result<Tx> {
        let rt = self.runtime()?;
        let state = rt.accepted_state()?;
        let request = ExportRequest {
            asset_id,
            amount,
            destination_chain,
            to,
        };
        Ok(new_export_tx(
            &*state,
            rt.ctx.shared_memory.as_ref(),
            &rt.atomic_ctx,
            &request,
            keys,
            unix_now(),
        )?)
    }

    /// Build a signed import of every UTXO `keys` can spend on `source_chain`
    pub fn new_import_tx(&self, source_chain: Id, to: Address, keys: &[SigningKey]) -> Result<Tx> {
        let rt = self.runtime()?;
        Ok(new_import_tx(
            rt.ctx.shared_memory.as_ref(),
            &rt.atomic_ctx,
            source_chain,
            to,
            keys,
            rt.config.max_utxos_to_fetch,
            unix_now(),
        )?)
    }
}

impl VmRuntime {
    fn accepted_state(&self) -> Result<Box<dyn StateDb>> {
        self.engine.block_state(&self.chain.last_accepted())
    }

    fn arm_timer(&self) {
        if let Some(timer) = self.timer.get() {
            timer.arm(self.config.min_block_time());
        }
    }

    /// Ask consensus for a block if the scheduler allows it
    async fn try_block_gen(&self) -> Result<ProposalDecision> {
        let _gen = self.gen_lock.lock().await;
        let pending_txs = self.engine.pending_size()?;

        let mut scheduler = self.scheduler.lock();
        let decision = scheduler.attempt(pending_txs, self.queue.len(), self.config.batch_size);
        if decision != ProposalDecision::Propose {
            return Ok(decision);
        }
        match self.to_engine.try_send(ConsensusMessage::PendingTxs) {
            Ok(()) => {
                scheduler.proposal_sent();
                self.metrics.record_proposal(true);
                debug!("[evm] Requested block build ({} pending txs)", pending_txs);
                Ok(decision)
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.record_proposal(false);
                Err(VmError::BlockFrequency)
            }
            Err(TrySendError::Closed(_)) => Err(VmError::Shutdown),
        }
    }

    /// Proposal attempt whose failures are absorbed
    async fn propose(&self) {
        match self.try_block_gen().await {
            Ok(decision) => trace!("[evm] Proposal attempt: {:?}", decision),
            Err(e) if e.is_recoverable() => debug!("[evm] Proposal dropped: {}", e),
            Err(VmError::Shutdown) => {}
            Err(e) => warn!("[evm] Proposal attempt failed: {}", e),
        }
    }

    async fn on_timer_fired(&self) {
        let fired = self
            .scheduler
            .lock()
            .on_timer_fired(self.config.min_block_time(), self.config.max_block_time());
        if let (Some(after), Some(timer)) = (fired.rearm, self.timer.get()) {
            timer.arm(after);
        }
        if fired.retry {
            self.propose().await;
        }
    }

    async fn build(&self) -> Result<Block> {
        let outcome = {
            let _gen = self.gen_lock.lock().await;
            let mut new_blocks = self.new_blocks.lock().await;
            while let Ok(stale) = new_blocks.try_recv() {
                debug!("[evm] Discarding stale build outcome {:?}", stale.map(|b| b.id()));
            }
            match self.engine.gen_block().await {
                Ok(()) => match new_blocks.recv().await {
                    Some(Some(block)) => Ok(block),
                    Some(None) => Err(VmError::CreateBlock),
                    None => Err(VmError::Shutdown),
                },
                Err(e) => Err(e),
            }
        };

        self.scheduler.lock().on_block_built();
        self.arm_timer();
        self.metrics.record_build(outcome.is_ok());

        let block = match outcome {
            Ok(block) => block,
            Err(e) => {
                warn!("[evm] Block build failed: {}", e);
                return Err(e);
            }
        };

        let mut shutdown = self.shutdown_tx.subscribe();
        self.stabilizer.wait(&mut shutdown).await?;
        info!(
            "[evm] Built block #{} ({}) with {} txs{}",
            block.height(),
            block.id(),
            block.eth_block().transactions.len(),
            if block.eth_block().ext_data.is_empty() { "" } else { " and an atomic tx" }
        );
        Ok(block)
    }

    async fn await_pool_stabilized(
        self: Arc<Self>,
        mut mined: broadcast::Receiver<MinedBlockEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = mined.recv() => match event {
                    Ok(event) => {
                        self.stabilizer.on_mined(&event.hash);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("[evm] Mined-block listener skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => return,
                },
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn await_submitted_txs(
        self: Arc<Self>,
        mut submitted: broadcast::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let idle = self.config.idle_retry_interval();
        loop {
            tokio::select! {
                event = submitted.recv() => {
                    if let Err(RecvError::Closed) = event {
                        return;
                    }
                }
                _ = self.queue.work_available() => {}
                _ = tokio::time::sleep(idle) => {}
                _ = shutdown.changed() => return,
            }
            if *shutdown.borrow() {
                return;
            }
            self.propose().await;
        }
    }

    fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let (timer, timer_task) = BlockDelayTimer::spawn(
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(rt) = weak.upgrade() {
                        rt.on_timer_fired().await;
                    }
                }
            },
            self.shutdown_tx.subscribe(),
        );
        // Only set here, once per runtime
        let _ = self.timer.set(timer);

        let stabilized = tokio::spawn(
            Arc::clone(self)
                .await_pool_stabilized(self.engine.subscribe_mined_blocks(), self.shutdown_tx.subscribe()),
        );
        let submitted = tokio::spawn(
            Arc::clone(self)
                .await_submitted_txs(self.engine.subscribe_submitted_txs(), self.shutdown_tx.subscribe()),
        );
        *self.tasks.lock() = vec![timer_task, stabilized, submitted];
    }
}

#[async_trait]
impl ChainVm for EvmChainVm {
    #[tracing::instrument(skip_all, fields(chain = %ctx.chain_id))]
    async fn initialize(
        &self,
        ctx: VmContext,
        db: Arc<dyn KeyValueStore>,
        genesis_bytes: &[u8],
        config_bytes: &[u8],
        to_engine: mpsc::Sender<ConsensusMessage>,
    ) -> Result<()> {
        if self.runtime.get().is_some() {
            return Err(VmError::AlreadyInitialized);
        }
        let config = VmConfig::from_json(config_bytes)?;
        let genesis = Genesis::from_json(genesis_bytes)?;
        let atomic_ctx = ctx.atomic_context(config.tx_fee);

        let queue = Arc::new(AtomicTxQueue::new(config.atomic_queue_capacity));
        let stabilizer = Arc::new(PoolStabilizer::new());
        let (new_blocks_tx, new_blocks_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(AssemblyCoordinator::new(
            Arc::clone(&queue),
            Arc::clone(&stabilizer),
            atomic_ctx,
            new_blocks_tx,
        ));

        let engine = self.factory.create(&genesis, coordinator.clone())?;
        let chain = Arc::new(ChainState::load(
            atomic_ctx,
            Arc::clone(&ctx.shared_memory),
            db,
            engine.as_ref(),
            config.block_cache_size,
            Arc::clone(&self.metrics),
        )?);
        coordinator.attach_chain(Arc::clone(&chain))?;
        engine.set_tail(&chain.last_accepted_hash())?;

        let (shutdown_tx, _) = watch::channel(false);
        let runtime = Arc::new(VmRuntime {
            config,
            ctx,
            atomic_ctx,
            engine,
            chain,
            queue,
            stabilizer,
            scheduler: parking_lot::Mutex::new(SchedulerState::new()),
            gen_lock: AsyncMutex::new(()),
            new_blocks: AsyncMutex::new(new_blocks_rx),
            to_engine,
            timer: OnceLock::new(),
            shutdown_tx,
            tasks: parking_lot::Mutex::new(Vec::new()),
            metrics: Arc::clone(&self.metrics),
            bootstrapped: AtomicBool::new(false),
        });
        self.runtime
            .set(Arc::clone(&runtime))
            .map_err(|_| VmError::AlreadyInitialized)?;
        runtime.start();

        info!(
            "[evm] Initialized (min {:?}, max {:?}, batch {}, atomic queue {})",
            runtime.config.min_block_time(),
            runtime.config.max_block_time(),
            runtime.config.batch_size,
            runtime.queue.capacity()
        );
        Ok(())
    }

    async fn build_block(&self) -> Result<Block> {
        self.runtime()?.build().await
    }

    async fn parse_block(&self, bytes: &[u8]) -> Result<Block> {
        let rt = self.runtime()?;
        let eth = EthBlock::decode(bytes).map_err(|e| VmError::InvalidBlock(e.to_string()))?;
        let block = Block::new(eth, Arc::clone(&rt.chain));
        block.verify()?;
        rt.engine.verify_block(block.eth_block()).await?;
        debug!("[evm] Parsed block #{} ({})", block.height(), block.id());
        Ok(block)
    }

    async fn get_block(&self, id: &Id) -> Result<Block> {
        let rt = self.runtime()?;
        rt.engine
            .block_by_hash(&id.0)
            .map(|eth| Block::new(eth, Arc::clone(&rt.chain)))
            .ok_or(VmError::UnknownBlock)
    }

    async fn set_preference(&self, id: &Id) -> Result<()> {
        self.runtime()?.engine.set_tail(&id.0)
    }

    fn last_accepted(&self) -> Result<Id> {
        Ok(Id(self.runtime()?.chain.last_accepted_hash()))
    }

    async fn bootstrapping(&self) -> Result<()> {
        self.runtime()?.bootstrapped.store(false, Ordering::Release);
        info!("[evm] Bootstrapping");
        Ok(())
    }

    async fn bootstrapped(&self) -> Result<()> {
        self.runtime()?.bootstrapped.store(true, Ordering::Release);
        info!("[evm] Bootstrapped");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(rt) = self.runtime.get() else {
            return Ok(());
        };
        rt.shutdown_tx.send_replace(true);
        rt.engine.stop();

        let tasks = std::mem::take(&mut *rt.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("[evm] Background task ended abnormally: {}", e);
            }
        }
        info!("[evm] Shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryDatabase, MemoryEngineFactory};
    use atomic_tx::MemorySharedMemory;

    fn context() -> VmContext {
        VmContext {
            network_id: 12345,
            chain_id: Id([1; 32]),
            peer_chain_id: Id([2; 32]),
            native_asset_id: Id([3; 32]),
            shared_memory: Arc::new(MemorySharedMemory::new()),
        }
    }

    const GENESIS: &[u8] = br#"{"config":{"chainId":43112},"alloc":{}}"#;

    #[tokio::test]
    async fn test_calls_before_initialize_fail() {
        let vm = EvmChainVm::new(Arc::new(MemoryEngineFactory::new()));
        assert!(matches!(vm.build_block().await, Err(VmError::NotInitialized)));
        assert!(matches!(vm.last_accepted(), Err(VmError::NotInitialized)));
        vm.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_twice_fails() {
        let vm = EvmChainVm::new(Arc::new(MemoryEngineFactory::new()));
        let (tx, _rx) = mpsc::channel(1);
        vm.initialize(context(), Arc::new(MemoryDatabase::new()), GENESIS, b"", tx.clone())
            .await
            .unwrap();
        let again = vm
            .initialize(context(), Arc::new(MemoryDatabase::new()), GENESIS, b"", tx)
            .await;
        assert!(matches!(again, Err(VmError::AlreadyInitialized)));
        vm.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_genesis_is_critical() {
        let vm = EvmChainVm::new(Arc::new(MemoryEngineFactory::new()));
        let (tx, _rx) = mpsc::channel(1);
        let err = vm
            .initialize(context(), Arc::new(MemoryDatabase::new()), b"{", b"", tx)
            .await
            .unwrap_err();
        assert!(err.is_critical());
    }

    #[tokio::test]
    async fn test_utxo_limit_clamped() {
        let vm = EvmChainVm::new(Arc::new(MemoryEngineFactory::new()));
        let (tx, _rx) = mpsc::channel(1);
        vm.initialize(
            context(),
            Arc::new(MemoryDatabase::new()),
            GENESIS,
            br#"{"max_utxos_to_fetch": 2}"#,
            tx,
        )
        .await
        .unwrap();
        let page = vm.get_atomic_utxos(&Id([2; 32]), &[ShortId([1; 20])], None, 0).unwrap();
        assert!(page.utxos.is_empty());
        assert_eq!(page.last, UtxoCursor::default());
        assert!(vm.get_atomic_utxos(&Id([9; 32]), &[], None, 1).is_err());
        vm.shutdown().await.unwrap();
    }
}
