//! # Block Builder
//!
//! **Bounded Context:** Block production for an EVM chain driven by an
//! external consensus engine
//! **Architecture:** Hexagonal (domain / ports / adapters) + background tasks
//!
//! ## Purpose
//!
//! - Decide *when* to ask consensus for a block (Min/Max/Long scheduler)
//! - Queue atomic transactions and embed at most one per block
//! - Wait until the execution engine's pool has absorbed a freshly built
//!   block before returning it
//! - Hook into the execution engine's assembly, sealing and replay
//!
//! ## Control Flow
//!
//! ```text
//! tx / atomic tx / timer ──► scheduler ──► ConsensusMessage::PendingTxs
//!                                                 │
//! consensus ──► build_block ──► ExecutionEngine::gen_block
//!                                   │  on_header_new
//!                                   │  on_finalize_and_assemble  (drain one atomic tx)
//!                                   │  on_seal_finish            (verify, publish)
//!                                   ▼
//!               new-block channel ──► stabilizer wait ──► Block
//! ```
//!
//! ## Critical Invariants
//!
//! 1. **One atomic tx per block**: at most one atomic tx in each assembled block
//! 2. **Minimum interval**: no proposal until the min timer fires after a build
//! 3. **No hang on failure**: every build attempt publishes a block or `None`
//! 4. **No stale stabilization**: the expected head is compared and cleared atomically
//! 5. **Burn coinbase**: every non-genesis block pays the burn address
//! 6. **No undecided double spend**: a UTXO is spent by at most one block on any
//!    undecided branch
//!
//! ## Module Structure
//!
//! - [`domain`]: block entities, scheduler state machine
//! - [`ports`]: consensus contract (inbound), execution engine and storage (outbound)
//! - [`adapters`]: in-memory engine and database, block delay timer
//! - [`service`]: `EvmChainVm`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod block;
pub mod chain_state;
pub mod coordinator;
pub mod domain;
pub mod ports;
pub mod queue;
pub mod service;
pub mod stabilizer;

mod config;
mod error;
mod metrics;

pub use config::{ChainConfig, Genesis, GenesisAccount, VmConfig, VmContext};
pub use error::{Result, VmError};
pub use metrics::VmMetrics;

// Re-export commonly used types
pub use adapters::{BlockDelayTimer, MemoryDatabase, MemoryEngineFactory, MemoryExecutionEngine};
pub use block::Block;
pub use chain_state::ChainState;
pub use coordinator::AssemblyCoordinator;
pub use domain::{
    BlockStatus, ConsensusMessage, EthBlock, EthHeader, EthTransaction, MinedBlockEvent,
    ProposalDecision, SchedulerState, TimerState, BURN_ADDRESS,
};
pub use ports::{BlockAssemblyHooks, ChainVm, EngineFactory, ExecutionEngine, KeyValueStore};
pub use queue::AtomicTxQueue;
pub use service::EvmChainVm;
pub use stabilizer::PoolStabilizer;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
