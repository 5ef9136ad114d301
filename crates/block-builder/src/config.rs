//! Configuration types for the chain VM

use crate::error::{Result, VmError};
use atomic_tx::{AtomicContext, SharedMemory};
use serde::Deserialize;
use shared_types::{parse_address, Address, Id, U256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Runtime configuration, parsed from the config bytes handed to `initialize`
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VmConfig {
    /// Hard floor between block proposals (milliseconds)
    pub min_block_time_ms: u64,

    /// After this long, a full batch is no longer required (milliseconds)
    pub max_block_time_ms: u64,

    /// Pending tx count that justifies a proposal between min and max block time
    pub batch_size: usize,

    /// Capacity of the atomic transaction queue
    pub atomic_queue_capacity: usize,

    /// Idle wake-up interval of the submission listener (milliseconds)
    pub idle_retry_interval_ms: u64,

    /// Fee per atomic transaction, in atomic units of the native asset
    pub tx_fee: u64,

    /// Number of decided block statuses kept in memory
    pub block_cache_size: usize,

    /// Upper bound for atomic UTXO queries
    pub max_utxos_to_fetch: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            min_block_time_ms: 250,
            max_block_time_ms: 1000,
            batch_size: 250,
            atomic_queue_capacity: 1024,
            idle_retry_interval_ms: 5000,
            tx_fee: atomic_tx::DEFAULT_TX_FEE,
            block_cache_size: 1024,
            max_utxos_to_fetch: 1024,
        }
    }
}

impl VmConfig {
    /// Parse from JSON; empty input yields the defaults
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let config: Self =
            serde_json::from_slice(bytes).map_err(|e| VmError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler and queue cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.atomic_queue_capacity == 0 {
            return Err(VmError::InvalidConfig("atomic_queue_capacity must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(VmError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.min_block_time_ms == 0 {
            return Err(VmError::InvalidConfig("min_block_time_ms must be > 0".into()));
        }
        if self.idle_retry_interval_ms == 0 {
            return Err(VmError::InvalidConfig("idle_retry_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Minimum block interval
    pub fn min_block_time(&self) -> Duration {
        Duration::from_millis(self.min_block_time_ms)
    }

    /// Maximum block interval
    pub fn max_block_time(&self) -> Duration {
        Duration::from_millis(self.max_block_time_ms)
    }

    /// Idle wake-up interval
    pub fn idle_retry_interval(&self) -> Duration {
        Duration::from_millis(self.idle_retry_interval_ms)
    }
}

/// Chain parameters from genesis
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// EVM chain id
    pub chain_id: u64,
}

/// Initial account allocation
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct GenesisAccount {
    /// Balance in 18-decimal units (hex string)
    pub balance: U256,
    /// Initial nonce
    #[serde(default)]
    pub nonce: u64,
}

/// Genesis document
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Genesis {
    /// Chain parameters
    pub config: ChainConfig,
    /// Funded accounts keyed by hex address
    #[serde(default)]
    pub alloc: BTreeMap<String, GenesisAccount>,
    /// Genesis timestamp (unix seconds)
    #[serde(default)]
    pub timestamp: u64,
}

impl Genesis {
    /// Parse genesis JSON; any failure is fatal to initialization
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let genesis: Self =
            serde_json::from_slice(bytes).map_err(|e| VmError::InvalidGenesis(e.to_string()))?;
        genesis.accounts()?;
        Ok(genesis)
    }

    /// Allocations with parsed addresses
    pub fn accounts(&self) -> Result<Vec<(Address, GenesisAccount)>> {
        self.alloc
            .iter()
            .map(|(addr, account)| {
                parse_address(addr)
                    .map(|a| (a, account.clone()))
                    .map_err(|e| VmError::InvalidGenesis(format!("alloc {}: {}", addr, e)))
            })
            .collect()
    }
}

/// Identity supplied by the consensus engine at initialization
#[derive(Clone)]
pub struct VmContext {
    /// Network this node runs on
    pub network_id: u32,
    /// This chain
    pub chain_id: Id,
    /// Chain atomic transfers go to and come from
    pub peer_chain_id: Id,
    /// Asset used for EVM balances and fees
    pub native_asset_id: Id,
    /// UTXO exchange with the peer chain
    pub shared_memory: Arc<dyn SharedMemory>,
}

impl VmContext {
    /// Atomic transaction context for this chain
    pub fn atomic_context(&self, tx_fee: u64) -> AtomicContext {
        AtomicContext {
            network_id: self.network_id,
            chain_id: self.chain_id,
            peer_chain_id: self.peer_chain_id,
            native_asset_id: self.native_asset_id,
            tx_fee,
        }
    }
}
