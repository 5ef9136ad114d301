//! In-memory world state
//!
//! Implements `StateDb` over hash maps. Cloning yields an independent
//! snapshot, which is how callers fork state per block.

use crate::ports::StateDb;
use shared_types::{Address, Id, U256};
use std::collections::HashMap;

/// Account balances and nonces held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    balances: HashMap<Address, U256>,
    multi_coin: HashMap<(Address, Id), U256>,
    nonces: HashMap<Address, u64>,
}

impl MemoryState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder helper: set a native balance.
    pub fn with_balance(mut self, address: Address, amount: U256) -> Self {
        self.balances.insert(address, amount);
        self
    }

    /// Builder helper: set a non-native balance.
    pub fn with_multi_coin_balance(mut self, address: Address, asset_id: Id, amount: U256) -> Self {
        self.multi_coin.insert((address, asset_id), amount);
        self
    }
}

impl StateDb for MemoryState {
    fn balance(&self, address: &Address) -> U256 {
        self.balances.get(address).copied().unwrap_or_default()
    }

    fn add_balance(&mut self, address: &Address, amount: U256) {
        let entry = self.balances.entry(*address).or_default();
        *entry = entry.saturating_add(amount);
    }

    fn sub_balance(&mut self, address: &Address, amount: U256) {
        let entry = self.balances.entry(*address).or_default();
        *entry = entry.saturating_sub(amount);
    }

    fn multi_coin_balance(&self, address: &Address, asset_id: &Id) -> U256 {
        self.multi_coin
            .get(&(*address, *asset_id))
            .copied()
            .unwrap_or_default()
    }

    fn add_multi_coin_balance(&mut self, address: &Address, asset_id: &Id, amount: U256) {
        let entry = self.multi_coin.entry((*address, *asset_id)).or_default();
        *entry = entry.saturating_add(amount);
    }

    fn sub_multi_coin_balance(&mut self, address: &Address, asset_id: &Id, amount: U256) {
        let entry = self.multi_coin.entry((*address, *asset_id)).or_default();
        *entry = entry.saturating_sub(amount);
    }

    fn nonce(&self, address: &Address) -> u64 {
        self.nonces.get(address).copied().unwrap_or_default()
    }

    fn set_nonce(&mut self, address: &Address, nonce: u64) {
        self.nonces.insert(*address, nonce);
    }
}
