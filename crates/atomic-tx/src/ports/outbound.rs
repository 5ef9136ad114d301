//! # Outbound Ports
//!
//! Traits for the world state an atomic transfer mutates and the shared
//! memory it exchanges UTXOs through.

use crate::domain::{Result, Utxo, UtxoId};
use shared_types::{Address, Id, ShortId, U256};

/// Mutable view of EVM world state at some block.
///
/// Native balances are in 18-decimal units; multi-coin balances are in the
/// asset's atomic units.
pub trait StateDb: Send {
    /// Native balance.
    fn balance(&self, address: &Address) -> U256;

    /// Credit native balance.
    fn add_balance(&mut self, address: &Address, amount: U256);

    /// Debit native balance. Callers check sufficiency first.
    fn sub_balance(&mut self, address: &Address, amount: U256);

    /// Balance of a non-native asset.
    fn multi_coin_balance(&self, address: &Address, asset_id: &Id) -> U256;

    /// Credit a non-native asset.
    fn add_multi_coin_balance(&mut self, address: &Address, asset_id: &Id, amount: U256);

    /// Debit a non-native asset. Callers check sufficiency first.
    fn sub_multi_coin_balance(&mut self, address: &Address, asset_id: &Id, amount: U256);

    /// Account nonce.
    fn nonce(&self, address: &Address) -> u64;

    /// Overwrite the account nonce.
    fn set_nonce(&mut self, address: &Address, nonce: u64);
}

/// Shared-memory changes to apply for one peer chain when a block is accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AtomicRequests {
    /// Inbound UTXOs consumed by an import.
    pub remove: Vec<UtxoId>,
    /// Outbound UTXOs produced by an export.
    pub put: Vec<Utxo>,
}

/// Position in an address-ordered UTXO listing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct UtxoCursor {
    /// Owner address the listing had reached.
    pub addr: ShortId,
    /// Last UTXO returned for that owner.
    pub utxo_id: UtxoId,
}

/// One page of an address-ordered UTXO listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UtxoPage {
    /// UTXOs in (owner, id) order.
    pub utxos: Vec<Utxo>,
    /// Where the page ended; pass it back to continue. Equals the start
    /// cursor (or the default) when the page is empty.
    pub last: UtxoCursor,
}

/// UTXO exchange with peer chains.
pub trait SharedMemory: Send + Sync {
    /// Fetch inbound UTXOs sent by `peer_chain`; any missing id is an error.
    fn get(&self, peer_chain: &Id, utxo_ids: &[UtxoId]) -> Result<Vec<Utxo>>;

    /// Inbound UTXOs from `peer_chain` owned by any of `addrs`, at most
    /// `limit`, walking owners in ascending order and each owner's UTXOs
    /// by id. Listing resumes strictly after `start` when given.
    fn indexed(
        &self,
        peer_chain: &Id,
        addrs: &[ShortId],
        start: Option<UtxoCursor>,
        limit: usize,
    ) -> Result<UtxoPage>;

    /// Atomically apply requests for each peer chain.
    fn apply(&self, requests: Vec<(Id, AtomicRequests)>) -> Result<()>;
}
