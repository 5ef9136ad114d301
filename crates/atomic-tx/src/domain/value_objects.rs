//! # Domain Value Objects
//!
//! Chain identity and protocol constants used when verifying and applying
//! atomic transactions.

use shared_types::Id;

/// Conversion rate between the 9-decimal atomic unit and the 18-decimal EVM
/// unit of the native asset.
pub const X2C_RATE: u64 = 1_000_000_000;

/// Codec version prefixed to every encoded transaction.
pub const CODEC_VERSION: u16 = 0;

/// Default fee charged per atomic transaction (one milli-unit).
pub const DEFAULT_TX_FEE: u64 = 1_000_000;

/// Chain identity and fee schedule an atomic transaction is checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtomicContext {
    /// Network this node runs on.
    pub network_id: u32,
    /// This chain.
    pub chain_id: Id,
    /// The chain atomic transfers are imported from and exported to.
    pub peer_chain_id: Id,
    /// Asset used for EVM balances and fees.
    pub native_asset_id: Id,
    /// Fee charged per atomic transaction, in atomic units of the native asset.
    pub tx_fee: u64,
}

impl AtomicContext {
    /// Returns true if `asset_id` is the native asset.
    pub fn is_native(&self, asset_id: &Id) -> bool {
        *asset_id == self.native_asset_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_native() {
        let ctx = AtomicContext {
            network_id: 1,
            chain_id: Id([1; 32]),
            peer_chain_id: Id([2; 32]),
            native_asset_id: Id([3; 32]),
            tx_fee: DEFAULT_TX_FEE,
        };
        assert!(ctx.is_native(&Id([3; 32])));
        assert!(!ctx.is_native(&Id([4; 32])));
    }
}
