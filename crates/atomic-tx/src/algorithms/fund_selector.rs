//! Greedy selection of EVM funds for an export.
//!
//! Keys are visited in the order given. Each key with a non-zero balance
//! contributes `min(balance, remaining)` as one input carrying the account's
//! current nonce, until the target is covered.

use super::signing::address_of;
use super::state_transfer::native_balance_atomic;
use crate::domain::{AtomicContext, AtomicTxError, EvmInput, Result};
use crate::ports::StateDb;
use k256::ecdsa::SigningKey;
use shared_types::{Id, U256};
use tracing::debug;

/// Inputs drawn from EVM accounts with the key that signs each one.
#[derive(Clone, Debug, Default)]
pub struct SelectedFunds {
    /// One input per contributing key, in key order.
    pub inputs: Vec<EvmInput>,
    /// Keys able to sign each input, index-aligned with `inputs`.
    pub signers: Vec<Vec<SigningKey>>,
}

impl SelectedFunds {
    /// Total amount selected.
    pub fn total(&self) -> u64 {
        self.inputs.iter().map(|i| i.amount).sum()
    }
}

fn spendable(state: &dyn StateDb, ctx: &AtomicContext, key: &SigningKey, asset_id: &Id) -> u64 {
    let address = address_of(key.verifying_key());
    if ctx.is_native(asset_id) {
        native_balance_atomic(state, &address)
    } else {
        let balance = state.multi_coin_balance(&address, asset_id);
        if balance > U256::from(u64::MAX) {
            u64::MAX
        } else {
            balance.as_u64()
        }
    }
}

/// Select inputs covering `amount` of `asset_id` from `keys`.
///
/// Fails with `InsufficientFunds` when the keys together hold less than
/// `amount`; `available` is what was found. A zero amount selects nothing.
#[tracing::instrument(skip(state, ctx, keys), fields(asset = %asset_id, keys = keys.len()))]
pub fn select_spendable_funds(
    state: &dyn StateDb,
    ctx: &AtomicContext,
    keys: &[SigningKey],
    asset_id: &Id,
    amount: u64,
) -> Result<SelectedFunds> {
    let mut selected = SelectedFunds::default();
    let mut remaining = amount;

    for key in keys {
        if remaining == 0 {
            break;
        }
        let balance = spendable(state, ctx, key, asset_id);
        if balance == 0 {
            continue;
        }
        let take = balance.min(remaining);
        let address = address_of(key.verifying_key());
        selected.inputs.push(EvmInput {
            address,
            amount: take,
            asset_id: *asset_id,
            nonce: state.nonce(&address),
        });
        selected.signers.push(vec![key.clone()]);
        remaining -= take;
    }

    if remaining > 0 {
        let available = amount - remaining;
        debug!(
            "[atomic] Insufficient funds for asset {}: need {}, available {}",
            asset_id, amount, available
        );
        return Err(AtomicTxError::InsufficientFunds {
            need: amount,
            available,
        });
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryState;
    use crate::domain::{DEFAULT_TX_FEE, X2C_RATE};
    use proptest::prelude::*;

    fn ctx() -> AtomicContext {
        AtomicContext {
            network_id: 1,
            chain_id: Id([1; 32]),
            peer_chain_id: Id([2; 32]),
            native_asset_id: Id([3; 32]),
            tx_fee: DEFAULT_TX_FEE,
        }
    }

    fn keys(n: u8) -> Vec<SigningKey> {
        (1..=n)
            .map(|seed| SigningKey::from_slice(&[seed; 32]).unwrap())
            .collect()
    }

    fn funded(keys: &[SigningKey], balances: &[u64]) -> MemoryState {
        keys.iter()
            .zip(balances)
            .fold(MemoryState::new(), |state, (key, balance)| {
                state.with_balance(
                    address_of(key.verifying_key()),
                    U256::from(*balance) * U256::from(X2C_RATE),
                )
            })
    }

    #[test]
    fn test_skips_empty_and_stops_when_covered() {
        let keys = keys(3);
        let state = funded(&keys, &[0, 5, 10]);
        let selected = select_spendable_funds(&state, &ctx(), &keys, &Id([3; 32]), 8).unwrap();
        assert_eq!(selected.inputs.len(), 2);
        assert_eq!(selected.inputs[0].amount, 5);
        assert_eq!(selected.inputs[1].amount, 3);
        assert_eq!(selected.signers[0], vec![keys[1].clone()]);
        assert_eq!(selected.total(), 8);
    }

    #[test]
    fn test_first_funded_key_covers_all() {
        let keys = keys(3);
        let state = funded(&keys, &[0, 10, 10]);
        let selected = select_spendable_funds(&state, &ctx(), &keys, &Id([3; 32]), 8).unwrap();
        assert_eq!(selected.inputs.len(), 1);
        assert_eq!(selected.inputs[0].address, address_of(keys[1].verifying_key()));
    }

    #[test]
    fn test_insufficient_reports_available() {
        let keys = keys(3);
        let state = funded(&keys, &[0, 5, 10]);
        let err = select_spendable_funds(&state, &ctx(), &keys, &Id([3; 32]), 20).unwrap_err();
        assert_eq!(
            err,
            AtomicTxError::InsufficientFunds {
                need: 20,
                available: 15
            }
        );
    }

    #[test]
    fn test_inputs_carry_current_nonce() {
        let keys = keys(1);
        let mut state = funded(&keys, &[10]);
        state.set_nonce(&address_of(keys[0].verifying_key()), 4);
        let selected = select_spendable_funds(&state, &ctx(), &keys, &Id([3; 32]), 1).unwrap();
        assert_eq!(selected.inputs[0].nonce, 4);
    }

    #[test]
    fn test_non_native_uses_multi_coin_balance() {
        let keys = keys(1);
        let asset = Id([7; 32]);
        let state = MemoryState::new().with_multi_coin_balance(
            address_of(keys[0].verifying_key()),
            asset,
            U256::from(6),
        );
        let selected = select_spendable_funds(&state, &ctx(), &keys, &asset, 6).unwrap();
        assert_eq!(selected.total(), 6);
        assert!(select_spendable_funds(&state, &ctx(), &keys, &Id([3; 32]), 1).is_err());
    }

    #[test]
    fn test_sub_unit_balance_not_spendable() {
        let keys = keys(1);
        let state = MemoryState::new()
            .with_balance(address_of(keys[0].verifying_key()), U256::from(X2C_RATE - 1));
        assert!(select_spendable_funds(&state, &ctx(), &keys, &Id([3; 32]), 1).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_selection_sums_to_target_or_fails(
            balances in proptest::collection::vec(0u64..1_000, 1..5),
            target in 1u64..3_000,
        ) {
            let keys = keys(balances.len() as u8);
            let state = funded(&keys, &balances);
            let total: u64 = balances.iter().sum();
            match select_spendable_funds(&state, &ctx(), &keys, &Id([3; 32]), target) {
                Ok(selected) => {
                    prop_assert!(total >= target);
                    prop_assert_eq!(selected.total(), target);
                    prop_assert!(selected.inputs.iter().all(|i| i.amount > 0));
                }
                Err(err) => {
                    prop_assert!(total < target);
                    prop_assert_eq!(err, AtomicTxError::InsufficientFunds { need: target, available: total });
                }
            }
        }
    }
}
