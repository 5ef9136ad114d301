//! Applying atomic transactions to EVM state and shared memory.

use crate::domain::{
    AtomicContext, AtomicTxError, Result, Tx, UnsignedAtomicTx, UnsignedExportTx,
    UnsignedImportTx, Utxo, UtxoId, X2C_RATE,
};
use crate::ports::{AtomicRequests, StateDb};
use shared_types::{Address, Id, U256};
use std::collections::HashMap;
use tracing::trace;

fn to_evm_units(amount: u64) -> U256 {
    U256::from(amount) * U256::from(X2C_RATE)
}

/// Native balance in atomic units, saturated to u64.
pub fn native_balance_atomic(state: &dyn StateDb, address: &Address) -> u64 {
    saturating_u64(state.balance(address) / U256::from(X2C_RATE))
}

fn saturating_u64(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}

fn apply_import(tx: &UnsignedImportTx, ctx: &AtomicContext, state: &mut dyn StateDb) {
    for out in &tx.outs {
        if ctx.is_native(&out.asset_id) {
            state.add_balance(&out.address, to_evm_units(out.amount));
        } else {
            state.add_multi_coin_balance(&out.address, &out.asset_id, U256::from(out.amount));
        }
    }
}

fn apply_export(tx: &UnsignedExportTx, ctx: &AtomicContext, state: &mut dyn StateDb) -> Result<()> {
    // An account may appear once per asset; its nonce advances once
    let mut bumped: HashMap<Address, u64> = HashMap::new();

    for input in &tx.ins {
        if ctx.is_native(&input.asset_id) {
            let amount = to_evm_units(input.amount);
            let balance = state.balance(&input.address);
            if balance < amount {
                return Err(AtomicTxError::InsufficientFunds {
                    need: input.amount,
                    available: native_balance_atomic(state, &input.address),
                });
            }
            state.sub_balance(&input.address, amount);
        } else {
            let amount = U256::from(input.amount);
            let balance = state.multi_coin_balance(&input.address, &input.asset_id);
            if balance < amount {
                return Err(AtomicTxError::InsufficientFunds {
                    need: input.amount,
                    available: saturating_u64(balance),
                });
            }
            state.sub_multi_coin_balance(&input.address, &input.asset_id, amount);
        }

        match bumped.get(&input.address) {
            Some(nonce) if *nonce == input.nonce => {}
            Some(nonce) => {
                return Err(AtomicTxError::InvalidNonce {
                    address: input.address,
                    expected: *nonce,
                    actual: input.nonce,
                })
            }
            None => {
                let current = state.nonce(&input.address);
                if current != input.nonce {
                    return Err(AtomicTxError::InvalidNonce {
                        address: input.address,
                        expected: current,
                        actual: input.nonce,
                    });
                }
                let next = input.nonce.checked_add(1).ok_or(AtomicTxError::InvalidNonce {
                    address: input.address,
                    expected: current,
                    actual: input.nonce,
                })?;
                state.set_nonce(&input.address, next);
                bumped.insert(input.address, input.nonce);
            }
        }
    }
    Ok(())
}

/// Apply the balance and nonce changes of `tx` to `state`.
///
/// Imports credit outputs (native amounts scaled by [`X2C_RATE`]). Exports
/// debit inputs and advance each debited account's nonce, failing if the
/// balance is short or the nonce differs. On error `state` may be partially
/// modified; callers apply to a snapshot.
pub fn apply_state_transfer(
    tx: &UnsignedAtomicTx,
    ctx: &AtomicContext,
    state: &mut dyn StateDb,
) -> Result<()> {
    trace!("[atomic] Applying {} state transfer", tx.kind());
    match tx {
        UnsignedAtomicTx::Import(import) => {
            apply_import(import, ctx, state);
            Ok(())
        }
        UnsignedAtomicTx::Export(export) => apply_export(export, ctx, state),
    }
}

/// Shared-memory requests produced when `tx` is accepted, keyed by peer chain.
///
/// Imports remove the consumed UTXOs. Exports put one UTXO per exported
/// output, indexed by output position under the transaction id.
pub fn atomic_requests(tx: &Tx) -> (Id, AtomicRequests) {
    match &tx.unsigned {
        UnsignedAtomicTx::Import(import) => (
            import.source_chain,
            AtomicRequests {
                remove: import.imported_inputs.iter().map(|i| i.utxo_id).collect(),
                put: Vec::new(),
            },
        ),
        UnsignedAtomicTx::Export(export) => (
            export.destination_chain,
            AtomicRequests {
                remove: Vec::new(),
                put: export
                    .exported_outputs
                    .iter()
                    .enumerate()
                    .map(|(index, out)| Utxo {
                        utxo_id: UtxoId {
                            tx_id: tx.id(),
                            output_index: index as u32,
                        },
                        asset_id: out.asset_id,
                        out: out.out.clone(),
                    })
                    .collect(),
            },
        ),
    }
}
