//! Construction of signed import and export transactions.

use super::fund_selector::{select_spendable_funds, SelectedFunds};
use super::signing::{short_id_of, sign_tx};
use super::verify::semantic_verify;
use crate::domain::{
    AtomicContext, AtomicTxError, EvmOutput, Result, TransferInput, TransferOutput,
    TransferableInput, TransferableOutput, Tx, UnsignedAtomicTx, UnsignedExportTx,
    UnsignedImportTx, Utxo,
};
use crate::ports::{SharedMemory, StateDb};
use k256::ecdsa::SigningKey;
use shared_types::{Address, Id, ShortId};
use std::collections::BTreeMap;
use tracing::info;

/// Request to move `amount` of `asset_id` from EVM accounts to `to` on the
/// peer chain.
#[derive(Clone, Debug)]
pub struct ExportRequest {
    /// Asset to export.
    pub asset_id: Id,
    /// Amount in atomic units, excluding the fee.
    pub amount: u64,
    /// Chain receiving the UTXO; must be the peer chain.
    pub destination_chain: Id,
    /// Owner of the produced UTXO.
    pub to: ShortId,
}

/// Build, sign and verify an export funded greedily from `keys`.
///
/// The fee is always paid in the native asset. For a native export the fee
/// is added to the amount selected; otherwise it is selected separately.
#[tracing::instrument(skip_all, fields(asset = %request.asset_id, amount = request.amount))]
pub fn new_export_tx(
    state: &dyn StateDb,
    shared_memory: &dyn SharedMemory,
    ctx: &AtomicContext,
    request: &ExportRequest,
    keys: &[SigningKey],
    now: u64,
) -> Result<Tx> {
    if request.destination_chain != ctx.peer_chain_id {
        return Err(AtomicTxError::WrongChainId);
    }
    if request.amount == 0 {
        return Err(AtomicTxError::ZeroAmount);
    }

    let mut selected = if ctx.is_native(&request.asset_id) {
        let total = request
            .amount
            .checked_add(ctx.tx_fee)
            .ok_or(AtomicTxError::OverflowExport)?;
        select_spendable_funds(state, ctx, keys, &ctx.native_asset_id, total)?
    } else {
        let mut asset = select_spendable_funds(state, ctx, keys, &request.asset_id, request.amount)?;
        let fee = select_spendable_funds(state, ctx, keys, &ctx.native_asset_id, ctx.tx_fee)?;
        asset.inputs.extend(fee.inputs);
        asset.signers.extend(fee.signers);
        asset
    };
    sort_with_signers(&mut selected);

    let unsigned = UnsignedAtomicTx::Export(UnsignedExportTx {
        network_id: ctx.network_id,
        blockchain_id: ctx.chain_id,
        destination_chain: request.destination_chain,
        ins: selected.inputs,
        exported_outputs: vec![TransferableOutput {
            asset_id: request.asset_id,
            out: TransferOutput {
                amount: request.amount,
                locktime: 0,
                threshold: 1,
                addrs: vec![request.to],
            },
        }],
    });
    let tx = sign_tx(unsigned, &selected.signers)?;
    semantic_verify(&tx, ctx, shared_memory, now)?;
    info!("[atomic] Built export tx {}", tx.id());
    Ok(tx)
}

fn sort_with_signers(selected: &mut SelectedFunds) {
    let mut pairs: Vec<_> = std::mem::take(&mut selected.inputs)
        .into_iter()
        .zip(std::mem::take(&mut selected.signers))
        .collect();
    pairs.sort_by_key(|(input, _)| input.sort_key());
    let (inputs, signers) = pairs.into_iter().unzip();
    selected.inputs = inputs;
    selected.signers = signers;
}

/// Owner indices and keys that can satisfy `utxo` at `now`, if any.
fn spend_authority(utxo: &Utxo, owners: &[(ShortId, &SigningKey)], now: u64) -> Option<(Vec<u32>, Vec<SigningKey>)> {
    if utxo.out.locktime > now {
        return None;
    }
    let mut indices = Vec::new();
    let mut signers = Vec::new();
    for (index, addr) in utxo.out.addrs.iter().enumerate() {
        if indices.len() == utxo.out.threshold as usize {
            break;
        }
        if let Some((_, key)) = owners.iter().find(|(owner, _)| owner == addr) {
            indices.push(index as u32);
            signers.push((*key).clone());
        }
    }
    (indices.len() == utxo.out.threshold as usize).then_some((indices, signers))
}

/// Build, sign and verify an import of every spendable UTXO that `keys` own
/// on `source_chain`, credited to `to` minus the fee.
#[tracing::instrument(skip_all, fields(source = %source_chain))]
pub fn new_import_tx(
    shared_memory: &dyn SharedMemory,
    ctx: &AtomicContext,
    source_chain: Id,
    to: Address,
    keys: &[SigningKey],
    max_utxos: usize,
    now: u64,
) -> Result<Tx> {
    if source_chain != ctx.peer_chain_id {
        return Err(AtomicTxError::WrongChainId);
    }

    let owners: Vec<(ShortId, &SigningKey)> = keys.iter().map(|k| (short_id_of(k), k)).collect();
    let addrs: Vec<ShortId> = owners.iter().map(|(addr, _)| *addr).collect();
    let utxos = shared_memory.indexed(&source_chain, &addrs, None, max_utxos)?.utxos;

    let mut inputs = Vec::new();
    let mut totals: BTreeMap<Id, u64> = BTreeMap::new();
    for utxo in &utxos {
        let Some((sig_indices, signers)) = spend_authority(utxo, &owners, now) else {
            continue;
        };
        let total = totals.entry(utxo.asset_id).or_insert(0);
        *total = total
            .checked_add(utxo.out.amount)
            .ok_or(AtomicTxError::OverflowImport)?;
        inputs.push((
            TransferableInput {
                utxo_id: utxo.utxo_id,
                asset_id: utxo.asset_id,
                input: TransferInput {
                    amount: utxo.out.amount,
                    sig_indices,
                },
            },
            signers,
        ));
    }
    if inputs.is_empty() {
        return Err(AtomicTxError::NoImportInputs);
    }
    inputs.sort_by_key(|(input, _)| input.utxo_id);

    let native = totals.remove(&ctx.native_asset_id).unwrap_or(0);
    if native < ctx.tx_fee {
        return Err(AtomicTxError::InsufficientFunds {
            need: ctx.tx_fee,
            available: native,
        });
    }
    let mut outs = Vec::new();
    if native > ctx.tx_fee {
        outs.push(EvmOutput {
            address: to,
            amount: native - ctx.tx_fee,
            asset_id: ctx.native_asset_id,
        });
    }
    outs.extend(totals.into_iter().map(|(asset_id, amount)| EvmOutput {
        address: to,
        amount,
        asset_id,
    }));
    outs.sort_by_key(EvmOutput::sort_key);

    let (imported_inputs, signers): (Vec<_>, Vec<_>) = inputs.into_iter().unzip();
    let unsigned = UnsignedAtomicTx::Import(UnsignedImportTx {
        network_id: ctx.network_id,
        blockchain_id: ctx.chain_id,
        source_chain,
        imported_inputs,
        outs,
    });
    let tx = sign_tx(unsigned, &signers)?;
    semantic_verify(&tx, ctx, shared_memory, now)?;
    info!("[atomic] Built import tx {} spending {} utxos", tx.id(), tx.unsigned.input_count());
    Ok(tx)
}
