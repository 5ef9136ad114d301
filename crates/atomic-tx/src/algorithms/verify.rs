//! Verification of atomic transactions.
//!
//! [`syntactic_verify`] needs only the transaction and chain identity.
//! [`semantic_verify`] also checks credentials and, for imports, the consumed
//! UTXOs in shared memory. Neither touches EVM state; nonces and balances
//! are checked when the transfer is applied.

use super::signing::{recover_address, signing_hash};
use crate::domain::{
    invariant_evm_inputs_sorted_unique, invariant_evm_outputs_sorted,
    invariant_exported_outputs_sorted, invariant_imported_inputs_sorted_unique,
    is_sorted_and_unique, AtomicContext, AtomicTxError, Credential, Result, TransferOutput, Tx,
    UnsignedAtomicTx, UnsignedExportTx, UnsignedImportTx, Utxo,
};
use crate::ports::SharedMemory;
use shared_types::{Hash, Id};
use std::collections::BTreeMap;

/// Per-asset consumed/produced totals.
#[derive(Default)]
struct FlowChecker {
    consumed: BTreeMap<Id, u64>,
    produced: BTreeMap<Id, u64>,
}

impl FlowChecker {
    fn consume(&mut self, asset: Id, amount: u64, overflow: &AtomicTxError) -> Result<()> {
        add_checked(&mut self.consumed, asset, amount, overflow)
    }

    fn produce(&mut self, asset: Id, amount: u64, overflow: &AtomicTxError) -> Result<()> {
        add_checked(&mut self.produced, asset, amount, overflow)
    }

    fn verify(&self) -> Result<()> {
        for (asset, produced) in &self.produced {
            let consumed = self.consumed.get(asset).copied().unwrap_or(0);
            if consumed < *produced {
                return Err(AtomicTxError::InsufficientFunds {
                    need: *produced,
                    available: consumed,
                });
            }
        }
        Ok(())
    }
}

fn add_checked(
    totals: &mut BTreeMap<Id, u64>,
    asset: Id,
    amount: u64,
    overflow: &AtomicTxError,
) -> Result<()> {
    let entry = totals.entry(asset).or_insert(0);
    *entry = entry.checked_add(amount).ok_or_else(|| overflow.clone())?;
    Ok(())
}

fn verify_chain(ctx: &AtomicContext, network_id: u32, blockchain_id: &Id, peer: &Id) -> Result<()> {
    if network_id != ctx.network_id {
        return Err(AtomicTxError::WrongNetworkId {
            expected: ctx.network_id,
            actual: network_id,
        });
    }
    if *blockchain_id != ctx.chain_id || *peer != ctx.peer_chain_id {
        return Err(AtomicTxError::WrongChainId);
    }
    Ok(())
}

fn verify_owners(out: &TransferOutput) -> Result<()> {
    if out.amount == 0 {
        return Err(AtomicTxError::ZeroAmount);
    }
    if out.threshold == 0 && !out.addrs.is_empty() {
        return Err(AtomicTxError::InvalidOwners("zero threshold with owners".into()));
    }
    if out.threshold as usize > out.addrs.len() {
        return Err(AtomicTxError::InvalidOwners(format!(
            "threshold {} exceeds {} owners",
            out.threshold,
            out.addrs.len()
        )));
    }
    if !is_sorted_and_unique(out.addrs.iter()) {
        return Err(AtomicTxError::InvalidOwners("owners not sorted and unique".into()));
    }
    Ok(())
}

fn syntactic_import(tx: &UnsignedImportTx, ctx: &AtomicContext) -> Result<()> {
    verify_chain(ctx, tx.network_id, &tx.blockchain_id, &tx.source_chain)?;
    if tx.imported_inputs.is_empty() {
        return Err(AtomicTxError::NoImportInputs);
    }
    for input in &tx.imported_inputs {
        if input.input.amount == 0 {
            return Err(AtomicTxError::ZeroAmount);
        }
        if !is_sorted_and_unique(input.input.sig_indices.iter()) {
            return Err(AtomicTxError::InputsNotSortedUnique);
        }
    }
    if tx.outs.iter().any(|out| out.amount == 0) {
        return Err(AtomicTxError::ZeroAmount);
    }
    if !invariant_imported_inputs_sorted_unique(&tx.imported_inputs) {
        return Err(AtomicTxError::InputsNotSortedUnique);
    }
    if !invariant_evm_outputs_sorted(&tx.outs) {
        return Err(AtomicTxError::OutputsNotSorted);
    }

    let overflow = AtomicTxError::OverflowImport;
    let mut flow = FlowChecker::default();
    for input in &tx.imported_inputs {
        flow.consume(input.asset_id, input.input.amount, &overflow)?;
    }
    for out in &tx.outs {
        flow.produce(out.asset_id, out.amount, &overflow)?;
    }
    flow.produce(ctx.native_asset_id, ctx.tx_fee, &overflow)?;
    flow.verify()
}

fn syntactic_export(tx: &UnsignedExportTx, ctx: &AtomicContext) -> Result<()> {
    verify_chain(ctx, tx.network_id, &tx.blockchain_id, &tx.destination_chain)?;
    if tx.ins.is_empty() {
        return Err(AtomicTxError::NoExportInputs);
    }
    if tx.exported_outputs.is_empty() {
        return Err(AtomicTxError::NoExportOutputs);
    }
    if tx.ins.iter().any(|input| input.amount == 0) {
        return Err(AtomicTxError::ZeroAmount);
    }
    for out in &tx.exported_outputs {
        verify_owners(&out.out)?;
    }
    if !invariant_evm_inputs_sorted_unique(&tx.ins) {
        return Err(AtomicTxError::InputsNotSortedUnique);
    }
    if !invariant_exported_outputs_sorted(&tx.exported_outputs) {
        return Err(AtomicTxError::OutputsNotSorted);
    }

    let overflow = AtomicTxError::OverflowExport;
    let mut flow = FlowChecker::default();
    for input in &tx.ins {
        flow.consume(input.asset_id, input.amount, &overflow)?;
    }
    for out in &tx.exported_outputs {
        flow.produce(out.asset_id, out.out.amount, &overflow)?;
    }
    flow.produce(ctx.native_asset_id, ctx.tx_fee, &overflow)?;
    flow.verify()
}

/// Checks that need no external state: chain identity, non-empty and
/// canonically ordered inputs and outputs, positive amounts and fee coverage.
pub fn syntactic_verify(tx: &UnsignedAtomicTx, ctx: &AtomicContext) -> Result<()> {
    match tx {
        UnsignedAtomicTx::Import(tx) => syntactic_import(tx, ctx),
        UnsignedAtomicTx::Export(tx) => syntactic_export(tx, ctx),
    }
}

fn verify_utxo_spend(
    hash: &Hash,
    utxo: &Utxo,
    amount: u64,
    sig_indices: &[u32],
    cred: &Credential,
    now: u64,
) -> Result<()> {
    if utxo.out.amount != amount {
        return Err(AtomicTxError::UtxoAmountMismatch {
            input: amount,
            utxo: utxo.out.amount,
        });
    }
    if utxo.out.locktime > now {
        return Err(AtomicTxError::UtxoLocked {
            locktime: utxo.out.locktime,
            now,
        });
    }
    if sig_indices.len() != utxo.out.threshold as usize {
        return Err(AtomicTxError::ThresholdMismatch {
            threshold: utxo.out.threshold,
            got: sig_indices.len(),
        });
    }
    if cred.sigs.len() != sig_indices.len() {
        return Err(AtomicTxError::SignatureInputsMismatch);
    }
    for (index, sig) in sig_indices.iter().zip(&cred.sigs) {
        let owner = utxo
            .out
            .addrs
            .get(*index as usize)
            .ok_or_else(|| AtomicTxError::InvalidOwners(format!("sig index {} out of range", index)))?;
        if recover_address(hash, sig)? != owner.0 {
            return Err(AtomicTxError::PublicKeySignatureMismatch);
        }
    }
    Ok(())
}

/// Full verification at time `now`: syntactic checks, then credentials.
///
/// Imports fetch every consumed UTXO from `shared_memory`; a missing UTXO is
/// an error.
pub fn semantic_verify(
    tx: &Tx,
    ctx: &AtomicContext,
    shared_memory: &dyn SharedMemory,
    now: u64,
) -> Result<()> {
    syntactic_verify(&tx.unsigned, ctx)?;
    if tx.creds.len() != tx.unsigned.input_count() {
        return Err(AtomicTxError::SignatureInputsMismatch);
    }
    let hash = signing_hash(&tx.unsigned)?;

    match &tx.unsigned {
        UnsignedAtomicTx::Import(import) => {
            let ids: Vec<_> = import.imported_inputs.iter().map(|i| i.utxo_id).collect();
            let utxos = shared_memory.get(&import.source_chain, &ids)?;
            for ((input, utxo), cred) in import.imported_inputs.iter().zip(&utxos).zip(&tx.creds) {
                if utxo.asset_id != input.asset_id {
                    return Err(AtomicTxError::AssetIdMismatch);
                }
                verify_utxo_spend(&hash, utxo, input.input.amount, &input.input.sig_indices, cred, now)?;
            }
        }
        UnsignedAtomicTx::Export(export) => {
            for (input, cred) in export.ins.iter().zip(&tx.creds) {
                let [sig] = cred.sigs.as_slice() else {
                    return Err(AtomicTxError::SignatureInputsMismatch);
                };
                if recover_address(&hash, sig)? != input.address {
                    return Err(AtomicTxError::PublicKeySignatureMismatch);
                }
            }
        }
    }
    Ok(())
}
