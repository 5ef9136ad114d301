//! # Domain Invariants
//!
//! Canonical ordering rules for inputs and outputs.

use super::entities::{EvmInput, EvmOutput, TransferableInput, TransferableOutput};

/// Returns true if `keys` is strictly increasing.
pub fn is_sorted_and_unique<K: Ord>(keys: impl IntoIterator<Item = K>) -> bool {
    let mut iter = keys.into_iter();
    let Some(mut prev) = iter.next() else {
        return true;
    };
    for key in iter {
        if key <= prev {
            return false;
        }
        prev = key;
    }
    true
}

/// Returns true if `keys` is non-decreasing.
pub fn is_sorted<K: Ord>(keys: impl IntoIterator<Item = K>) -> bool {
    let mut iter = keys.into_iter();
    let Some(mut prev) = iter.next() else {
        return true;
    };
    for key in iter {
        if key < prev {
            return false;
        }
        prev = key;
    }
    true
}

/// Imported inputs are ordered by UTXO id with no UTXO spent twice.
pub fn invariant_imported_inputs_sorted_unique(inputs: &[TransferableInput]) -> bool {
    is_sorted_and_unique(inputs.iter().map(|i| i.utxo_id))
}

/// EVM inputs are ordered by (address, asset) with no pair repeated.
pub fn invariant_evm_inputs_sorted_unique(inputs: &[EvmInput]) -> bool {
    is_sorted_and_unique(inputs.iter().map(EvmInput::sort_key))
}

/// Exported outputs are in canonical order.
pub fn invariant_exported_outputs_sorted(outputs: &[TransferableOutput]) -> bool {
    is_sorted(outputs.iter())
}

/// EVM outputs are ordered by (address, asset).
pub fn invariant_evm_outputs_sorted(outputs: &[EvmOutput]) -> bool {
    is_sorted(outputs.iter().map(EvmOutput::sort_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_and_unique() {
        assert!(is_sorted_and_unique(Vec::<u32>::new()));
        assert!(is_sorted_and_unique([1, 2, 3]));
        assert!(!is_sorted_and_unique([1, 1, 3]));
        assert!(!is_sorted_and_unique([2, 1]));
    }

    #[test]
    fn test_sorted_allows_equal() {
        assert!(is_sorted([1, 1, 2]));
        assert!(!is_sorted([3, 2]));
    }

    #[test]
    fn test_evm_inputs_duplicate_pair_rejected() {
        let input = EvmInput {
            address: [1; 20],
            amount: 1,
            asset_id: shared_types::Id::EMPTY,
            nonce: 0,
        };
        assert!(!invariant_evm_inputs_sorted_unique(&[input.clone(), input]));
    }
}
