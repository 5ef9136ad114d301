//! Atomic Transaction Queue
//!
//! Bounded FIFO of atomic transactions awaiting inclusion. Submitters never
//! block: a full queue is reported as an error. Each admission posts a
//! coalescing wake-up so the submission listener need not poll.
//!
//! The queue remembers the peer-chain UTXOs its transactions consume and
//! refuses a second transaction spending any of them.

use crate::error::{Result, VmError};
use atomic_tx::{Tx, UtxoId};
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::futures::Notified;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::debug;

/// Bounded atomic transaction queue with a single-slot wake signal
pub struct AtomicTxQueue {
    sender: mpsc::Sender<Tx>,
    receiver: Mutex<mpsc::Receiver<Tx>>,
    queued_inputs: Mutex<HashSet<UtxoId>>,
    work_available: Notify,
    capacity: usize,
}

impl AtomicTxQueue {
    /// Create a queue holding at most `capacity` transactions
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
            queued_inputs: Mutex::new(HashSet::new()),
            work_available: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue without blocking; fails when the queue is full or a queued
    /// transaction already spends one of `tx`'s UTXOs
    pub fn submit(&self, tx: Tx) -> Result<()> {
        let id = tx.id();
        let inputs = tx.unsigned.input_utxos();
        let mut queued = self.queued_inputs.lock();
        if let Some(spent) = inputs.iter().find(|i| queued.contains(i)) {
            return Err(VmError::conflicting_input(*spent));
        }
        match self.sender.try_send(tx) {
            Ok(()) => {
                queued.extend(inputs);
                drop(queued);
                // Stores at most one permit when nobody is waiting
                self.work_available.notify_one();
                debug!("[evm] Queued atomic tx {} ({} pending)", id, self.len());
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(VmError::TooManyPendingAtomicTxs),
            Err(TrySendError::Closed(_)) => Err(VmError::Shutdown),
        }
    }

    /// Dequeue one transaction if any is pending
    pub fn drain_one(&self) -> Option<Tx> {
        let tx = self.receiver.lock().try_recv().ok()?;
        let mut queued = self.queued_inputs.lock();
        for input in tx.unsigned.input_utxos() {
            queued.remove(&input);
        }
        Some(tx)
    }

    /// Number of queued transactions
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued transactions
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resolves after the next admission, or immediately if one happened
    /// since the last wake-up was consumed
    pub fn work_available(&self) -> Notified<'_> {
        self.work_available.notified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomic_tx::algorithms::seal_tx;
    use atomic_tx::{
        EvmInput, EvmOutput, TransferInput, TransferableInput, UnsignedAtomicTx, UnsignedExportTx,
        UnsignedImportTx,
    };
    use proptest::prelude::*;
    use shared_types::Id;
    use std::time::Duration;

    fn tx(n: u64) -> Tx {
        let unsigned = UnsignedAtomicTx::Export(UnsignedExportTx {
            network_id: 1,
            blockchain_id: Id([1; 32]),
            destination_chain: Id([2; 32]),
            ins: vec![EvmInput {
                address: [1; 20],
                amount: n,
                asset_id: Id([3; 32]),
                nonce: n,
            }],
            exported_outputs: vec![],
        });
        seal_tx(unsigned, vec![]).unwrap()
    }

    fn import(utxo_index: u32, to: u8) -> Tx {
        let unsigned = UnsignedAtomicTx::Import(UnsignedImportTx {
            network_id: 1,
            blockchain_id: Id([1; 32]),
            source_chain: Id([2; 32]),
            imported_inputs: vec![TransferableInput {
                utxo_id: UtxoId {
                    tx_id: Id([7; 32]),
                    output_index: utxo_index,
                },
                asset_id: Id([3; 32]),
                input: TransferInput {
                    amount: 5,
                    sig_indices: vec![0],
                },
            }],
            outs: vec![EvmOutput {
                address: [to; 20],
                amount: 4,
                asset_id: Id([3; 32]),
            }],
        });
        seal_tx(unsigned, vec![]).unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let queue = AtomicTxQueue::new(4);
        queue.submit(tx(1)).unwrap();
        queue.submit(tx(2)).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain_one().unwrap().id(), tx(1).id());
        assert_eq!(queue.drain_one().unwrap().id(), tx(2).id());
        assert!(queue.drain_one().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_rejects_then_recovers() {
        let queue = AtomicTxQueue::new(2);
        queue.submit(tx(1)).unwrap();
        queue.submit(tx(2)).unwrap();
        assert!(matches!(queue.submit(tx(3)), Err(VmError::TooManyPendingAtomicTxs)));
        assert_eq!(queue.len(), 2);

        queue.drain_one().unwrap();
        queue.submit(tx(3)).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_second_spend_of_queued_utxo_refused() {
        let queue = AtomicTxQueue::new(4);
        queue.submit(import(0, 0xc)).unwrap();

        let err = queue.submit(import(0, 0xd)).unwrap_err();
        assert!(matches!(err, VmError::ConflictingAtomicInputs { output_index: 0, .. }));
        assert_eq!(queue.len(), 1);

        // Other UTXOs are unaffected; draining frees the spent one
        queue.submit(import(1, 0xd)).unwrap();
        queue.drain_one().unwrap();
        queue.submit(import(0, 0xd)).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_full_queue_does_not_reserve_inputs() {
        let queue = AtomicTxQueue::new(1);
        queue.submit(tx(1)).unwrap();
        assert!(matches!(queue.submit(import(0, 0xc)), Err(VmError::TooManyPendingAtomicTxs)));
        queue.drain_one().unwrap();
        queue.submit(import(0, 0xd)).unwrap();
    }

    #[test]
    fn test_default_capacity_bound() {
        let queue = AtomicTxQueue::new(1024);
        for n in 0..1024 {
            queue.submit(tx(n)).unwrap();
        }
        assert!(matches!(queue.submit(tx(1024)), Err(VmError::TooManyPendingAtomicTxs)));
    }

    #[tokio::test]
    async fn test_wake_signal_coalesces() {
        let queue = AtomicTxQueue::new(8);
        queue.submit(tx(1)).unwrap();
        queue.submit(tx(2)).unwrap();

        // Two admissions leave a single stored wake-up
        queue.work_available().await;
        let second = tokio::time::timeout(Duration::from_millis(20), queue.work_available()).await;
        assert!(second.is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_never_exceeds_capacity(capacity in 1usize..16, ops in proptest::collection::vec(any::<bool>(), 1..64)) {
            let queue = AtomicTxQueue::new(capacity);
            let mut expected = 0usize;
            for (n, submit) in ops.into_iter().enumerate() {
                if submit {
                    let admitted = queue.submit(tx(n as u64)).is_ok();
                    prop_assert_eq!(admitted, expected < capacity);
                    if admitted {
                        expected += 1;
                    }
                } else if queue.drain_one().is_some() {
                    expected -= 1;
                }
                prop_assert_eq!(queue.len(), expected);
                prop_assert!(queue.len() <= capacity);
            }
        }
    }
}
