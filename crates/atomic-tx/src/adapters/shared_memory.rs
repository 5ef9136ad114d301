//! Shared Memory Adapter
//!
//! Implements the `SharedMemory` port in memory.

use crate::domain::{AtomicTxError, Result, Utxo, UtxoId};
use crate::ports::{AtomicRequests, SharedMemory, UtxoCursor, UtxoPage};
use parking_lot::RwLock;
use shared_types::{Id, ShortId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use tracing::debug;

#[derive(Default)]
struct PeerMemory {
    /// UTXOs the peer sent to this chain.
    inbound: BTreeMap<UtxoId, Utxo>,
    /// UTXOs this chain sent to the peer.
    outbound: BTreeMap<UtxoId, Utxo>,
}

/// In-memory shared memory for testing and single-process deployments.
#[derive(Default)]
pub struct MemorySharedMemory {
    peers: RwLock<HashMap<Id, PeerMemory>>,
}

impl MemorySharedMemory {
    /// Create empty shared memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a UTXO as if `peer_chain` had exported it to this chain.
    pub fn insert_inbound(&self, peer_chain: Id, utxo: Utxo) {
        self.peers
            .write()
            .entry(peer_chain)
            .or_default()
            .inbound
            .insert(utxo.utxo_id, utxo);
    }

    /// UTXOs this chain exported to `peer_chain`.
    pub fn outbound(&self, peer_chain: &Id) -> Vec<Utxo> {
        self.peers
            .read()
            .get(peer_chain)
            .map(|p| p.outbound.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl SharedMemory for MemorySharedMemory {
    fn get(&self, peer_chain: &Id, utxo_ids: &[UtxoId]) -> Result<Vec<Utxo>> {
        let peers = self.peers.read();
        let peer = peers.get(peer_chain);
        utxo_ids
            .iter()
            .map(|id| {
                peer.and_then(|p| p.inbound.get(id))
                    .cloned()
                    .ok_or(AtomicTxError::UtxoNotFound {
                        tx_id: id.tx_id,
                        output_index: id.output_index,
                    })
            })
            .collect()
    }

    fn indexed(
        &self,
        peer_chain: &Id,
        addrs: &[ShortId],
        start: Option<UtxoCursor>,
        limit: usize,
    ) -> Result<UtxoPage> {
        let mut page = UtxoPage {
            utxos: Vec::new(),
            last: start.unwrap_or_default(),
        };
        let peers = self.peers.read();
        let Some(peer) = peers.get(peer_chain) else {
            return Ok(page);
        };

        let mut owners = addrs.to_vec();
        owners.sort();
        owners.dedup();
        // A UTXO with several requested owners appears once per page
        let mut seen = HashSet::new();

        for owner in owners {
            let from = match start {
                Some(cursor) if owner < cursor.addr => continue,
                Some(cursor) if owner == cursor.addr => Bound::Excluded(cursor.utxo_id),
                _ => Bound::Unbounded,
            };
            for utxo in peer.inbound.range((from, Bound::Unbounded)).map(|(_, u)| u) {
                if page.utxos.len() >= limit {
                    return Ok(page);
                }
                if !utxo.out.addrs.contains(&owner) || !seen.insert(utxo.utxo_id) {
                    continue;
                }
                page.utxos.push(utxo.clone());
                page.last = UtxoCursor {
                    addr: owner,
                    utxo_id: utxo.utxo_id,
                };
            }
        }
        Ok(page)
    }

    fn apply(&self, requests: Vec<(Id, AtomicRequests)>) -> Result<()> {
        let mut peers = self.peers.write();

        // Validate every removal first so a failure leaves memory untouched
        for (chain, req) in &requests {
            let peer = peers.get(chain);
            for id in &req.remove {
                if !peer.is_some_and(|p| p.inbound.contains_key(id)) {
                    return Err(AtomicTxError::UtxoNotFound {
                        tx_id: id.tx_id,
                        output_index: id.output_index,
                    });
                }
            }
        }

        for (chain, req) in requests {
            let peer = peers.entry(chain).or_default();
            for id in &req.remove {
                peer.inbound.remove(id);
            }
            for utxo in req.put {
                peer.outbound.insert(utxo.utxo_id, utxo);
            }
            debug!(
                "[atomic] Applied shared memory requests for chain {}: {} removed, {} outbound",
                chain,
                req.remove.len(),
                peer.outbound.len()
            );
        }
        Ok(())
    }
}
