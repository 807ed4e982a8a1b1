use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use log::debug;
use tokio::sync::RwLock;

use vela_common::{
    crypto::{hash, Hash},
    node::ConsensusNode,
    serializer::{Serializer, Writer},
    snapshot::{RoundLink, Snapshot},
    store::StoreError,
};

use crate::{
    error::KernelError,
    storage::{Store, StoredRound},
};

/// The round currently collecting snapshots on a chain.
#[derive(Clone, Debug)]
pub struct CacheRound {
    pub node_id: Hash,
    pub number: u64,
    pub timestamp: u64,
    pub references: Option<RoundLink>,
    pub snapshots: Vec<Snapshot>,
}

impl CacheRound {
    pub fn as_final(&self) -> FinalRound {
        FinalRound {
            node_id: self.node_id,
            number: self.number,
            start: self.timestamp,
            hash: round_hash(&self.node_id, self.number, self.timestamp),
        }
    }
}

/// A sealed round, referenced by later rounds on this and other chains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FinalRound {
    pub node_id: Hash,
    pub number: u64,
    pub start: u64,
    pub hash: Hash,
}

impl FinalRound {
    pub fn from_stored(round: &StoredRound) -> Self {
        FinalRound {
            node_id: round.node_id,
            number: round.number,
            start: round.start,
            hash: round_hash(&round.node_id, round.number, round.start),
        }
    }
}

fn round_hash(node_id: &Hash, number: u64, start: u64) -> Hash {
    let mut writer = Writer::new();
    node_id.write(&mut writer);
    writer.write_u64(&number);
    writer.write_u64(&start);
    hash(&writer.bytes())
}

#[derive(Clone, Debug)]
pub struct ChainState {
    pub cache_round: CacheRound,
    pub final_round: FinalRound,
}

/// Per-node snapshot chain. Only the hooks the membership lifecycle and the
/// importer need are implemented here; full graph consensus lives above.
pub struct Chain<S> {
    pub chain_id: Hash,
    store: Arc<S>,
    graph_timestamp: Arc<AtomicU64>,
    state: RwLock<Option<ChainState>>,
    consensus_info: RwLock<Option<ConsensusNode>>,
    // snapshots queued for the aggregation layer
    pending: Mutex<Vec<Snapshot>>,
}

impl<S: Store> Chain<S> {
    pub fn new(chain_id: Hash, store: Arc<S>, graph_timestamp: Arc<AtomicU64>) -> Self {
        Chain {
            chain_id,
            store,
            graph_timestamp,
            state: RwLock::new(None),
            consensus_info: RwLock::new(None),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn state(&self) -> Option<ChainState> {
        self.state.read().await.clone()
    }

    pub async fn has_state(&self) -> bool {
        self.state.read().await.is_some()
    }

    pub async fn consensus_info(&self) -> Option<ConsensusNode> {
        self.consensus_info.read().await.clone()
    }

    /// Rebuild the in-memory round state and consensus info from the store.
    pub async fn load_state(&self, network_id: &Hash) -> Result<(), KernelError> {
        let last = self.store.read_last_round(&self.chain_id).await?;
        let state = match last {
            None => None,
            Some(last) => {
                let final_round = if last.number == 0 {
                    FinalRound::from_stored(&last)
                } else {
                    let prev = self
                        .store
                        .read_round(&self.chain_id, last.number - 1)
                        .await?
                        .ok_or_else(|| {
                            StoreError::Corrupted(format!(
                                "missing round {} for chain {}",
                                last.number - 1,
                                self.chain_id
                            ))
                        })?;
                    FinalRound::from_stored(&prev)
                };
                let snapshots = self
                    .store
                    .read_snapshots_for_node_round(&self.chain_id, last.number)
                    .await?
                    .into_iter()
                    .map(|s| s.snapshot)
                    .collect();
                Some(ChainState {
                    cache_round: CacheRound {
                        node_id: last.node_id,
                        number: last.number,
                        timestamp: last.start,
                        references: last.references,
                        snapshots,
                    },
                    final_round,
                })
            }
        };
        *self.state.write().await = state;

        let nodes = self.store.read_all_nodes(u64::MAX, true).await?;
        let info = nodes
            .into_iter()
            .find(|n| n.id_for_network(network_id) == self.chain_id);
        *self.consensus_info.write().await = info;
        Ok(())
    }

    /// Queue a self-signed snapshot for the aggregation layer.
    pub fn append_self_empty(&self, snapshot: Snapshot) -> Result<(), KernelError> {
        if snapshot.node_id != self.chain_id {
            return Err(KernelError::Store(StoreError::Corrupted(format!(
                "snapshot for chain {} queued on chain {}",
                snapshot.node_id, self.chain_id
            ))));
        }
        debug!(
            "chain {} queueing self snapshot {:?}",
            self.chain_id,
            snapshot.sole_transaction()
        );
        self.pending.lock().unwrap().push(snapshot);
        Ok(())
    }

    pub fn take_pending(&self) -> Vec<Snapshot> {
        std::mem::take(&mut self.pending.lock().unwrap())
    }

    /// Apply a finalised snapshot in round order: same round appends, next
    /// round seals the cache round and opens a new one.
    pub async fn append_final_snapshot(&self, snapshot: &Snapshot) -> Result<(), KernelError> {
        let mut guard = self.state.write().await;
        match guard.as_mut() {
            None => {
                if snapshot.round_number != 0 {
                    return Err(KernelError::RoundOutOfOrder(snapshot.round_number, 0));
                }
                self.store
                    .start_new_round(&self.chain_id, 0, snapshot.references, snapshot.timestamp)
                    .await?;
                self.store.topo_write(snapshot, &[snapshot.node_id]).await?;
                let cache_round = CacheRound {
                    node_id: self.chain_id,
                    number: 0,
                    timestamp: snapshot.timestamp,
                    references: snapshot.references,
                    snapshots: vec![snapshot.clone()],
                };
                let final_round = cache_round.as_final();
                *guard = Some(ChainState {
                    cache_round,
                    final_round,
                });
            }
            Some(state) => {
                let current = state.cache_round.number;
                if snapshot.round_number == current {
                    // replays of an already finalised snapshot are no-ops
                    let hash = snapshot.payload_hash();
                    if state
                        .cache_round
                        .snapshots
                        .iter()
                        .any(|s| s.payload_hash() == hash)
                    {
                        return Ok(());
                    }
                    self.store.topo_write(snapshot, &[snapshot.node_id]).await?;
                    state.cache_round.snapshots.push(snapshot.clone());
                } else if snapshot.round_number == current + 1 {
                    let sealed = state.cache_round.as_final();
                    self.store
                        .start_new_round(
                            &self.chain_id,
                            snapshot.round_number,
                            snapshot.references,
                            sealed.start,
                        )
                        .await?;
                    self.store.topo_write(snapshot, &[snapshot.node_id]).await?;
                    state.final_round = sealed;
                    state.cache_round = CacheRound {
                        node_id: self.chain_id,
                        number: snapshot.round_number,
                        timestamp: snapshot.timestamp,
                        references: snapshot.references,
                        snapshots: vec![snapshot.clone()],
                    };
                } else {
                    return Err(KernelError::RoundOutOfOrder(snapshot.round_number, current));
                }
            }
        }
        self.graph_timestamp
            .fetch_max(snapshot.timestamp, Ordering::SeqCst);
        Ok(())
    }

    /// Install a freshly bootstrapped round pair after an accept finalises.
    pub async fn assign_new_graph_round(&self, final_round: FinalRound, cache_round: CacheRound) {
        *self.state.write().await = Some(ChainState {
            cache_round,
            final_round,
        });
    }
}
