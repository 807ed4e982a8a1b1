use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use async_trait::async_trait;

use vela_common::{
    crypto::{Hash, Key},
    node::{ConsensusNode, NodeState},
    snapshot::{RoundLink, Snapshot, SnapshotWithTopologicalOrder},
    store::{
        CustodianReader, CustodianState, DepositLocker, GhostLocker, MintDistribution, MintReader,
        NodeOperationLocker, StoreError, TransactionReader, UtxoLockReader,
    },
    transaction::{DepositData, Input, Transaction, Utxo, UtxoWithLock},
};

use super::{
    CacheProvider, ConsensusSnapshotProvider, NodeProvider, RoundProvider, StoredRound,
    TopologyProvider,
};

#[derive(Default)]
struct Inner {
    transactions: HashMap<Hash, (Transaction, String)>,
    cache: HashMap<Hash, Transaction>,
    utxos: HashMap<(Hash, u16), UtxoWithLock>,
    ghost_locks: HashMap<Key, Hash>,
    deposit_locks: HashMap<String, (Hash, u64)>,
    node_operation: Option<(u64, Hash, u64)>,
    mint: Option<MintDistribution>,
    custodian: Option<CustodianState>,
    nodes: BTreeMap<Hash, ConsensusNode>,
    rounds: HashMap<(Hash, u64), StoredRound>,
    last_rounds: HashMap<Hash, u64>,
    topology: Vec<SnapshotWithTopologicalOrder>,
    consensus_snapshot: Option<(Snapshot, Hash)>,
}

/// Deterministic in-memory store. Backs tests and the genesis bootstrap;
/// every provider the kernel consumes is implemented here.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a finalised transaction: record it under its snapshot id,
    /// consume the spent UTXOs and materialise the produced ones.
    pub fn apply_transaction(&self, tx: &Transaction, snapshot_id: &str) {
        let hash = tx.payload_hash();
        let mut inner = self.inner.lock().unwrap();
        inner
            .transactions
            .insert(hash, (tx.clone(), snapshot_id.to_string()));
        for input in &tx.inputs {
            if let Input::Utxo {
                hash: prev, index, ..
            } = input
            {
                inner.utxos.remove(&(*prev, *index));
            }
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            inner.utxos.insert(
                (hash, index as u16),
                UtxoWithLock {
                    utxo: Utxo {
                        output_type: output.output_type,
                        amount: output.amount,
                        keys: output.keys.clone(),
                        script: output.script.clone(),
                        mask: output.mask,
                        asset: tx.asset,
                    },
                    lock_hash: None,
                },
            );
        }
    }

    pub fn put_utxo(&self, hash: Hash, index: u16, utxo: Utxo, lock_hash: Option<Hash>) {
        self.inner
            .lock()
            .unwrap()
            .utxos
            .insert((hash, index), UtxoWithLock { utxo, lock_hash });
    }

    pub fn set_mint_distribution(&self, mint: MintDistribution) {
        self.inner.lock().unwrap().mint = Some(mint);
    }

    pub fn set_custodian(&self, custodian: CustodianState) {
        self.inner.lock().unwrap().custodian = Some(custodian);
    }
}

#[async_trait]
impl TransactionReader for MemoryStore {
    async fn read_transaction(
        &self,
        hash: &Hash,
    ) -> Result<Option<(Transaction, String)>, StoreError> {
        Ok(self.inner.lock().unwrap().transactions.get(hash).cloned())
    }
}

#[async_trait]
impl UtxoLockReader for MemoryStore {
    async fn read_utxo_lock(
        &self,
        hash: &Hash,
        index: u16,
    ) -> Result<Option<UtxoWithLock>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .utxos
            .get(&(*hash, index))
            .cloned())
    }
}

#[async_trait]
impl GhostLocker for MemoryStore {
    async fn lock_ghost_keys(
        &self,
        keys: &[Key],
        tx_hash: &Hash,
        fork: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for key in keys {
            if let Some(existing) = inner.ghost_locks.get(key) {
                if existing != tx_hash && !fork {
                    return Err(StoreError::GhostKeyLocked(*key, *existing));
                }
            }
        }
        for key in keys {
            inner.ghost_locks.insert(*key, *tx_hash);
        }
        Ok(())
    }
}

#[async_trait]
impl NodeOperationLocker for MemoryStore {
    async fn add_node_operation(
        &self,
        tx: &Transaction,
        timestamp: u64,
        ttl: u64,
        _finalized: bool,
    ) -> Result<(), StoreError> {
        let hash = tx.payload_hash();
        let mut inner = self.inner.lock().unwrap();
        if let Some((locked_at, locked_tx, locked_ttl)) = inner.node_operation {
            if locked_tx != hash && timestamp < locked_at + locked_ttl {
                return Err(StoreError::NodeOperationLocked(locked_at + locked_ttl));
            }
        }
        inner.node_operation = Some((timestamp, hash, ttl));
        Ok(())
    }
}

#[async_trait]
impl MintReader for MemoryStore {
    async fn read_last_mint_distribution(&self) -> Result<Option<MintDistribution>, StoreError> {
        Ok(self.inner.lock().unwrap().mint.clone())
    }
}

#[async_trait]
impl DepositLocker for MemoryStore {
    async fn lock_deposit_input(
        &self,
        deposit: &DepositData,
        tx_hash: &Hash,
        snap_time: u64,
        fork: bool,
    ) -> Result<(), StoreError> {
        let key = format!("{}:{}", deposit.transaction_key, deposit.output_index);
        let mut inner = self.inner.lock().unwrap();
        if let Some((existing, _)) = inner.deposit_locks.get(&key) {
            if existing != tx_hash && !fork {
                return Err(StoreError::DepositClaimed(
                    deposit.transaction_key.clone(),
                    deposit.output_index,
                ));
            }
        }
        inner.deposit_locks.insert(key, (*tx_hash, snap_time));
        Ok(())
    }
}

#[async_trait]
impl CustodianReader for MemoryStore {
    async fn read_custodian(&self) -> Result<Option<CustodianState>, StoreError> {
        Ok(self.inner.lock().unwrap().custodian.clone())
    }
}

#[async_trait]
impl CacheProvider for MemoryStore {
    async fn cache_put_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.cache.insert(tx.payload_hash(), tx.clone());
        Ok(())
    }

    async fn cache_get_transaction(&self, hash: &Hash) -> Result<Option<Transaction>, StoreError> {
        Ok(self.inner.lock().unwrap().cache.get(hash).cloned())
    }
}

#[async_trait]
impl TopologyProvider for MemoryStore {
    async fn read_snapshots_since_topology(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .topology
            .iter()
            .filter(|s| s.topological_order >= offset)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn read_snapshots_for_node_round(
        &self,
        node_id: &Hash,
        round: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .topology
            .iter()
            .filter(|s| s.snapshot.node_id == *node_id && s.snapshot.round_number == round)
            .cloned()
            .collect())
    }

    async fn topo_write(&self, snapshot: &Snapshot, _signers: &[Hash]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let order = inner.topology.len() as u64;
        inner.topology.push(SnapshotWithTopologicalOrder {
            snapshot: snapshot.clone(),
            topological_order: order,
        });
        Ok(order)
    }

    async fn topo_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.inner.lock().unwrap().topology.len() as u64)
    }
}

#[async_trait]
impl RoundProvider for MemoryStore {
    async fn start_new_round(
        &self,
        node_id: &Hash,
        number: u64,
        references: Option<RoundLink>,
        start: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.rounds.insert(
            (*node_id, number),
            StoredRound {
                node_id: *node_id,
                number,
                start,
                references,
            },
        );
        let last = inner.last_rounds.entry(*node_id).or_insert(number);
        if number > *last {
            *last = number;
        }
        Ok(())
    }

    async fn read_round(
        &self,
        node_id: &Hash,
        number: u64,
    ) -> Result<Option<StoredRound>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .rounds
            .get(&(*node_id, number))
            .cloned())
    }

    async fn read_last_round(&self, node_id: &Hash) -> Result<Option<StoredRound>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let number = match inner.last_rounds.get(node_id) {
            Some(number) => *number,
            None => return Ok(None),
        };
        Ok(inner.rounds.get(&(*node_id, number)).cloned())
    }
}

#[async_trait]
impl ConsensusSnapshotProvider for MemoryStore {
    async fn write_consensus_snapshot_with_hack(
        &self,
        snapshot: &Snapshot,
        tx: &Transaction,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.consensus_snapshot = Some((snapshot.clone(), tx.payload_hash()));
        Ok(())
    }

    async fn read_last_consensus_snapshot_with_hack(
        &self,
    ) -> Result<Option<(Snapshot, Hash)>, StoreError> {
        Ok(self.inner.lock().unwrap().consensus_snapshot.clone())
    }
}

#[async_trait]
impl NodeProvider for MemoryStore {
    async fn read_all_nodes(
        &self,
        threshold: u64,
        include_pending: bool,
    ) -> Result<Vec<ConsensusNode>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut nodes: Vec<ConsensusNode> = inner
            .nodes
            .values()
            .filter(|n| n.timestamp <= threshold)
            .filter(|n| include_pending || n.state != NodeState::Pledging)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| (n.timestamp, n.signer.hash()));
        Ok(nodes)
    }

    async fn write_node(&self, node: &ConsensusNode) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.insert(node.signer.hash(), node.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_common::{
        config::{KERNEL_NODE_PLEDGE_PERIOD_MINIMUM, VELA_ASSET_ID},
        crypto::{Address, KeyPair},
    };

    fn node(state: NodeState, timestamp: u64) -> ConsensusNode {
        ConsensusNode {
            signer: Address::from_spend_key(KeyPair::generate().public),
            payee: Address::from_spend_key(KeyPair::generate().public),
            state,
            timestamp,
            transaction: Hash::zero(),
        }
    }

    #[tokio::test]
    async fn test_node_operation_lock_window() {
        let store = MemoryStore::new();
        let ttl = 2 * KERNEL_NODE_PLEDGE_PERIOD_MINIMUM;
        let first = Transaction::new(VELA_ASSET_ID);
        store
            .add_node_operation(&first, 100, ttl, false)
            .await
            .unwrap();
        // the same operation re-registers freely
        store
            .add_node_operation(&first, 200, ttl, false)
            .await
            .unwrap();

        let mut second = Transaction::new(VELA_ASSET_ID);
        second.extra = vec![1];
        let err = store
            .add_node_operation(&second, 150, ttl, false)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NodeOperationLocked(200 + ttl));
        // beyond the TTL the lock expires
        store
            .add_node_operation(&second, 200 + ttl, ttl, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_all_nodes_sorted_and_filtered() {
        let store = MemoryStore::new();
        let a = node(NodeState::Accepted, 30);
        let b = node(NodeState::Accepted, 10);
        let pledging = node(NodeState::Pledging, 20);
        for n in [&a, &b, &pledging] {
            store.write_node(n).await.unwrap();
        }

        let all = store.read_all_nodes(u64::MAX, true).await.unwrap();
        assert_eq!(
            all.iter().map(|n| n.timestamp).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );

        let without_pending = store.read_all_nodes(u64::MAX, false).await.unwrap();
        assert_eq!(without_pending.len(), 2);

        // threshold excludes later pledges
        let early = store.read_all_nodes(15, true).await.unwrap();
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].timestamp, 10);
    }
}
