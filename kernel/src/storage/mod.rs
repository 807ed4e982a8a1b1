mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use vela_common::{
    crypto::Hash,
    node::ConsensusNode,
    snapshot::{RoundLink, Snapshot, SnapshotWithTopologicalOrder},
    store::{DataStore, StoreError},
    transaction::Transaction,
};

/// Round record as the store keeps it; the chain layer turns these into
/// cache/final rounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRound {
    pub node_id: Hash,
    pub number: u64,
    pub start: u64,
    pub references: Option<RoundLink>,
}

#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn cache_put_transaction(&self, tx: &Transaction) -> Result<(), StoreError>;
    async fn cache_get_transaction(&self, hash: &Hash) -> Result<Option<Transaction>, StoreError>;
}

#[async_trait]
pub trait TopologyProvider: Send + Sync {
    async fn read_snapshots_since_topology(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StoreError>;

    async fn read_snapshots_for_node_round(
        &self,
        node_id: &Hash,
        round: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StoreError>;

    /// Append a finalised snapshot to the global topology, returning its
    /// sequence number.
    async fn topo_write(&self, snapshot: &Snapshot, signers: &[Hash]) -> Result<u64, StoreError>;

    async fn topo_sequence(&self) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RoundProvider: Send + Sync {
    async fn start_new_round(
        &self,
        node_id: &Hash,
        number: u64,
        references: Option<RoundLink>,
        start: u64,
    ) -> Result<(), StoreError>;

    async fn read_round(&self, node_id: &Hash, number: u64)
        -> Result<Option<StoredRound>, StoreError>;

    async fn read_last_round(&self, node_id: &Hash) -> Result<Option<StoredRound>, StoreError>;
}

/// Provisional snapshot-pinning primitive: remembers the latest finalised
/// consensus-relevant snapshot and its sole transaction hash, nothing more.
#[async_trait]
pub trait ConsensusSnapshotProvider: Send + Sync {
    async fn write_consensus_snapshot_with_hack(
        &self,
        snapshot: &Snapshot,
        tx: &Transaction,
    ) -> Result<(), StoreError>;

    async fn read_last_consensus_snapshot_with_hack(
        &self,
    ) -> Result<Option<(Snapshot, Hash)>, StoreError>;
}

#[async_trait]
pub trait NodeProvider: Send + Sync {
    /// All consensus nodes pledged no later than `threshold`, sorted by
    /// (timestamp, network id). `include_pending` keeps the pledging node in
    /// the list.
    async fn read_all_nodes(
        &self,
        threshold: u64,
        include_pending: bool,
    ) -> Result<Vec<ConsensusNode>, StoreError>;

    /// Upsert a node record, keyed by its signer.
    async fn write_node(&self, node: &ConsensusNode) -> Result<(), StoreError>;
}

/// Everything the kernel needs from the persistence layer.
pub trait Store:
    DataStore
    + CacheProvider
    + TopologyProvider
    + RoundProvider
    + ConsensusSnapshotProvider
    + NodeProvider
{
}

impl<T> Store for T where
    T: DataStore
        + CacheProvider
        + TopologyProvider
        + RoundProvider
        + ConsensusSnapshotProvider
        + NodeProvider
{
}
