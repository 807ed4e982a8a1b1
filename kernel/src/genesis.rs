use std::{collections::HashSet, path::Path};

use serde::Deserialize;
use thiserror::Error;

use vela_common::{
    config::{
        KERNEL_MINIMUM_NODES_COUNT, KERNEL_NODE_PLEDGE_AMOUNT, NANOS_PER_SECOND, VELA_ASSET_ID,
    },
    crypto::{Address, Hash},
    integer::Integer,
    node::{ConsensusNode, NodeState},
    script::Script,
    snapshot::{Snapshot, SnapshotWithTopologicalOrder},
    store::CustodianState,
    transaction::{Input, Output, OutputType, Transaction},
};

use crate::{
    error::KernelError,
    storage::{
        ConsensusSnapshotProvider, MemoryStore, NodeProvider, RoundProvider, TopologyProvider,
    },
};

/// Errors that can occur while loading and validating the genesis document
#[derive(Error, Debug)]
pub enum GenesisError {
    #[error("Genesis file not found: {0}")]
    FileNotFound(String),
    #[error("JSON parse error: {0}")]
    JsonParseError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid genesis nodes count: {0}")]
    InvalidNodesCount(usize),
    #[error("Duplicate signer in genesis: {0}")]
    DuplicateSigner(String),
    #[error("Invalid genesis balance for {0}: {1}")]
    InvalidBalance(String, Integer),
    #[error("Invalid genesis epoch: {0}")]
    InvalidEpoch(u64),
    #[error("Non-deterministic view key for {0}")]
    InvalidViewKey(String),
    #[error("Custodian account {0} is also a genesis node signer")]
    CustodianIsNode(String),
}

#[derive(Debug, Deserialize)]
pub struct GenesisNode {
    pub signer: Address,
    pub payee: Address,
    pub balance: Integer,
}

/// Root structure of `<configDir>/genesis.json`
#[derive(Debug, Deserialize)]
pub struct Genesis {
    /// Network start, unix seconds
    pub epoch: u64,
    pub nodes: Vec<GenesisNode>,
    /// The account custodian updates must be approved by
    pub custodian: Address,
}

impl Genesis {
    pub fn epoch_ns(&self) -> u64 {
        self.epoch * NANOS_PER_SECOND
    }

    fn validate(&self) -> Result<(), GenesisError> {
        if self.epoch == 0 {
            return Err(GenesisError::InvalidEpoch(self.epoch));
        }
        if self.nodes.len() < KERNEL_MINIMUM_NODES_COUNT {
            return Err(GenesisError::InvalidNodesCount(self.nodes.len()));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.signer.public_spend_key) {
                return Err(GenesisError::DuplicateSigner(node.signer.to_string()));
            }
            if node.balance != KERNEL_NODE_PLEDGE_AMOUNT {
                return Err(GenesisError::InvalidBalance(
                    node.signer.to_string(),
                    node.balance,
                ));
            }
            // node transactions carry only spend keys in their extra, so
            // node addresses must use the derived view key
            for address in [&node.signer, &node.payee] {
                if *address != Address::from_spend_key(address.public_spend_key) {
                    return Err(GenesisError::InvalidViewKey(address.to_string()));
                }
            }
            if node.signer.public_spend_key == self.custodian.public_spend_key {
                return Err(GenesisError::CustodianIsNode(self.custodian.to_string()));
            }
        }
        Ok(())
    }
}

pub fn read_genesis(path: &Path) -> Result<Genesis, GenesisError> {
    if !path.exists() {
        return Err(GenesisError::FileNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    let genesis: Genesis = serde_json::from_str(&content)?;
    genesis.validate()?;
    Ok(genesis)
}

/// Rebuild the canonical initial sequence: one accept transaction and one
/// round-0 snapshot per genesis node, in genesis order, all stamped at the
/// epoch. The construction is deterministic, so every node derives the same
/// sequence from the same document.
#[allow(clippy::type_complexity)]
pub fn build_genesis_snapshots(
    network_id: &Hash,
    epoch_ns: u64,
    genesis: &Genesis,
) -> Result<
    (
        Vec<Transaction>,
        Vec<SnapshotWithTopologicalOrder>,
        Vec<ConsensusNode>,
    ),
    GenesisError,
> {
    let mut transactions = Vec::with_capacity(genesis.nodes.len());
    let mut snapshots = Vec::with_capacity(genesis.nodes.len());
    let mut nodes = Vec::with_capacity(genesis.nodes.len());

    for (order, gn) in genesis.nodes.iter().enumerate() {
        let mut tx = Transaction::new(VELA_ASSET_ID);
        tx.inputs
            .push(Input::Genesis(network_id.as_bytes().to_vec()));
        tx.outputs.push(Output {
            output_type: OutputType::NodeAccept,
            amount: gn.balance,
            keys: Vec::new(),
            script: Script::empty(),
            mask: None,
            withdrawal: None,
        });
        let mut extra = Vec::with_capacity(64);
        extra.extend_from_slice(gn.signer.public_spend_key.as_bytes());
        extra.extend_from_slice(gn.payee.public_spend_key.as_bytes());
        tx.extra = extra;

        let node_id = gn.signer.hash().for_network(network_id);
        let mut snapshot = Snapshot::new(node_id);
        snapshot.timestamp = epoch_ns;
        snapshot.add_sole_transaction(tx.payload_hash());

        nodes.push(ConsensusNode {
            signer: gn.signer,
            payee: gn.payee,
            state: NodeState::Accepted,
            timestamp: epoch_ns,
            transaction: tx.payload_hash(),
        });
        transactions.push(tx);
        snapshots.push(SnapshotWithTopologicalOrder {
            snapshot,
            topological_order: order as u64,
        });
    }

    Ok((transactions, snapshots, nodes))
}

/// Materialise the genesis sequence into a fresh in-memory store: the
/// transactions and their UTXOs, the node set, one round per chain, the
/// topology, and the pinned consensus snapshot. Returns the genesis chain
/// ids in genesis order.
pub async fn bootstrap(
    store: &MemoryStore,
    network_id: &Hash,
    genesis: &Genesis,
) -> Result<Vec<Hash>, KernelError> {
    let epoch_ns = genesis.epoch_ns();
    let (transactions, snapshots, nodes) = build_genesis_snapshots(network_id, epoch_ns, genesis)?;

    let mut chain_ids = Vec::with_capacity(nodes.len());
    for ((tx, snapshot), node) in transactions.iter().zip(&snapshots).zip(&nodes) {
        let snapshot_id = snapshot.snapshot.payload_hash().to_hex();
        store.apply_transaction(tx, &snapshot_id);
        store
            .start_new_round(&snapshot.snapshot.node_id, 0, None, epoch_ns)
            .await?;
        store
            .topo_write(&snapshot.snapshot, &[snapshot.snapshot.node_id])
            .await?;
        store.write_node(node).await?;
        chain_ids.push(snapshot.snapshot.node_id);
    }

    let last = snapshots.len() - 1;
    store
        .write_consensus_snapshot_with_hack(&snapshots[last].snapshot, &transactions[last])
        .await?;
    store.set_custodian(CustodianState {
        custodian: genesis.custodian,
        transaction: transactions[last].payload_hash(),
        timestamp: epoch_ns,
    });
    Ok(chain_ids)
}
