use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use tokio::sync::watch;

use vela_common::{
    config::KERNEL_OPERATION_PERIOD,
    crypto::{Address, Hash},
    node::{ConsensusNode, NodeState},
};

use crate::{chain::Chain, clock::Clock, error::KernelError, storage::Store};

/// A kernel node: identity, injected clock, store handle and the per-node
/// chain map. One election loop runs per node.
pub struct Node<S> {
    pub network_id: Hash,
    pub id_for_network: Hash,
    pub signer: Address,
    /// Network start, nanoseconds
    pub epoch: u64,
    pub genesis_nodes: Vec<Hash>,
    /// Election loop tick, seconds
    pub operation_period: u64,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    graph_timestamp: Arc<AtomicU64>,
    chains: Mutex<HashMap<Hash, Arc<Chain<S>>>>,
    shutdown: watch::Sender<bool>,
}

impl<S: Store> Node<S> {
    pub fn new(
        network_id: Hash,
        signer: Address,
        epoch: u64,
        genesis_nodes: Vec<Hash>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let id_for_network = signer.hash().for_network(&network_id);
        Node {
            network_id,
            id_for_network,
            signer,
            epoch,
            genesis_nodes,
            operation_period: KERNEL_OPERATION_PERIOD,
            store,
            clock,
            graph_timestamp: Arc::new(AtomicU64::new(0)),
            chains: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    /// Timestamp of the latest finalised snapshot seen on any chain.
    pub fn graph_timestamp(&self) -> u64 {
        self.graph_timestamp.load(Ordering::SeqCst).max(self.epoch)
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn get_or_create_chain(&self, chain_id: Hash) -> Arc<Chain<S>> {
        let mut chains = self.chains.lock().unwrap();
        chains
            .entry(chain_id)
            .or_insert_with(|| {
                Arc::new(Chain::new(
                    chain_id,
                    self.store.clone(),
                    self.graph_timestamp.clone(),
                ))
            })
            .clone()
    }

    /// Create the chain and load its round state and consensus info.
    pub async fn boot_chain(&self, chain_id: Hash) -> Result<Arc<Chain<S>>, KernelError> {
        let chain = self.get_or_create_chain(chain_id);
        chain.load_state(&self.network_id).await?;
        Ok(chain)
    }

    /// Consensus node list as of `threshold`, sorted by (timestamp, id).
    pub async fn nodes_list_without_state(
        &self,
        threshold: u64,
        only_accepted: bool,
    ) -> Result<Vec<ConsensusNode>, KernelError> {
        let mut nodes = self.store.read_all_nodes(threshold, true).await?;
        if only_accepted {
            nodes.retain(|n| n.state == NodeState::Accepted);
        }
        Ok(nodes)
    }

    /// The unique node currently in the pledging state, if any.
    pub async fn pledging_node(&self, now: u64) -> Result<Option<ConsensusNode>, KernelError> {
        let nodes = self.store.read_all_nodes(now, true).await?;
        Ok(nodes.into_iter().find(|n| n.state == NodeState::Pledging))
    }
}
