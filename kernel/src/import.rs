use std::{path::Path, sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
    sync::watch,
    task::JoinSet,
    time::{interval, sleep, Instant},
};

use vela_common::{
    snapshot::SnapshotWithTopologicalOrder, store::StoreError, transaction::Transaction,
};

use crate::{
    chain::Chain,
    error::KernelError,
    genesis::{build_genesis_snapshots, read_genesis},
    node::Node,
    storage::Store,
};

// An importer may run at most this many rounds ahead of the locally
// finalised round before backing off
const IMPORT_ROUND_AHEAD: u64 = 16;
const IMPORT_BACKOFF: Duration = Duration::from_secs(3);
const REPORT_PERIOD: Duration = Duration::from_secs(10);

impl<S: Store + 'static> Node<S> {
    /// Bootstrap this kernel from another node's store: verify the local
    /// genesis matches the expected sequence, then replay every source
    /// chain's snapshots in round order, one importer task per chain.
    pub async fn import<T: Store + 'static>(
        &self,
        config_dir: &Path,
        source: Arc<T>,
    ) -> Result<(), KernelError> {
        let genesis = read_genesis(&config_dir.join("genesis.json"))?;
        let (_, expected, _) =
            build_genesis_snapshots(&self.network_id, genesis.epoch_ns(), &genesis)?;
        let local = self.store().read_snapshots_since_topology(0, 100).await?;
        if expected.len() != local.len() {
            return Err(KernelError::AlreadyInitialized(expected.len(), local.len()));
        }
        for (i, (gs, ks)) in expected.iter().zip(local.iter()).enumerate() {
            if gs.snapshot.payload_hash() != ks.snapshot.payload_hash() {
                return Err(KernelError::GenesisMismatch(
                    i,
                    gs.snapshot.payload_hash(),
                    ks.snapshot.payload_hash(),
                ));
            }
        }

        let nodes = source.read_all_nodes(self.now_ns(), false).await?;
        let mut importers = JoinSet::new();
        for cn in nodes {
            let id = cn.id_for_network(&self.network_id);
            let chain = self.boot_chain(id).await?;
            let source = source.clone();
            let shutdown = self.shutdown_signal();
            importers.spawn(async move {
                let result = import_from(chain, source, shutdown).await;
                match &result {
                    Ok(total) => info!("node {} import finished with {} rounds", id, total),
                    Err(err) => warn!("node {} import failed: {}", id, err),
                }
                result.map(|_| ())
            });
        }

        let started = Instant::now();
        let mut reporter = interval(REPORT_PERIOD);
        let mut shutdown = self.shutdown_signal();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Err(KernelError::ImportInterrupted),
                _ = reporter.tick() => {
                    let seq = self.store().topo_sequence().await?;
                    let sps = seq as f64 / started.elapsed().as_secs_f64().max(1.0);
                    info!("TOPO {} SPS {:.2}", seq, sps);
                }
                joined = importers.join_next() => match joined {
                    None => return Ok(()),
                    Some(Ok(result)) => result?,
                    Some(Err(err)) => {
                        return Err(StoreError::Corrupted(err.to_string()).into())
                    }
                }
            }
        }
    }
}

/// Walk a source chain's rounds from 0 and replay every snapshot, staying
/// no more than IMPORT_ROUND_AHEAD rounds past the locally finalised round.
/// Returns the first round the source had no snapshots for.
async fn import_from<S: Store, T: Store>(
    chain: Arc<Chain<S>>,
    source: Arc<T>,
    shutdown: watch::Receiver<bool>,
) -> Result<u64, KernelError> {
    let mut threshold = 0u64;
    let mut round = 0u64;
    loop {
        if *shutdown.borrow() {
            return Err(KernelError::ImportInterrupted);
        }
        if round > threshold + IMPORT_ROUND_AHEAD {
            sleep(IMPORT_BACKOFF).await;
            if let Some(state) = chain.state().await {
                threshold = state.final_round.number;
            }
            continue;
        }

        let snapshots = source
            .read_snapshots_for_node_round(&chain.chain_id, round)
            .await?;
        if snapshots.is_empty() {
            return Ok(round);
        }
        for s in &snapshots {
            let tx_hash = s
                .transaction()
                .ok_or(KernelError::SnapshotWithoutSoleTransaction(round))?;
            let (tx, _) = source.read_transaction(&tx_hash).await?.ok_or_else(|| {
                StoreError::Corrupted(format!("source transaction missing {}", tx_hash))
            })?;
            import_snapshot(&chain, s, &tx, &shutdown).await?;
        }
        if let Some(state) = chain.state().await {
            threshold = state.final_round.number;
        }
        round += 1;
    }
}

async fn import_snapshot<S: Store>(
    chain: &Chain<S>,
    s: &SnapshotWithTopologicalOrder,
    tx: &Transaction,
    shutdown: &watch::Receiver<bool>,
) -> Result<(), KernelError> {
    let tx_hash = s
        .transaction()
        .ok_or(KernelError::SnapshotWithoutSoleTransaction(s.snapshot.round_number))?;
    if tx_hash != tx.payload_hash() {
        return Err(KernelError::MalformedTransactionHash(
            tx_hash,
            tx.payload_hash(),
        ));
    }
    let store = chain.store();
    if store.cache_get_transaction(&tx_hash).await?.is_none() {
        store.cache_put_transaction(tx).await?;
    }

    loop {
        match chain.append_final_snapshot(&s.snapshot).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if *shutdown.borrow() {
                    return Err(KernelError::ImportInterrupted);
                }
                debug!(
                    "append final snapshot retry {}: {}",
                    s.snapshot.payload_hash(),
                    err
                );
                sleep(IMPORT_BACKOFF).await;
            }
        }
    }
}
