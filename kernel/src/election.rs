use std::time::Duration;

use log::{debug, error, info};
use tokio::time::interval;

use vela_common::{
    config::{
        KERNEL_MINIMUM_NODES_COUNT, KERNEL_MINT_TIME_BEGIN, KERNEL_MINT_TIME_END,
        KERNEL_NODE_ACCEPT_PERIOD_MAXIMUM, KERNEL_NODE_ACCEPT_PERIOD_MINIMUM,
        KERNEL_NODE_ACCEPT_TIME_BEGIN, KERNEL_NODE_ACCEPT_TIME_END, KERNEL_NODE_PLEDGE_AMOUNT,
        KERNEL_NODE_PLEDGE_PERIOD_MINIMUM, MAX_KERNEL_NODES_COUNT, NANOS_PER_DAY, NANOS_PER_HOUR,
        SNAPSHOT_ROUND_GAP, SNAPSHOT_REFERENCE_THRESHOLD, VELA_ASSET_ID,
    },
    crypto::{hash, Hash, Key},
    integer::Integer,
    node::{ConsensusNode, NodeState},
    script::Script,
    snapshot::{RoundLink, Snapshot},
    store::StoreError,
    transaction::{OutputType, Transaction, TransactionType},
};

use crate::{
    chain::{CacheRound, Chain, FinalRound},
    error::KernelError,
    node::Node,
    storage::Store,
};

impl<S: Store> Node<S> {
    /// Deterministic choice of the node allowed to propose `op` at `now`.
    /// Pure in (op, day(now), accepted set); non-elected operation classes
    /// get the zero hash. The first and last accepted nodes are excluded
    /// from the rotation.
    pub async fn elect_snapshot_node(
        &self,
        op: TransactionType,
        now: u64,
    ) -> Result<Hash, KernelError> {
        match op {
            TransactionType::Mint
            | TransactionType::NodeRemove
            | TransactionType::NodePledge
            | TransactionType::CustodianUpdateNodes
            | TransactionType::CustodianSlashNodes => {}
            _ => return Ok(Hash::zero()),
        }
        let accepted = self.nodes_list_without_state(now, true).await?;
        if accepted.len() < KERNEL_MINIMUM_NODES_COUNT {
            panic!("corrupt accepted node set {}", accepted.len());
        }
        let accepted = &accepted[1..accepted.len() - 1];
        let day = (now.saturating_sub(self.epoch) / NANOS_PER_DAY) as usize;
        let idx = (day + op.code() as usize) % accepted.len();
        Ok(accepted[idx].id_for_network(&self.network_id))
    }

    fn epoch_hour(&self, timestamp: u64) -> u64 {
        timestamp.saturating_sub(self.epoch) / NANOS_PER_HOUR % 24
    }

    pub fn check_consensus_accept_hour(&self, timestamp: u64) -> bool {
        let hour = self.epoch_hour(timestamp);
        (KERNEL_NODE_ACCEPT_TIME_BEGIN..=KERNEL_NODE_ACCEPT_TIME_END).contains(&hour)
    }

    pub fn check_consensus_pledge_hour(&self, timestamp: u64) -> bool {
        let hour = self.epoch_hour(timestamp);
        let is_mint = (KERNEL_MINT_TIME_BEGIN..=KERNEL_MINT_TIME_END).contains(&hour);
        let is_accept =
            (KERNEL_NODE_ACCEPT_TIME_BEGIN..=KERNEL_NODE_ACCEPT_TIME_END).contains(&hour);
        !is_mint && !is_accept
    }

    /// One election loop per node: before the chain has any round history
    /// the node keeps trying to get itself accepted, afterwards it ticks the
    /// daily remove rotation. Non-elected ticks are expected rejections.
    pub async fn election_loop(&self) {
        let mut shutdown = self.shutdown_signal();
        let mut ticker = interval(Duration::from_secs(self.operation_period));

        let chain = match self.boot_chain(self.id_for_network).await {
            Ok(chain) => chain,
            Err(err) => {
                error!("election loop failed to boot chain: {}", err);
                return;
            }
        };
        while !chain.has_state().await {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.try_to_send_accept_transaction(&chain).await {
                        debug!("try_to_send_accept_transaction {}", err);
                    }
                }
            }
        }
        info!("election loop accepted");

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.try_to_send_remove_transaction().await {
                        debug!("try_to_send_remove_transaction {}", err);
                    }
                }
            }
        }
    }

    async fn check_remove_possibility(
        &self,
        node_id: Hash,
        now: u64,
        old: Option<&Transaction>,
    ) -> Result<ConsensusNode, KernelError> {
        if let Some(pledging) = self.pledging_node(now).await? {
            return Err(KernelError::StillPledging(pledging.signer.to_string()));
        }
        if now < self.epoch {
            return Err(KernelError::LocalTimeInvalid(now, self.epoch));
        }
        if !self.check_consensus_accept_hour(now) {
            return Err(KernelError::InvalidRemoveHour(self.epoch_hour(now)));
        }

        let old_hash = old.map(|tx| tx.payload_hash());
        let mut candidate: Option<ConsensusNode> = None;
        let mut accepted = Vec::new();
        for cn in self.nodes_list_without_state(now, false).await? {
            // adopt a concurrent proposal's candidate for idempotence
            if Some(cn.transaction) == old_hash {
                candidate = Some(cn);
                continue;
            }
            if now < cn.timestamp {
                return Err(KernelError::InvalidTimestamp(cn.timestamp, now));
            }
            let elapse = now - cn.timestamp;
            if elapse < KERNEL_NODE_PLEDGE_PERIOD_MINIMUM {
                return Err(KernelError::InvalidPeriod(
                    KERNEL_NODE_PLEDGE_PERIOD_MINIMUM,
                    elapse,
                    now,
                    cn.timestamp,
                ));
            }
            match cn.state {
                NodeState::Accepted => accepted.push(cn),
                NodeState::Cancelled | NodeState::Removed => {}
                _ => {
                    return Err(KernelError::InvalidNodePendingState(
                        cn.signer.to_string(),
                        cn.state,
                    ))
                }
            }
        }
        if accepted.len() <= KERNEL_MINIMUM_NODES_COUNT {
            return Err(KernelError::AllOldNodesRemoved(accepted.len()));
        }
        let candidate = candidate.unwrap_or_else(|| accepted[0].clone());
        if candidate.id_for_network(&self.network_id) == node_id {
            return Err(KernelError::RemoveBySelf);
        }
        Ok(candidate)
    }

    /// Rebuild the deterministic remove transaction for the oldest accepted
    /// node, or adopt the concurrent proposal `old` when it names a valid
    /// candidate.
    pub async fn build_node_remove_transaction(
        &self,
        node_id: Hash,
        timestamp: u64,
        old: Option<&Transaction>,
    ) -> Result<Transaction, KernelError> {
        let candidate = self.check_remove_possibility(node_id, timestamp, old).await?;
        if let Some(old) = old {
            if candidate.transaction == old.payload_hash() {
                return Ok(old.clone());
            }
        }

        let (accept, _) = self
            .store()
            .read_transaction(&candidate.transaction)
            .await?
            .ok_or(KernelError::AcceptNotAvailable(candidate.transaction))?;
        if accept.payload_hash() != candidate.transaction {
            return Err(KernelError::AcceptMalformed(
                candidate.transaction,
                accept.payload_hash(),
            ));
        }
        let signer = candidate.signer.public_spend_key;
        let payee = candidate.payee.public_spend_key;
        let mut expected = Vec::with_capacity(64);
        expected.extend_from_slice(signer.as_bytes());
        expected.extend_from_slice(payee.as_bytes());
        if accept.extra != expected {
            return Err(KernelError::InvalidAcceptExtra(format!(
                "{} {} {}",
                hex::encode(&accept.extra),
                signer,
                payee
            )));
        }

        let consensus = self
            .store()
            .read_last_consensus_snapshot_with_hack()
            .await?
            .ok_or(KernelError::NoConsensusSnapshot)?;
        let reference = consensus
            .0
            .sole_transaction()
            .ok_or(KernelError::NoConsensusSnapshot)?;

        let amount = accept
            .outputs
            .first()
            .map(|o| o.amount)
            .ok_or(KernelError::AcceptMalformed(
                candidate.transaction,
                accept.payload_hash(),
            ))?;
        let mut tx = Transaction::new(VELA_ASSET_ID);
        tx.add_input(candidate.transaction, 0);
        tx.extra = accept.extra.clone();
        let si = hash(format!("{}NODEREMOVE{}", candidate.payee, candidate.signer).as_bytes());
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(si.as_bytes());
        seed.extend_from_slice(si.as_bytes());
        tx.add_output_with_type(
            OutputType::NodeRemove,
            &[&candidate.payee],
            Script::new_threshold(1),
            amount,
            &seed,
        )?;
        tx.references = vec![reference];
        Ok(tx)
    }

    pub async fn try_to_send_remove_transaction(&self) -> Result<(), KernelError> {
        let timestamp = self.graph_timestamp();
        let elected = self
            .elect_snapshot_node(TransactionType::NodeRemove, timestamp)
            .await?;
        if elected != self.id_for_network {
            return Err(KernelError::RemoveElectionMismatch(
                timestamp,
                elected,
                self.id_for_network,
            ));
        }
        let tx = self
            .build_node_remove_transaction(self.id_for_network, timestamp, None)
            .await?;
        debug!("try_to_send_remove_transaction {}", tx.payload_hash());

        tx.validate(self.store().as_ref(), timestamp, false).await?;
        self.store().cache_put_transaction(&tx).await?;
        let chain = self.get_or_create_chain(self.id_for_network);
        let mut snapshot = Snapshot::new(self.id_for_network);
        snapshot.add_sole_transaction(tx.payload_hash());
        chain.append_self_empty(snapshot)
    }

    pub async fn validate_node_remove_snapshot(
        &self,
        snapshot: &Snapshot,
        tx: &Transaction,
        finalized: bool,
    ) -> Result<(), KernelError> {
        let mut timestamp = snapshot.timestamp;
        if snapshot.timestamp == 0 && snapshot.node_id == self.id_for_network {
            timestamp = self.now_ns();
        }
        let elected = self
            .elect_snapshot_node(TransactionType::NodeRemove, timestamp)
            .await?;
        if elected != snapshot.node_id {
            return Err(KernelError::RemoveElectionMismatch(
                timestamp,
                elected,
                snapshot.node_id,
            ));
        }

        // an already finalised removal replays as a no-op
        let signer = tx
            .node_extra_as_signer()
            .ok_or_else(|| KernelError::InvalidNodeExtra(hex::encode(&tx.extra)))?;
        let id = signer.hash().for_network(&self.network_id);
        for cn in self.store().read_all_nodes(u64::MAX, true).await? {
            if cn.state != NodeState::Removed {
                continue;
            }
            if cn.id_for_network(&self.network_id) != id {
                continue;
            }
            if finalized && cn.transaction == tx.payload_hash() {
                return Ok(());
            }
        }

        let rebuilt = self
            .build_node_remove_transaction(snapshot.node_id, timestamp, Some(tx))
            .await?;
        if rebuilt.payload_hash() != tx.payload_hash() {
            return Err(KernelError::RemoveRebuildMismatch(
                rebuilt.payload_hash(),
                tx.payload_hash(),
            ));
        }
        Ok(())
    }

    async fn check_node_accept_possibility(
        &self,
        chain: &Chain<S>,
        timestamp: u64,
        finalized: bool,
    ) -> Result<ConsensusNode, KernelError> {
        if let Some(state) = chain.state().await {
            return Err(KernelError::InvalidGraphRound(
                chain.chain_id,
                state.cache_round.number,
            ));
        }
        let ci = chain
            .consensus_info()
            .await
            .ok_or(KernelError::NoPledgingNode)?;
        let pledging = self
            .pledging_node(timestamp)
            .await?
            .ok_or(KernelError::NoPledgingNode)?;
        if pledging.signer != ci.signer {
            return Err(KernelError::PledgingNodeMismatch(
                pledging.signer.to_string(),
                ci.signer.to_string(),
            ));
        }

        if timestamp < self.epoch {
            return Err(KernelError::InvalidSnapshotTimestamp(self.epoch, timestamp));
        }
        if !self.check_consensus_accept_hour(timestamp) {
            return Err(KernelError::InvalidAcceptHour(self.epoch_hour(timestamp)));
        }

        let threshold = SNAPSHOT_ROUND_GAP * SNAPSHOT_REFERENCE_THRESHOLD;
        if !finalized && timestamp + threshold * 2 < self.graph_timestamp() {
            return Err(KernelError::InvalidSnapshotTimestamp(
                self.graph_timestamp(),
                timestamp,
            ));
        }

        if timestamp < pledging.timestamp {
            return Err(KernelError::InvalidSnapshotTimestamp(
                pledging.timestamp,
                timestamp,
            ));
        }
        let elapse = timestamp - pledging.timestamp;
        if elapse < KERNEL_NODE_ACCEPT_PERIOD_MINIMUM {
            return Err(KernelError::InvalidAcceptPeriod(
                KERNEL_NODE_ACCEPT_PERIOD_MINIMUM,
                elapse,
            ));
        }
        if elapse > KERNEL_NODE_ACCEPT_PERIOD_MAXIMUM {
            return Err(KernelError::InvalidAcceptPeriod(
                KERNEL_NODE_ACCEPT_PERIOD_MAXIMUM,
                elapse,
            ));
        }

        Ok(pledging)
    }

    /// Rebuild the deterministic accept transaction for the pledging node
    /// on a chain with no round history yet.
    pub async fn build_node_accept_transaction(
        &self,
        chain: &Chain<S>,
        timestamp: u64,
        finalized: bool,
    ) -> Result<Transaction, KernelError> {
        let ci = self
            .check_node_accept_possibility(chain, timestamp, finalized)
            .await?;

        let (pledge, _) = self
            .store()
            .read_transaction(&ci.transaction)
            .await?
            .ok_or(KernelError::PledgeNotAvailable(ci.transaction))?;
        if pledge.payload_hash() != ci.transaction {
            return Err(KernelError::PledgeMalformed(
                ci.transaction,
                pledge.payload_hash(),
            ));
        }
        let signer = ci.signer.public_spend_key;
        if pledge.extra.len() != signer.as_bytes().len() * 2 {
            return Err(KernelError::InvalidPledgeExtra(hex::encode(&pledge.extra)));
        }
        if pledge.extra[..32] != signer.as_bytes()[..] {
            return Err(KernelError::InvalidPledgeExtra(format!(
                "{} {}",
                hex::encode(&pledge.extra[..32]),
                signer
            )));
        }

        let consensus = self
            .store()
            .read_last_consensus_snapshot_with_hack()
            .await?
            .ok_or(KernelError::NoConsensusSnapshot)?;
        let reference = consensus
            .0
            .sole_transaction()
            .ok_or(KernelError::NoConsensusSnapshot)?;

        let amount = pledge
            .outputs
            .first()
            .map(|o| o.amount)
            .ok_or(KernelError::PledgeMalformed(
                ci.transaction,
                pledge.payload_hash(),
            ))?;
        let mut tx = Transaction::new(VELA_ASSET_ID);
        tx.add_input(ci.transaction, 0);
        tx.add_output_with_type(OutputType::NodeAccept, &[], Script::empty(), amount, &[])?;
        tx.extra = pledge.extra.clone();
        tx.references = vec![reference];
        Ok(tx)
    }

    pub async fn try_to_send_accept_transaction(
        &self,
        chain: &Chain<S>,
    ) -> Result<(), KernelError> {
        let now = self.now_ns();
        let tx = self.build_node_accept_transaction(chain, now, false).await?;
        debug!("try_to_send_accept_transaction {}", tx.payload_hash());

        tx.validate(self.store().as_ref(), now, false).await?;
        self.store().cache_put_transaction(&tx).await?;
        let mut snapshot = Snapshot::new(chain.chain_id);
        snapshot.add_sole_transaction(tx.payload_hash());
        chain.append_self_empty(snapshot)?;
        info!("try_to_send_accept_transaction {}", tx.payload_hash());
        Ok(())
    }

    pub async fn validate_node_accept_snapshot(
        &self,
        snapshot: &Snapshot,
        tx: &Transaction,
        finalized: bool,
    ) -> Result<(), KernelError> {
        let mut timestamp = snapshot.timestamp;
        if timestamp == 0 && snapshot.node_id == self.id_for_network {
            timestamp = self.now_ns();
        }
        if snapshot.round_number != 0 {
            return Err(KernelError::InvalidSnapshotRound(snapshot.round_number));
        }

        let chain = self.boot_chain(snapshot.node_id).await?;
        let rebuilt = self
            .build_node_accept_transaction(&chain, timestamp, finalized)
            .await?;
        if rebuilt.payload_hash() != tx.payload_hash() {
            return Err(KernelError::AcceptRebuildMismatch(
                rebuilt.payload_hash(),
                tx.payload_hash(),
            ));
        }
        Ok(())
    }

    pub async fn validate_node_pledge_snapshot(
        &self,
        snapshot: &Snapshot,
        tx: &Transaction,
        finalized: bool,
    ) -> Result<(), KernelError> {
        let mut timestamp = snapshot.timestamp;
        if snapshot.timestamp == 0 && snapshot.node_id == self.id_for_network {
            timestamp = self.now_ns();
        }
        let elected = self
            .elect_snapshot_node(TransactionType::NodePledge, timestamp)
            .await?;
        if elected != snapshot.node_id {
            return Err(KernelError::PledgeElectionMismatch(
                timestamp,
                elected,
                snapshot.node_id,
            ));
        }

        if timestamp < self.epoch {
            return Err(KernelError::InvalidSnapshotTimestamp(self.epoch, timestamp));
        }
        if !self.check_consensus_pledge_hour(timestamp) {
            return Err(KernelError::InvalidPledgeHour(self.epoch_hour(timestamp)));
        }
        let amount = tx
            .outputs
            .first()
            .map(|o| o.amount)
            .unwrap_or_else(Integer::zero);
        if amount != KERNEL_NODE_PLEDGE_AMOUNT {
            return Err(KernelError::InvalidPledgeAmount(amount));
        }
        if tx.extra.len() < 32 {
            return Err(KernelError::InvalidNodeExtra(hex::encode(&tx.extra)));
        }
        let signer_spend = Key::new(tx.extra[..32].try_into().unwrap());

        let mut total_nodes = 0usize;
        let offset = timestamp + KERNEL_NODE_PLEDGE_PERIOD_MINIMUM;
        for cn in self.nodes_list_without_state(offset, false).await? {
            if cn.transaction == tx.payload_hash() {
                return Ok(());
            }
            if cn.timestamp > timestamp {
                return Err(KernelError::InvalidSnapshotTimestamp(
                    cn.timestamp,
                    timestamp,
                ));
            }
            let elapse = timestamp - cn.timestamp;
            if elapse < KERNEL_NODE_PLEDGE_PERIOD_MINIMUM {
                return Err(KernelError::InvalidPledgePeriod(
                    KERNEL_NODE_PLEDGE_PERIOD_MINIMUM,
                    elapse,
                ));
            }
            if cn.signer.public_spend_key == signer_spend {
                return Err(KernelError::InvalidNodeSignerKey(
                    hex::encode(&tx.extra),
                    cn.signer.to_string(),
                ));
            }
            if cn.payee.public_spend_key == signer_spend {
                return Err(KernelError::InvalidNodeSignerKey(
                    hex::encode(&tx.extra),
                    cn.payee.to_string(),
                ));
            }
            match cn.state {
                NodeState::Accepted => total_nodes += 1,
                NodeState::Removed | NodeState::Cancelled => {}
                _ => {
                    return Err(KernelError::InvalidNodePendingState(
                        cn.signer.to_string(),
                        cn.state,
                    ))
                }
            }
        }

        if total_nodes >= MAX_KERNEL_NODES_COUNT {
            return Err(KernelError::MaxNodesCountReached(tx.payload_hash()));
        }
        // TODO tune the operation lock threshold against the pledge period
        self.store()
            .add_node_operation(
                tx,
                timestamp,
                2 * KERNEL_NODE_PLEDGE_PERIOD_MINIMUM,
                finalized,
            )
            .await?;
        Ok(())
    }

    pub async fn validate_node_cancel_snapshot(
        &self,
        snapshot: &Snapshot,
        tx: &Transaction,
        finalized: bool,
    ) -> Result<(), KernelError> {
        let mut timestamp = snapshot.timestamp;
        if snapshot.timestamp == 0 && snapshot.node_id == self.id_for_network {
            timestamp = self.now_ns();
        }
        if timestamp < self.epoch {
            return Err(KernelError::InvalidSnapshotTimestamp(self.epoch, timestamp));
        }

        let pledging = self
            .pledging_node(timestamp)
            .await?
            .ok_or(KernelError::InvalidConsensusStatus)?;

        if !self.check_consensus_accept_hour(timestamp) {
            return Err(KernelError::InvalidCancelHour(self.epoch_hour(timestamp)));
        }

        let threshold = SNAPSHOT_ROUND_GAP * SNAPSHOT_REFERENCE_THRESHOLD;
        if !finalized && timestamp + threshold * 2 < self.graph_timestamp() {
            return Err(KernelError::InvalidSnapshotTimestamp(
                self.graph_timestamp(),
                timestamp,
            ));
        }

        if timestamp < pledging.timestamp {
            return Err(KernelError::InvalidSnapshotTimestamp(
                pledging.timestamp,
                timestamp,
            ));
        }
        let elapse = timestamp - pledging.timestamp;
        if elapse < KERNEL_NODE_ACCEPT_PERIOD_MINIMUM {
            return Err(KernelError::InvalidCancelPeriod(
                KERNEL_NODE_ACCEPT_PERIOD_MINIMUM,
                elapse,
            ));
        }
        if elapse > KERNEL_NODE_ACCEPT_PERIOD_MAXIMUM {
            return Err(KernelError::InvalidCancelPeriod(
                KERNEL_NODE_ACCEPT_PERIOD_MAXIMUM,
                elapse,
            ));
        }

        self.store()
            .add_node_operation(
                tx,
                timestamp,
                2 * KERNEL_NODE_PLEDGE_PERIOD_MINIMUM,
                finalized,
            )
            .await?;
        Ok(())
    }

    /// Bootstrap the accepted node's chain: seal round 0 with the accept
    /// snapshot, open round 1 referencing the nearest genesis chain, and
    /// step the chain state forward. Failures here mean storage corruption.
    pub async fn finalize_node_accept_snapshot(
        &self,
        snapshot: &Snapshot,
        signers: &[Hash],
    ) -> Result<(), KernelError> {
        info!("finalize_node_accept_snapshot({})", snapshot.node_id);
        if snapshot.round_number != 0 {
            panic!("finalize accept on round {}", snapshot.round_number);
        }
        let cache = CacheRound {
            node_id: snapshot.node_id,
            number: snapshot.round_number,
            timestamp: snapshot.timestamp,
            references: None,
            snapshots: vec![snapshot.clone()],
        };
        if let Err(err) = self
            .store()
            .start_new_round(&cache.node_id, cache.number, None, 0)
            .await
        {
            panic!("start round 0 for {}: {}", snapshot.node_id, err);
        }

        if let Err(err) = self.store().topo_write(snapshot, signers).await {
            panic!("topology write for {}: {}", snapshot.node_id, err);
        }

        let sealed = cache.as_final();
        let external = match self.get_initial_external_reference(snapshot).await {
            Ok(external) => external,
            Err(err) => panic!("initial external reference: {}", err),
        };
        let cache = CacheRound {
            node_id: snapshot.node_id,
            number: 1,
            timestamp: snapshot.timestamp + SNAPSHOT_ROUND_GAP + 1,
            references: Some(RoundLink {
                self_hash: sealed.hash,
                external: external.hash,
            }),
            snapshots: Vec::new(),
        };
        if let Err(err) = self
            .store()
            .start_new_round(&cache.node_id, cache.number, cache.references, sealed.start)
            .await
        {
            panic!("start round 1 for {}: {}", snapshot.node_id, err);
        }

        let chain = self.boot_chain(snapshot.node_id).await?;
        chain.assign_new_graph_round(sealed, cache).await;
        Ok(())
    }

    /// The genesis node whose id is nearest to the snapshot's node in the
    /// (|a − b|) mod 100 metric; ties break by genesis list order.
    async fn get_initial_external_reference(
        &self,
        snapshot: &Snapshot,
    ) -> Result<FinalRound, KernelError> {
        let mut external = *self.genesis_nodes.first().ok_or_else(|| {
            StoreError::Corrupted("no genesis nodes configured".to_string())
        })?;
        let mut distance = node_distance(&snapshot.node_id, &external);
        for id in &self.genesis_nodes {
            let nd = node_distance(&snapshot.node_id, id);
            if nd < distance {
                distance = nd;
                external = *id;
            }
        }

        let round = self
            .store()
            .read_round(&external, 0)
            .await?
            .ok_or_else(|| {
                StoreError::Corrupted(format!("missing genesis round for {}", external))
            })?;
        Ok(FinalRound::from_stored(&round))
    }

    /// Pin a finalised consensus-relevant snapshot and refresh the node and
    /// chain state it affects.
    pub async fn reload_consensus_state(
        &self,
        snapshot: &Snapshot,
        tx: &Transaction,
    ) -> Result<(), KernelError> {
        let tx_type = tx.transaction_type();
        match tx_type {
            TransactionType::Mint => {
                self.store()
                    .write_consensus_snapshot_with_hack(snapshot, tx)
                    .await?;
                return Ok(());
            }
            TransactionType::NodePledge
            | TransactionType::NodeCancel
            | TransactionType::NodeAccept
            | TransactionType::NodeRemove
            | TransactionType::CustodianUpdateNodes
            | TransactionType::CustodianSlashNodes => {
                self.store()
                    .write_consensus_snapshot_with_hack(snapshot, tx)
                    .await?;
            }
            _ => return Ok(()),
        }
        info!(
            "reload_consensus_state({}, {})",
            snapshot.payload_hash(),
            tx.payload_hash()
        );
        self.apply_node_transaction(snapshot, tx).await?;

        let chain = self.boot_chain(snapshot.node_id).await?;
        if chain.consensus_info().await.is_none() {
            panic!("should never be here");
        }
        match tx_type {
            TransactionType::NodePledge
            | TransactionType::NodeAccept
            | TransactionType::NodeRemove => {}
            _ => return Ok(()),
        }

        let signer = tx
            .node_extra_as_signer()
            .ok_or_else(|| KernelError::InvalidNodeExtra(hex::encode(&tx.extra)))?;
        let id = signer.hash().for_network(&self.network_id);
        if id == snapshot.node_id {
            return Ok(());
        }
        let chain = self.boot_chain(id).await?;
        if chain.consensus_info().await.is_none() {
            panic!("should never be here");
        }
        Ok(())
    }

    /// Materialise the membership transition a finalised node transaction
    /// carries: the signer's record moves to the state the transaction
    /// type names, stamped with the snapshot time.
    async fn apply_node_transaction(
        &self,
        snapshot: &Snapshot,
        tx: &Transaction,
    ) -> Result<(), KernelError> {
        let state = match tx.transaction_type() {
            TransactionType::NodePledge => NodeState::Pledging,
            TransactionType::NodeAccept => NodeState::Accepted,
            TransactionType::NodeCancel => NodeState::Cancelled,
            TransactionType::NodeRemove => NodeState::Removed,
            _ => return Ok(()),
        };
        if tx.extra.len() != 64 {
            return Err(KernelError::InvalidNodeExtra(hex::encode(&tx.extra)));
        }
        let signer = tx
            .node_extra_as_signer()
            .ok_or_else(|| KernelError::InvalidNodeExtra(hex::encode(&tx.extra)))?;
        let payee = vela_common::crypto::Address::from_spend_key(Key::new(
            tx.extra[32..64].try_into().unwrap(),
        ));
        let timestamp = if snapshot.timestamp == 0 {
            self.now_ns()
        } else {
            snapshot.timestamp
        };
        let node = ConsensusNode {
            signer,
            payee,
            state,
            timestamp,
            transaction: tx.payload_hash(),
        };
        self.store().write_node(&node).await?;
        Ok(())
    }
}

fn node_distance(a: &Hash, b: &Hash) -> u32 {
    let (hi, lo) = if a.as_bytes() >= b.as_bytes() {
        (a.as_bytes(), b.as_bytes())
    } else {
        (b.as_bytes(), a.as_bytes())
    };
    // |a − b| over the 256-bit big-endian values
    let mut diff = [0u8; 32];
    let mut borrow = 0u16;
    for i in (0..32).rev() {
        let h = hi[i] as u16;
        let l = lo[i] as u16 + borrow;
        if h >= l {
            diff[i] = (h - l) as u8;
            borrow = 0;
        } else {
            diff[i] = (h + 256 - l) as u8;
            borrow = 1;
        }
    }
    // fold the difference mod 100
    let mut acc = 0u32;
    for byte in diff {
        acc = (acc * 256 + byte as u32) % 100;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_distance_symmetric() {
        let a = hash(b"a");
        let b = hash(b"b");
        assert_eq!(node_distance(&a, &b), node_distance(&b, &a));
        assert_eq!(node_distance(&a, &a), 0);
        assert!(node_distance(&a, &b) < 100);
    }

    #[test]
    fn test_node_distance_small_values() {
        let mut x = [0u8; 32];
        x[31] = 7;
        let mut y = [0u8; 32];
        y[31] = 250;
        // |250 − 7| mod 100 = 43
        assert_eq!(node_distance(&Hash::new(x), &Hash::new(y)), 43);
    }
}
