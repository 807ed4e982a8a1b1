use std::sync::Arc;

use vela_common::{
    config::{
        KERNEL_NODE_ACCEPT_PERIOD_MAXIMUM, KERNEL_NODE_ACCEPT_PERIOD_MINIMUM,
        KERNEL_NODE_PLEDGE_AMOUNT, NANOS_PER_DAY, NANOS_PER_HOUR, VELA_ASSET_ID,
    },
    crypto::{hash, Address, Hash, KeyPair},
    node::{ConsensusNode, NodeState},
    script::Script,
    snapshot::Snapshot,
    transaction::{Output, OutputType, Transaction, TransactionType},
};
use vela_kernel::{
    clock::MockClock,
    genesis::{bootstrap, Genesis, GenesisNode},
    node::Node,
    storage::{CacheProvider, MemoryStore, NodeProvider, RoundProvider, TopologyProvider},
};

const EPOCH_SECONDS: u64 = 1_600_000_000;

struct Fixture {
    store: Arc<MemoryStore>,
    network_id: Hash,
    chain_ids: Vec<Hash>,
    signers: Vec<KeyPair>,
    clock: Arc<MockClock>,
    epoch_ns: u64,
}

async fn setup(count: usize) -> Fixture {
    let signers: Vec<KeyPair> = (0..count).map(|_| KeyPair::generate()).collect();
    let genesis = Genesis {
        epoch: EPOCH_SECONDS,
        nodes: signers
            .iter()
            .map(|signer| GenesisNode {
                signer: Address::from_spend_key(signer.public),
                payee: Address::from_spend_key(KeyPair::generate().public),
                balance: KERNEL_NODE_PLEDGE_AMOUNT,
            })
            .collect(),
        custodian: Address::from_spend_key(KeyPair::generate().public),
    };
    let store = Arc::new(MemoryStore::new());
    let network_id = hash(b"vela test network");
    let chain_ids = bootstrap(&store, &network_id, &genesis).await.unwrap();
    let epoch_ns = genesis.epoch_ns();
    Fixture {
        store,
        network_id,
        chain_ids,
        signers,
        clock: Arc::new(MockClock::new(epoch_ns)),
        epoch_ns,
    }
}

impl Fixture {
    fn node_for(&self, index: usize) -> Node<MemoryStore> {
        Node::new(
            self.network_id,
            Address::from_spend_key(self.signers[index].public),
            self.epoch_ns,
            self.chain_ids.clone(),
            self.store.clone(),
            self.clock.clone(),
        )
    }

    fn node_by_id(&self, id: Hash) -> Node<MemoryStore> {
        let index = self
            .chain_ids
            .iter()
            .position(|chain| *chain == id)
            .expect("unknown node id");
        self.node_for(index)
    }

    /// A timestamp inside the daily accept window
    fn accept_time(&self, days: u64) -> u64 {
        self.epoch_ns + days * NANOS_PER_DAY + 13 * NANOS_PER_HOUR
    }
}

fn node_extra(signer: &KeyPair, payee: &KeyPair) -> Vec<u8> {
    let mut extra = Vec::with_capacity(64);
    extra.extend_from_slice(signer.public.as_bytes());
    extra.extend_from_slice(payee.public.as_bytes());
    extra
}

fn pledge_transaction(signer: &KeyPair, payee: &KeyPair) -> Transaction {
    let mut tx = Transaction::new(VELA_ASSET_ID);
    tx.add_input(hash(b"pledge funding"), 0);
    tx.outputs.push(Output {
        output_type: OutputType::NodePledge,
        amount: KERNEL_NODE_PLEDGE_AMOUNT,
        keys: Vec::new(),
        script: Script::empty(),
        mask: None,
        withdrawal: None,
    });
    tx.extra = node_extra(signer, payee);
    tx
}

#[tokio::test]
async fn test_elect_snapshot_node_purity_and_rotation() {
    let f = setup(8).await;
    let node = f.node_for(0);
    let t = f.accept_time(2);

    // pure in (op, day, accepted set)
    let first = node
        .elect_snapshot_node(TransactionType::NodeRemove, t)
        .await
        .unwrap();
    let second = node
        .elect_snapshot_node(TransactionType::NodeRemove, t)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert!(f.chain_ids.contains(&first));

    // a different hour on the same day elects the same node
    let same_day = node
        .elect_snapshot_node(TransactionType::NodeRemove, t + 4 * NANOS_PER_HOUR)
        .await
        .unwrap();
    assert_eq!(first, same_day);

    // the rotation advances one slot per day
    let next_day = node
        .elect_snapshot_node(TransactionType::NodeRemove, t + NANOS_PER_DAY)
        .await
        .unwrap();
    assert_ne!(first, next_day);

    // operation classes are offset against each other
    let pledge_elected = node
        .elect_snapshot_node(TransactionType::NodePledge, t)
        .await
        .unwrap();
    assert_ne!(first, pledge_elected);

    // non-elected operation classes get the zero hash
    let script = node
        .elect_snapshot_node(TransactionType::Script, t)
        .await
        .unwrap();
    assert_eq!(script, Hash::zero());
}

#[tokio::test]
async fn test_elected_nodes_exclude_list_edges() {
    let f = setup(8).await;
    let node = f.node_for(0);
    let sorted = f.store.read_all_nodes(u64::MAX, true).await.unwrap();
    let first_id = sorted[0].id_for_network(&f.network_id);
    let last_id = sorted[sorted.len() - 1].id_for_network(&f.network_id);

    // walk enough days to cover the whole rotation
    for day in 0..20u64 {
        let elected = node
            .elect_snapshot_node(TransactionType::NodeRemove, f.accept_time(day))
            .await
            .unwrap();
        assert_ne!(elected, first_id);
        assert_ne!(elected, last_id);
    }
}

#[tokio::test]
async fn test_wrong_proposer_for_remove() {
    let f = setup(8).await;
    let node = f.node_for(0);
    let t = f.accept_time(1);

    let elected = node
        .elect_snapshot_node(TransactionType::NodeRemove, t)
        .await
        .unwrap();
    let wrong = *f.chain_ids.iter().find(|id| **id != elected).unwrap();

    let mut snapshot = Snapshot::new(wrong);
    snapshot.timestamp = t;
    let tx = Transaction::new(VELA_ASSET_ID);
    let err = node
        .validate_node_remove_snapshot(&snapshot, &tx, false)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("node remove operation at {} only by {} not {}", t, elected, wrong)
    );
}

#[tokio::test]
async fn test_remove_candidate_never_self() {
    let f = setup(8).await;
    let t = f.accept_time(1);

    // the candidate is the oldest accepted node
    let sorted = f.store.read_all_nodes(u64::MAX, true).await.unwrap();
    let candidate_id = sorted[0].id_for_network(&f.network_id);

    let me = f.node_by_id(candidate_id);
    let err = me
        .build_node_remove_transaction(me.id_for_network, t, None)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "never handle the node remove transaction by the node self"
    );
}

#[tokio::test]
async fn test_remove_build_and_validate_round_trip() {
    let f = setup(8).await;
    let t = f.accept_time(1);

    let elected = f
        .node_for(0)
        .elect_snapshot_node(TransactionType::NodeRemove, t)
        .await
        .unwrap();
    let proposer = f.node_by_id(elected);

    let sorted = f.store.read_all_nodes(u64::MAX, true).await.unwrap();
    let candidate = sorted[0].clone();

    let tx = proposer
        .build_node_remove_transaction(elected, t, None)
        .await
        .unwrap();
    assert_eq!(tx.outputs.len(), 1);
    assert_eq!(tx.outputs[0].output_type, OutputType::NodeRemove);
    assert_eq!(tx.outputs[0].amount, KERNEL_NODE_PLEDGE_AMOUNT);
    assert_eq!(tx.outputs[0].keys.len(), 1);
    assert_eq!(tx.references.len(), 1);

    // the transaction passes full validation against the store
    tx.validate(f.store.as_ref(), t, false).await.unwrap();

    // rebuild stability and snapshot validation
    let again = proposer
        .build_node_remove_transaction(elected, t, None)
        .await
        .unwrap();
    assert_eq!(tx.payload_hash(), again.payload_hash());

    let mut snapshot = Snapshot::new(elected);
    snapshot.timestamp = t;
    snapshot.add_sole_transaction(tx.payload_hash());
    proposer
        .validate_node_remove_snapshot(&snapshot, &tx, false)
        .await
        .unwrap();

    // the spent input is the candidate's accept transaction
    match &tx.inputs[0] {
        vela_common::transaction::Input::Utxo { hash, index } => {
            assert_eq!(*hash, candidate.transaction);
            assert_eq!(*index, 0);
        }
        other => panic!("unexpected input {:?}", other),
    }
}

#[tokio::test]
async fn test_try_to_send_remove_transaction() {
    let f = setup(8).await;
    let t = f.accept_time(1);
    let elected = f
        .node_for(0)
        .elect_snapshot_node(TransactionType::NodeRemove, t)
        .await
        .unwrap();
    let me = f.node_by_id(elected);

    // advance the graph clock into the accept window by finalising a
    // snapshot on the proposer's own chain
    let chain = me.boot_chain(me.id_for_network).await.unwrap();
    let genesis_tx = f
        .store
        .read_snapshots_for_node_round(&me.id_for_network, 0)
        .await
        .unwrap()[0]
        .transaction()
        .unwrap();
    let mut bump = Snapshot::new(me.id_for_network);
    bump.timestamp = t;
    bump.add_sole_transaction(genesis_tx);
    chain.append_final_snapshot(&bump).await.unwrap();
    assert_eq!(me.graph_timestamp(), t);

    me.try_to_send_remove_transaction().await.unwrap();

    // the snapshot was queued for aggregation and the transaction cached
    let pending = chain.take_pending();
    assert_eq!(pending.len(), 1);
    let queued = pending[0].sole_transaction().unwrap();
    let cached = f.store.cache_get_transaction(&queued).await.unwrap();
    assert_eq!(cached.unwrap().payload_hash(), queued);
}

#[tokio::test]
async fn test_remove_refused_while_pledging() {
    let f = setup(8).await;
    let t = f.accept_time(1);

    let signer = KeyPair::generate();
    let payee = KeyPair::generate();
    let pledge = pledge_transaction(&signer, &payee);
    f.store
        .write_node(&ConsensusNode {
            signer: Address::from_spend_key(signer.public),
            payee: Address::from_spend_key(payee.public),
            state: NodeState::Pledging,
            timestamp: t - NANOS_PER_HOUR,
            transaction: pledge.payload_hash(),
        })
        .await
        .unwrap();

    let node = f.node_for(0);
    let err = node
        .build_node_remove_transaction(node.id_for_network, t, None)
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("still pledging now "));
}

#[tokio::test]
async fn test_accept_build_validate_round_trip() {
    let f = setup(8).await;
    let signer = KeyPair::generate();
    let payee = KeyPair::generate();
    let signer_address = Address::from_spend_key(signer.public);

    let pledge = pledge_transaction(&signer, &payee);
    f.store.apply_transaction(&pledge, "pledge-snapshot");
    let t_pledge = f.epoch_ns + NANOS_PER_HOUR;
    f.store
        .write_node(&ConsensusNode {
            signer: signer_address,
            payee: Address::from_spend_key(payee.public),
            state: NodeState::Pledging,
            timestamp: t_pledge,
            transaction: pledge.payload_hash(),
        })
        .await
        .unwrap();

    let me = Node::new(
        f.network_id,
        signer_address,
        f.epoch_ns,
        f.chain_ids.clone(),
        f.store.clone(),
        f.clock.clone(),
    );
    let chain = me.boot_chain(me.id_for_network).await.unwrap();
    assert!(!chain.has_state().await);

    // exactly the minimum accept period later, inside the accept window
    let t_accept = t_pledge + KERNEL_NODE_ACCEPT_PERIOD_MINIMUM;
    let tx = me
        .build_node_accept_transaction(&chain, t_accept, false)
        .await
        .unwrap();
    assert_eq!(tx.outputs[0].output_type, OutputType::NodeAccept);
    assert_eq!(tx.outputs[0].amount, KERNEL_NODE_PLEDGE_AMOUNT);
    assert_eq!(tx.extra, pledge.extra);

    // repeated builds with the same inputs yield the same payload hash
    let again = me
        .build_node_accept_transaction(&chain, t_accept, false)
        .await
        .unwrap();
    assert_eq!(tx.payload_hash(), again.payload_hash());

    tx.validate(f.store.as_ref(), t_accept, false).await.unwrap();

    let mut snapshot = Snapshot::new(me.id_for_network);
    snapshot.timestamp = t_accept;
    snapshot.add_sole_transaction(tx.payload_hash());
    me.validate_node_accept_snapshot(&snapshot, &tx, false)
        .await
        .unwrap();

    // finalisation bootstraps rounds 0 and 1 and steps the chain forward
    f.store.apply_transaction(&tx, "accept-snapshot");
    me.finalize_node_accept_snapshot(&snapshot, &[me.id_for_network])
        .await
        .unwrap();
    assert!(f
        .store
        .read_round(&me.id_for_network, 0)
        .await
        .unwrap()
        .is_some());
    let round1 = f
        .store
        .read_round(&me.id_for_network, 1)
        .await
        .unwrap()
        .unwrap();
    assert!(round1.references.is_some());

    me.reload_consensus_state(&snapshot, &tx).await.unwrap();
    let accepted = f.store.read_all_nodes(u64::MAX, true).await.unwrap();
    let record = accepted
        .iter()
        .find(|n| n.signer == signer_address)
        .unwrap();
    assert_eq!(record.state, NodeState::Accepted);
    assert_eq!(record.transaction, tx.payload_hash());
    assert_eq!(record.timestamp, t_accept);
}

#[tokio::test]
async fn test_accept_window_gates() {
    let f = setup(8).await;
    let signer = KeyPair::generate();
    let payee = KeyPair::generate();
    let signer_address = Address::from_spend_key(signer.public);

    let pledge = pledge_transaction(&signer, &payee);
    f.store.apply_transaction(&pledge, "pledge-snapshot");
    // pledged at hour 5 of day 0
    let t_pledge = f.epoch_ns + 5 * NANOS_PER_HOUR;
    f.store
        .write_node(&ConsensusNode {
            signer: signer_address,
            payee: Address::from_spend_key(payee.public),
            state: NodeState::Pledging,
            timestamp: t_pledge,
            transaction: pledge.payload_hash(),
        })
        .await
        .unwrap();
    let me = Node::new(
        f.network_id,
        signer_address,
        f.epoch_ns,
        f.chain_ids.clone(),
        f.store.clone(),
        f.clock.clone(),
    );
    let chain = me.boot_chain(me.id_for_network).await.unwrap();

    // hour 13 same day: in the window, but only 8h since the pledge
    let too_early = f.epoch_ns + 13 * NANOS_PER_HOUR;
    let err = me
        .build_node_accept_transaction(&chain, too_early, false)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "invalid accept period {} {}",
            KERNEL_NODE_ACCEPT_PERIOD_MINIMUM,
            8 * NANOS_PER_HOUR
        )
    );

    // hour 21 next day: outside the accept window
    let wrong_hour = f.epoch_ns + NANOS_PER_DAY + 21 * NANOS_PER_HOUR;
    let err = me
        .build_node_accept_transaction(&chain, wrong_hour, false)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid node accept hour 21");

    // eight days later: past the maximum accept period
    let too_late = f.epoch_ns + 8 * NANOS_PER_DAY + 13 * NANOS_PER_HOUR;
    let err = me
        .build_node_accept_transaction(&chain, too_late, false)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "invalid accept period {} {}",
            KERNEL_NODE_ACCEPT_PERIOD_MAXIMUM,
            too_late - t_pledge
        )
    );
}

#[tokio::test]
async fn test_pledge_snapshot_validation() {
    let f = setup(8).await;
    // hour 5: outside both the mint and the accept windows
    let t = f.epoch_ns + NANOS_PER_DAY + 5 * NANOS_PER_HOUR;
    let node0 = f.node_for(0);
    let elected = node0
        .elect_snapshot_node(TransactionType::NodePledge, t)
        .await
        .unwrap();
    let proposer = f.node_by_id(elected);

    let signer = KeyPair::generate();
    let payee = KeyPair::generate();
    let pledge = pledge_transaction(&signer, &payee);

    let mut snapshot = Snapshot::new(elected);
    snapshot.timestamp = t;
    snapshot.add_sole_transaction(pledge.payload_hash());
    proposer
        .validate_node_pledge_snapshot(&snapshot, &pledge, false)
        .await
        .unwrap();

    // wrong amount
    let mut cheap = pledge.clone();
    cheap.outputs[0].amount = "1".parse().unwrap();
    let err = proposer
        .validate_node_pledge_snapshot(&snapshot, &cheap, false)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid pledge amount 1.00000000");

    // accept-window hour is forbidden for pledges
    let t13 = f.epoch_ns + NANOS_PER_DAY + 13 * NANOS_PER_HOUR;
    let elected13 = node0
        .elect_snapshot_node(TransactionType::NodePledge, t13)
        .await
        .unwrap();
    let proposer13 = f.node_by_id(elected13);
    let mut snapshot13 = Snapshot::new(elected13);
    snapshot13.timestamp = t13;
    let err = proposer13
        .validate_node_pledge_snapshot(&snapshot13, &pledge, false)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid node pledge hour 13");
}

#[tokio::test]
async fn test_second_pledge_refused_while_one_pending() {
    let f = setup(8).await;
    let t = f.epoch_ns + NANOS_PER_DAY + 5 * NANOS_PER_HOUR;
    let node0 = f.node_for(0);

    let signer = KeyPair::generate();
    let payee = KeyPair::generate();
    let pledge = pledge_transaction(&signer, &payee);
    f.store
        .write_node(&ConsensusNode {
            signer: Address::from_spend_key(signer.public),
            payee: Address::from_spend_key(payee.public),
            state: NodeState::Pledging,
            timestamp: t,
            transaction: pledge.payload_hash(),
        })
        .await
        .unwrap();

    // 18 hours later, at a pledge-legal hour of the next day
    let t2 = t + 18 * NANOS_PER_HOUR;
    let elected = node0
        .elect_snapshot_node(TransactionType::NodePledge, t2)
        .await
        .unwrap();
    let proposer = f.node_by_id(elected);
    let second = pledge_transaction(&KeyPair::generate(), &KeyPair::generate());
    let mut snapshot = Snapshot::new(elected);
    snapshot.timestamp = t2;
    let err = proposer
        .validate_node_pledge_snapshot(&snapshot, &second, false)
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .starts_with("invalid node pending state "));
    assert!(err.to_string().ends_with("PLEDGING"));
}

#[tokio::test]
async fn test_pledge_bounded_by_max_nodes() {
    let f = setup(50).await;
    let t = f.epoch_ns + NANOS_PER_DAY + 5 * NANOS_PER_HOUR;
    let node0 = f.node_for(0);
    let elected = node0
        .elect_snapshot_node(TransactionType::NodePledge, t)
        .await
        .unwrap();
    let proposer = f.node_by_id(elected);

    let pledge = pledge_transaction(&KeyPair::generate(), &KeyPair::generate());
    let mut snapshot = Snapshot::new(elected);
    snapshot.timestamp = t;
    let err = proposer
        .validate_node_pledge_snapshot(&snapshot, &pledge, false)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "maximum kernel nodes count reached because cosi signature mask limit {}",
            pledge.payload_hash()
        )
    );
}

#[tokio::test(start_paused = true)]
async fn test_election_loop_stops_on_shutdown() {
    let f = setup(8).await;
    let node = Arc::new(f.node_for(0));

    let looper = node.clone();
    let handle = tokio::spawn(async move { looper.election_loop().await });
    // let a few ticks elapse; every one is an expected non-elected rejection
    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
    node.shutdown();
    handle.await.unwrap();
}
