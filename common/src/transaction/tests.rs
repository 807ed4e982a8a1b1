use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use indexmap::IndexMap;

use super::{
    AggregatedSignature, Input, MintData, Output, OutputType, Transaction, TransactionType, Utxo,
    UtxoWithLock,
};
use crate::{
    config::{EXTRA_SIZE_GENERAL_LIMIT, VELA_ASSET_ID},
    crypto::{aggregate_sign, hash, Address, Hash, Key, KeyPair, Signature},
    script::Script,
    store::{
        CustodianReader, CustodianState, DepositLocker, GhostLocker, MintDistribution, MintReader,
        NodeOperationLocker, StoreError, TransactionReader, UtxoLockReader,
    },
    transaction::DepositData,
};

#[derive(Default)]
struct TestStore {
    utxos: Mutex<HashMap<(Hash, u16), UtxoWithLock>>,
    transactions: Mutex<HashMap<Hash, (Transaction, String)>>,
    ghost_locks: Mutex<HashMap<Key, Hash>>,
    deposits: Mutex<HashMap<String, (Hash, u64)>>,
    mint: Mutex<Option<MintDistribution>>,
    custodian: Mutex<Option<CustodianState>>,
}

impl TestStore {
    fn put_utxo(&self, hash: Hash, index: u16, utxo: Utxo, lock_hash: Option<Hash>) {
        self.utxos
            .lock()
            .unwrap()
            .insert((hash, index), UtxoWithLock { utxo, lock_hash });
    }
}

#[async_trait]
impl TransactionReader for TestStore {
    async fn read_transaction(
        &self,
        hash: &Hash,
    ) -> Result<Option<(Transaction, String)>, StoreError> {
        Ok(self.transactions.lock().unwrap().get(hash).cloned())
    }
}

#[async_trait]
impl UtxoLockReader for TestStore {
    async fn read_utxo_lock(
        &self,
        hash: &Hash,
        index: u16,
    ) -> Result<Option<UtxoWithLock>, StoreError> {
        Ok(self.utxos.lock().unwrap().get(&(*hash, index)).cloned())
    }
}

#[async_trait]
impl GhostLocker for TestStore {
    async fn lock_ghost_keys(
        &self,
        keys: &[Key],
        tx_hash: &Hash,
        fork: bool,
    ) -> Result<(), StoreError> {
        let mut locks = self.ghost_locks.lock().unwrap();
        for key in keys {
            if let Some(existing) = locks.get(key) {
                if existing != tx_hash && !fork {
                    return Err(StoreError::GhostKeyLocked(*key, *existing));
                }
            }
        }
        for key in keys {
            locks.insert(*key, *tx_hash);
        }
        Ok(())
    }
}

#[async_trait]
impl NodeOperationLocker for TestStore {
    async fn add_node_operation(
        &self,
        _tx: &Transaction,
        _timestamp: u64,
        _ttl: u64,
        _finalized: bool,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl MintReader for TestStore {
    async fn read_last_mint_distribution(&self) -> Result<Option<MintDistribution>, StoreError> {
        Ok(self.mint.lock().unwrap().clone())
    }
}

#[async_trait]
impl DepositLocker for TestStore {
    async fn lock_deposit_input(
        &self,
        deposit: &DepositData,
        tx_hash: &Hash,
        snap_time: u64,
        fork: bool,
    ) -> Result<(), StoreError> {
        let key = format!("{}:{}", deposit.transaction_key, deposit.output_index);
        let mut deposits = self.deposits.lock().unwrap();
        if let Some((existing, _)) = deposits.get(&key) {
            if existing != tx_hash && !fork {
                return Err(StoreError::DepositClaimed(
                    deposit.transaction_key.clone(),
                    deposit.output_index,
                ));
            }
        }
        deposits.insert(key, (*tx_hash, snap_time));
        Ok(())
    }
}

#[async_trait]
impl CustodianReader for TestStore {
    async fn read_custodian(&self) -> Result<Option<CustodianState>, StoreError> {
        Ok(self.custodian.lock().unwrap().clone())
    }
}

fn script_utxo(amount: &str, keys: Vec<Key>, threshold: u8) -> Utxo {
    Utxo {
        output_type: OutputType::Script,
        amount: amount.parse().unwrap(),
        keys,
        script: Script::new_threshold(threshold),
        mask: Some(KeyPair::generate().public),
        asset: VELA_ASSET_ID,
    }
}

fn script_output(amount: &str, key: Key) -> Output {
    Output {
        output_type: OutputType::Script,
        amount: amount.parse().unwrap(),
        keys: vec![key],
        script: Script::new_threshold(1),
        mask: Some(KeyPair::generate().public),
        withdrawal: None,
    }
}

// A spendable context: one UTXO held by `owner`, spent into a fresh ghost key
fn spend_setup(amount: &str) -> (TestStore, KeyPair, Hash, Transaction) {
    let store = TestStore::default();
    let owner = KeyPair::generate();
    let prev = hash(b"previous transaction");
    store.put_utxo(prev, 0, script_utxo(amount, vec![owner.public], 1), None);

    let mut tx = Transaction::new(VELA_ASSET_ID);
    tx.add_input(prev, 0);
    tx.outputs
        .push(script_output(amount, KeyPair::generate().public));
    (store, owner, prev, tx)
}

fn sign_single(tx: &mut Transaction, owner: &KeyPair) {
    let payload = tx.payload_hash();
    let mut map = IndexMap::new();
    map.insert(0u16, owner.private.sign(&payload));
    tx.signatures_map = Some(vec![map]);
}

#[tokio::test]
async fn test_script_spend_accepted() {
    let (store, owner, _, mut tx) = spend_setup("100");
    sign_single(&mut tx, &owner);
    tx.validate(&store, 0, false).await.unwrap();
    // ghost keys were locked to this transaction
    let locks = store.ghost_locks.lock().unwrap();
    assert_eq!(locks.get(&tx.outputs[0].keys[0]), Some(&tx.payload_hash()));
}

#[tokio::test]
async fn test_missing_input() {
    let (store, owner, _, mut tx) = spend_setup("100");
    let absent = hash(b"absent");
    tx.inputs[0] = Input::Utxo {
        hash: absent,
        index: 0,
    };
    sign_single(&mut tx, &owner);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(err.to_string(), format!("input not found {}:0", absent));
}

#[tokio::test]
async fn test_duplicate_input() {
    let (store, owner, prev, mut tx) = spend_setup("100");
    tx.add_input(prev, 0);
    let payload = tx.payload_hash();
    let mut map = IndexMap::new();
    map.insert(0u16, owner.private.sign(&payload));
    tx.signatures_map = Some(vec![map.clone(), map]);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(err.to_string(), format!("invalid input {}:0", prev));
}

#[tokio::test]
async fn test_amount_mismatch() {
    let (store, owner, _, mut tx) = spend_setup("100");
    tx.outputs[0].amount = "99.99999999".parse().unwrap();
    sign_single(&mut tx, &owner);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid input output amount 100.00000000 99.99999999"
    );
}

#[tokio::test]
async fn test_extra_too_large() {
    let store = TestStore::default();
    let mut tx = Transaction::new(hash(b"foreign asset"));
    tx.add_input(hash(b"ignored"), 0);
    tx.outputs
        .push(script_output("1", KeyPair::generate().public));
    tx.extra = vec![0u8; EXTRA_SIZE_GENERAL_LIMIT + 1];
    sign_single(&mut tx, &KeyPair::generate());
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid extra size 257");
}

#[tokio::test]
async fn test_ghost_key_collision_across_outputs() {
    let (store, owner, _, mut tx) = spend_setup("100");
    let ghost = KeyPair::generate().public;
    tx.outputs.clear();
    tx.outputs.push(script_output("60", ghost));
    tx.outputs.push(script_output("40", ghost));
    sign_single(&mut tx, &owner);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(err.to_string(), format!("invalid output key {}", ghost));
}

#[tokio::test]
async fn test_output_key_must_be_on_curve() {
    let (store, owner, _, mut tx) = spend_setup("100");
    let off_curve = Key::new([0xff; 32]);
    tx.outputs[0].keys = vec![off_curve];
    sign_single(&mut tx, &owner);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("invalid output key format {}", off_curve)
    );
}

#[tokio::test]
async fn test_lock_hash_exclusion() {
    let (store, owner, prev, mut tx) = spend_setup("100");
    let competing = hash(b"competing spend");
    store.put_utxo(
        prev,
        0,
        script_utxo("100", vec![owner.public], 1),
        Some(competing),
    );
    sign_single(&mut tx, &owner);

    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("input locked for transaction {}", competing)
    );
    // fork replay overrides the advisory lock
    tx.validate(&store, 0, true).await.unwrap();
}

#[tokio::test]
async fn test_lock_hash_same_transaction_allowed() {
    let (store, owner, prev, mut tx) = spend_setup("100");
    sign_single(&mut tx, &owner);
    store.put_utxo(
        prev,
        0,
        script_utxo("100", vec![owner.public], 1),
        Some(tx.payload_hash()),
    );
    tx.validate(&store, 0, false).await.unwrap();
}

#[tokio::test]
async fn test_bad_signature_rejected() {
    let (store, _, _, mut tx) = spend_setup("100");
    let stranger = KeyPair::generate();
    sign_single(&mut tx, &stranger);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(err.to_string(), "batch verification failure 1 1");
}

#[tokio::test]
async fn test_threshold_not_met() {
    let store = TestStore::default();
    let a = KeyPair::generate();
    let b = KeyPair::generate();
    let prev = hash(b"multisig");
    store.put_utxo(prev, 0, script_utxo("10", vec![a.public, b.public], 2), None);

    let mut tx = Transaction::new(VELA_ASSET_ID);
    tx.add_input(prev, 0);
    tx.outputs
        .push(script_output("10", KeyPair::generate().public));
    // only one of two required signatures
    sign_single(&mut tx, &a);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid script threshold 2 for 1 signers");
}

#[tokio::test]
async fn test_aggregated_spend_accepted() {
    let store = TestStore::default();
    let a = KeyPair::generate();
    let b = KeyPair::generate();
    let prev = hash(b"aggregated");
    store.put_utxo(prev, 0, script_utxo("10", vec![a.public, b.public], 2), None);

    let mut tx = Transaction::new(VELA_ASSET_ID);
    tx.add_input(prev, 0);
    tx.outputs
        .push(script_output("10", KeyPair::generate().public));
    let payload = tx.payload_hash();
    tx.aggregated = Some(AggregatedSignature {
        signers: vec![0, 1],
        signature: aggregate_sign(&[&a.private, &b.private], &payload),
    });
    tx.validate(&store, 0, false).await.unwrap();
}

#[tokio::test]
async fn test_aggregated_and_map_exclusive() {
    let (store, owner, _, mut tx) = spend_setup("100");
    sign_single(&mut tx, &owner);
    tx.aggregated = Some(AggregatedSignature {
        signers: vec![0],
        signature: Signature::new([0u8; 64]),
    });
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid signatures map 1");
}

#[tokio::test]
async fn test_kernel_multisig_output_carries_no_ghost_material() {
    let (store, owner, _, mut tx) = spend_setup("100");
    tx.outputs.clear();
    tx.outputs.push(Output {
        output_type: OutputType::NodePledge,
        amount: "100".parse().unwrap(),
        keys: vec![KeyPair::generate().public],
        script: Script::empty(),
        mask: None,
        withdrawal: None,
    });
    tx.extra = vec![0u8; 64];
    sign_single(&mut tx, &owner);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid output keys count 1 for kernel multisig transaction"
    );
}

#[tokio::test]
async fn test_wrong_asset_rejected() {
    let (store, owner, prev, mut tx) = spend_setup("100");
    let mut foreign = script_utxo("100", vec![owner.public], 1);
    foreign.asset = hash(b"foreign");
    store.put_utxo(prev, 0, foreign, None);
    sign_single(&mut tx, &owner);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("invalid input asset {} {}", hash(b"foreign"), VELA_ASSET_ID)
    );
}

#[tokio::test]
async fn test_mint_batch_continuity() {
    let store = TestStore::default();
    let mut tx = Transaction::new(VELA_ASSET_ID);
    tx.inputs.push(Input::Mint(MintData {
        group: "KERNELNODE".into(),
        batch: 1,
        amount: "10".parse().unwrap(),
    }));
    tx.outputs
        .push(script_output("10", KeyPair::generate().public));
    let payload = tx.payload_hash();
    tx.aggregated = Some(AggregatedSignature {
        signers: vec![0],
        signature: aggregate_sign(&[&KeyPair::generate().private], &payload),
    });
    tx.validate(&store, 0, false).await.unwrap();

    // a second mint with the same batch is rejected
    *store.mint.lock().unwrap() = Some(MintDistribution {
        group: "KERNELNODE".into(),
        batch: 1,
        amount: "10".parse().unwrap(),
        transaction: tx.payload_hash(),
    });
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid mint batch 1 2");
}

#[tokio::test]
async fn test_deposit_claimed_once() {
    let store = TestStore::default();
    let mut tx = Transaction::new(VELA_ASSET_ID);
    tx.inputs.push(Input::Deposit(DepositData {
        chain: hash(b"external chain"),
        asset_key: "0xasset".into(),
        transaction_key: "0xdeposit".into(),
        output_index: 1,
        amount: "10".parse().unwrap(),
    }));
    tx.outputs
        .push(script_output("10", KeyPair::generate().public));
    let payload = tx.payload_hash();
    tx.aggregated = Some(AggregatedSignature {
        signers: vec![0],
        signature: aggregate_sign(&[&KeyPair::generate().private], &payload),
    });
    let snap_time = 1_000_000_000u64;
    tx.validate(&store, snap_time, false).await.unwrap();
    // the claim records the snapshot time the proof was checked against
    let deposits = store.deposits.lock().unwrap();
    assert_eq!(
        deposits.get("0xdeposit:1"),
        Some(&(tx.payload_hash(), snap_time))
    );
    drop(deposits);

    // already claimed by a different transaction
    store
        .deposits
        .lock()
        .unwrap()
        .insert("0xdeposit:1".into(), (hash(b"other spend"), snap_time));
    let err = tx.validate(&store, snap_time, false).await.unwrap_err();
    assert_eq!(err.to_string(), "deposit 0xdeposit:1 already claimed");
}

#[tokio::test]
async fn test_custodian_update_requires_records() {
    let store = TestStore::default();
    let owner = KeyPair::generate();
    let prev = hash(b"custodian funds");
    store.put_utxo(prev, 0, script_utxo("10", vec![owner.public], 1), None);

    let mut tx = Transaction::new(VELA_ASSET_ID);
    tx.add_input(prev, 0);
    tx.outputs.push(Output {
        output_type: OutputType::CustodianUpdateNodes,
        amount: "10".parse().unwrap(),
        keys: vec![KeyPair::generate().public],
        script: Script::new_threshold(1),
        mask: Some(KeyPair::generate().public),
        withdrawal: None,
    });
    let mut extra = Vec::with_capacity(96);
    for _ in 0..3 {
        extra.extend_from_slice(KeyPair::generate().public.as_bytes());
    }
    tx.extra = extra;

    // no custodian installed yet
    sign_single(&mut tx, &owner);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(err.to_string(), "custodian not initialized");

    *store.custodian.lock().unwrap() = Some(CustodianState {
        custodian: Address::from_spend_key(KeyPair::generate().public),
        transaction: hash(b"custodian init"),
        timestamp: 1,
    });
    tx.validate(&store, 0, false).await.unwrap();

    // a truncated record sequence is rejected
    tx.extra.truncate(95);
    sign_single(&mut tx, &owner);
    store.ghost_locks.lock().unwrap().clear();
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid custodian update extra 95");
}

#[tokio::test]
async fn test_ghost_lock_conflict() {
    let (store, owner, _, mut tx) = spend_setup("100");
    sign_single(&mut tx, &owner);
    let foreign_tx = hash(b"foreign claim");
    store
        .ghost_locks
        .lock()
        .unwrap()
        .insert(tx.outputs[0].keys[0], foreign_tx);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "ghost key {} locked by transaction {}",
            tx.outputs[0].keys[0], foreign_tx
        )
    );
    // fork replay overwrites the claim
    tx.validate(&store, 0, true).await.unwrap();
}

#[tokio::test]
async fn test_cancel_input_unsupported() {
    let store = TestStore::default();
    let prev = hash(b"cancel output");
    let mut utxo = script_utxo("10", vec![], 1);
    utxo.output_type = OutputType::NodeCancel;
    utxo.script = Script::empty();
    utxo.mask = None;
    store.put_utxo(prev, 0, utxo, None);

    let mut tx = Transaction::new(VELA_ASSET_ID);
    tx.add_input(prev, 0);
    tx.outputs
        .push(script_output("10", KeyPair::generate().public));
    tx.signatures_map = Some(vec![IndexMap::new()]);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "should do more validation on those {} UTXOs",
            OutputType::NodeCancel.code()
        )
    );
}

#[tokio::test]
async fn test_unknown_version_rejected() {
    let (store, owner, _, mut tx) = spend_setup("100");
    sign_single(&mut tx, &owner);
    tx.version = 4;
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid tx version 4");
}

#[tokio::test]
async fn test_reference_must_resolve() {
    let (store, owner, _, mut tx) = spend_setup("100");
    let reference = hash(b"unknown reference");
    tx.references.push(reference);
    sign_single(&mut tx, &owner);
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("reference not found {}", reference)
    );

    // a cached transaction without a containing snapshot does not count
    store
        .transactions
        .lock()
        .unwrap()
        .insert(reference, (Transaction::new(VELA_ASSET_ID), String::new()));
    let err = tx.validate(&store, 0, false).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("reference not found {}", reference)
    );
}

#[test]
fn test_type_code_for_unknown() {
    assert_eq!(TransactionType::Unknown.code(), 0xff);
}
