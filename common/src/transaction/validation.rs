use std::collections::HashSet;

use indexmap::IndexMap;
use thiserror::Error;

use super::{
    AggregatedSignature, CustodianNodeRecord, Input, OutputType, SignaturesMap, Transaction,
    TransactionType, Utxo,
};
use crate::{
    config::{
        MINT_GROUP_KERNEL_NODE, REFERENCES_COUNT_LIMIT, SLICE_COUNT_LIMIT,
        TRANSACTION_MAXIMUM_SIZE, TX_VERSION_HASH_SIGNATURE,
    },
    crypto::{aggregate_verify, batch_verify, Hash, Key, Signature},
    integer::Integer,
    script::ScriptError,
    store::{DataStore, StoreError},
};

const NODE_EXTRA_SIZE: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid tx version {0}")]
    InvalidVersion(u8),
    #[error("invalid tx type {0}")]
    InvalidType(u8),
    #[error("invalid tx inputs or outputs {0} {1}")]
    MissingInputsOutputs(usize, usize),
    #[error("invalid tx inputs or outputs {0} {1} {2}")]
    SliceCountLimit(usize, usize, usize),
    #[error("invalid extra size {0}")]
    InvalidExtraSize(usize),
    #[error("invalid transaction size {0}")]
    InvalidTransactionSize(usize),
    #[error("invalid signatures map {0}")]
    InvalidSignaturesMap(usize),
    #[error("invalid tx signature number {0} {1} {2}")]
    InvalidSignatureNumber(usize, usize, u8),
    #[error("too many references {0}")]
    TooManyReferences(usize),
    #[error("reference not found {0}")]
    ReferenceNotFound(Hash),
    #[error("invalid genesis input {0}")]
    InvalidGenesisInput(usize),
    #[error("invalid input {0}")]
    DuplicateInput(String),
    #[error("input not found {0}:{1}")]
    InputNotFound(Hash, u16),
    #[error("invalid input asset {0} {1}")]
    InvalidInputAsset(Hash, Hash),
    #[error("input locked for transaction {0}")]
    InputLocked(Hash),
    #[error("invalid input amount {0}")]
    InvalidInputAmount(Integer),
    #[error("invalid signatures map for input {0}")]
    MissingSignatures(usize),
    #[error("invalid signature map index {0} {1}")]
    InvalidSignatureMapIndex(usize, usize),
    #[error("pledge input used for invalid transaction type {0}")]
    PledgeInputForInvalidType(u8),
    #[error("accept input used for invalid transaction type {0}")]
    AcceptInputForInvalidType(u8),
    #[error("should do more validation on those {0} UTXOs")]
    UnsupportedCancelInput(u8),
    #[error("invalid input type {0}")]
    InvalidInputType(u8),
    #[error("batch verification not ready {0} {1}")]
    BatchNotReady(usize, usize),
    #[error("aggregate verification failure {0}")]
    AggregateVerification(String),
    #[error("batch verification failure {0} {1}")]
    BatchVerification(usize, usize),
    #[error("invalid output keys count {0}")]
    InvalidOutputKeysCount(usize),
    #[error("invalid output amount {0}")]
    InvalidOutputAmount(Integer),
    #[error("invalid output key {0}")]
    DuplicateOutputKey(Key),
    #[error("invalid output key format {0}")]
    InvalidOutputKeyFormat(Key),
    #[error("invalid output keys count {0} for kernel multisig transaction")]
    KernelMultisigKeys(usize),
    #[error("invalid output script {0} for kernel multisig transaction")]
    KernelMultisigScript(String),
    #[error("invalid output empty mask {0} for kernel multisig transaction")]
    KernelMultisigMask(Key),
    #[error("invalid script output empty mask")]
    ScriptOutputEmptyMask,
    #[error("invalid input output amount {0} {1}")]
    AmountMismatch(Integer, Integer),
    #[error("invalid utxo type {0}")]
    InvalidUtxoType(u8),
    #[error("invalid mint inputs count {0}")]
    InvalidMintInputsCount(usize),
    #[error("invalid mint group {0}")]
    InvalidMintGroup(String),
    #[error("invalid mint amount {0}")]
    InvalidMintAmount(Integer),
    #[error("invalid mint batch {0} {1}")]
    InvalidMintBatch(u64, u64),
    #[error("invalid deposit inputs count {0}")]
    InvalidDepositInputsCount(usize),
    #[error("invalid deposit data {0}")]
    InvalidDepositData(String),
    #[error("invalid withdrawal outputs count {0}")]
    InvalidWithdrawalOutputsCount(usize),
    #[error("invalid withdrawal submit output type {0}")]
    InvalidWithdrawalSubmitType(u8),
    #[error("invalid withdrawal submit data")]
    InvalidWithdrawalSubmitData,
    #[error("invalid withdrawal claim extra {0}")]
    InvalidWithdrawalClaimExtra(usize),
    #[error("withdrawal submit not found {0}")]
    WithdrawalSubmitNotFound(Hash),
    #[error("invalid withdrawal submit transaction {0}")]
    InvalidWithdrawalSubmitTransaction(Hash),
    #[error("invalid outputs count {0} for pledge transaction")]
    InvalidPledgeOutputsCount(usize),
    #[error("invalid extra length {0} for pledge transaction")]
    InvalidPledgeExtra(usize),
    #[error("invalid inputs count {0} for cancel transaction")]
    InvalidCancelInputsCount(usize),
    #[error("invalid outputs count {0} for cancel transaction")]
    InvalidCancelOutputsCount(usize),
    #[error("invalid extra length {0} for cancel transaction")]
    InvalidCancelExtra(usize),
    #[error("pledge transaction not found {0}")]
    PledgeNotFound(Hash),
    #[error("invalid cancel extra mismatch with pledge {0}")]
    CancelExtraMismatch(Hash),
    #[error("invalid inputs count {0} for accept transaction")]
    InvalidAcceptInputsCount(usize),
    #[error("invalid outputs count {0} for accept transaction")]
    InvalidAcceptOutputsCount(usize),
    #[error("invalid extra length {0} for accept transaction")]
    InvalidAcceptExtra(usize),
    #[error("invalid inputs count {0} for remove transaction")]
    InvalidRemoveInputsCount(usize),
    #[error("invalid outputs count {0} for remove transaction")]
    InvalidRemoveOutputsCount(usize),
    #[error("invalid extra length {0} for remove transaction")]
    InvalidRemoveExtra(usize),
    #[error("invalid custodian update extra {0}")]
    InvalidCustodianUpdateExtra(usize),
    #[error("invalid custodian node key {0}")]
    InvalidCustodianNodeKey(Key),
    #[error("custodian not initialized")]
    CustodianNotInitialized,
    #[error("not implemented")]
    NotImplemented,
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Transaction {
    /// Deterministic, context-sensitive acceptance predicate. `snap_time` is
    /// the nanosecond timestamp of the snapshot proposing to contain this
    /// transaction; `fork` relaxes the lock-hash cross-check during
    /// chain-fork replay.
    pub async fn validate<S>(
        &self,
        store: &S,
        snap_time: u64,
        fork: bool,
    ) -> Result<(), ValidationError>
    where
        S: DataStore + ?Sized,
    {
        let tx_type = self.transaction_type();

        if self.version != TX_VERSION_HASH_SIGNATURE {
            return Err(ValidationError::InvalidVersion(self.version));
        }
        if tx_type == TransactionType::Unknown {
            return Err(ValidationError::InvalidType(tx_type.code()));
        }
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(ValidationError::MissingInputsOutputs(
                self.inputs.len(),
                self.outputs.len(),
            ));
        }
        if self.inputs.len() > SLICE_COUNT_LIMIT
            || self.outputs.len() > SLICE_COUNT_LIMIT
            || self.references.len() > SLICE_COUNT_LIMIT
        {
            return Err(ValidationError::SliceCountLimit(
                self.inputs.len(),
                self.outputs.len(),
                self.references.len(),
            ));
        }
        if self.extra.len() > self.extra_limit() {
            return Err(ValidationError::InvalidExtraSize(self.extra.len()));
        }
        let payload_size = self.payload_marshal().len();
        if payload_size > TRANSACTION_MAXIMUM_SIZE {
            return Err(ValidationError::InvalidTransactionSize(payload_size));
        }

        if self.aggregated.is_some() {
            if let Some(maps) = &self.signatures_map {
                return Err(ValidationError::InvalidSignaturesMap(maps.len()));
            }
        } else {
            let sig_count = self.signatures_map.as_ref().map_or(0, |m| m.len());
            if self.inputs.len() != sig_count
                && tx_type != TransactionType::NodeAccept
                && tx_type != TransactionType::NodeRemove
            {
                return Err(ValidationError::InvalidSignatureNumber(
                    self.inputs.len(),
                    sig_count,
                    tx_type.code(),
                ));
            }
        }

        self.validate_references(store).await?;
        let hash = self.payload_hash();
        let (inputs_filter, input_amount) =
            self.validate_inputs(store, &hash, tx_type, fork).await?;
        if input_amount.sign() <= 0 {
            return Err(ValidationError::InvalidInputAmount(input_amount));
        }
        self.validate_outputs(store, &hash, input_amount, fork)
            .await?;

        match tx_type {
            TransactionType::Script => validate_script_transaction(&inputs_filter),
            TransactionType::Mint => self.validate_mint(store).await,
            TransactionType::Deposit => self.validate_deposit(store, &hash, snap_time).await,
            TransactionType::WithdrawalSubmit => self.validate_withdrawal_submit(&inputs_filter),
            TransactionType::WithdrawalClaim => {
                self.validate_withdrawal_claim(store, &inputs_filter).await
            }
            TransactionType::NodePledge => self.validate_node_pledge(&inputs_filter),
            TransactionType::NodeCancel => self.validate_node_cancel(store).await,
            TransactionType::NodeAccept => self.validate_node_accept(),
            TransactionType::NodeRemove => self.validate_node_remove(),
            TransactionType::CustodianUpdateNodes => {
                self.validate_custodian_update_nodes(store).await
            }
            TransactionType::CustodianSlashNodes => Err(ValidationError::NotImplemented),
            TransactionType::Unknown => Err(ValidationError::InvalidType(tx_type.code())),
        }
    }

    async fn validate_references<S>(&self, store: &S) -> Result<(), ValidationError>
    where
        S: DataStore + ?Sized,
    {
        if self.references.len() > REFERENCES_COUNT_LIMIT {
            return Err(ValidationError::TooManyReferences(self.references.len()));
        }
        for reference in &self.references {
            match store.read_transaction(reference).await? {
                Some((_, snapshot_id)) if !snapshot_id.is_empty() => {}
                _ => return Err(ValidationError::ReferenceNotFound(*reference)),
            }
        }
        Ok(())
    }

    async fn validate_inputs<S>(
        &self,
        store: &S,
        hash: &Hash,
        tx_type: TransactionType,
        fork: bool,
    ) -> Result<(IndexMap<String, Utxo>, Integer), ValidationError>
    where
        S: DataStore + ?Sized,
    {
        let mut input_amount = Integer::zero();
        let mut inputs_filter: IndexMap<String, Utxo> = IndexMap::new();
        let mut all_keys: Vec<Key> = Vec::new();
        // insertion order is deliberate: batch verification walks this map
        // in the order inputs contributed their keys
        let mut key_sigs: IndexMap<Key, Option<Signature>> = IndexMap::new();

        for (i, input) in self.inputs.iter().enumerate() {
            let (in_hash, in_index) = match input {
                Input::Genesis(_) => return Err(ValidationError::InvalidGenesisInput(i)),
                Input::Mint(mint) => return Ok((inputs_filter, mint.amount)),
                Input::Deposit(deposit) => return Ok((inputs_filter, deposit.amount)),
                Input::Utxo { hash, index } => (hash, *index),
            };

            let fk = format!("{}:{}", in_hash, in_index);
            if inputs_filter.contains_key(&fk) {
                return Err(ValidationError::DuplicateInput(fk));
            }

            let with_lock = store
                .read_utxo_lock(in_hash, in_index)
                .await?
                .ok_or(ValidationError::InputNotFound(*in_hash, in_index))?;
            if with_lock.utxo.asset != self.asset {
                return Err(ValidationError::InvalidInputAsset(
                    with_lock.utxo.asset,
                    self.asset,
                ));
            }
            if let Some(lock) = with_lock.lock_hash {
                if lock != *hash && !fork {
                    return Err(ValidationError::InputLocked(lock));
                }
            }

            validate_utxo(
                i,
                &with_lock.utxo,
                self.signatures_map.as_ref(),
                self.aggregated.as_ref(),
                tx_type,
                &mut key_sigs,
                all_keys.len(),
            )?;
            input_amount = input_amount.add(with_lock.utxo.amount);
            all_keys.extend(with_lock.utxo.keys.iter().copied());
            inputs_filter.insert(fk, with_lock.utxo);
        }

        // NodeAccept and NodeRemove are authorised by election, not by
        // input signatures
        if key_sigs.is_empty()
            && (tx_type == TransactionType::NodeAccept || tx_type == TransactionType::NodeRemove)
        {
            return Ok((inputs_filter, input_amount));
        }
        if key_sigs.len() < self.inputs.len() {
            return Err(ValidationError::BatchNotReady(
                self.inputs.len(),
                key_sigs.len(),
            ));
        }
        if let Some(aggregated) = &self.aggregated {
            let key_refs: Vec<&Key> = all_keys.iter().collect();
            aggregate_verify(&aggregated.signature, &key_refs, &aggregated.signers, hash)
                .map_err(|e| ValidationError::AggregateVerification(e.to_string()))?;
        } else {
            let mut keys = Vec::with_capacity(key_sigs.len());
            let mut sigs = Vec::with_capacity(key_sigs.len());
            for (key, sig) in &key_sigs {
                match sig {
                    Some(sig) => {
                        keys.push(key);
                        sigs.push(sig);
                    }
                    None => {
                        return Err(ValidationError::BatchVerification(
                            key_sigs.len(),
                            sigs.len(),
                        ))
                    }
                }
            }
            if !batch_verify(hash, &keys, &sigs) {
                return Err(ValidationError::BatchVerification(keys.len(), sigs.len()));
            }
        }
        Ok((inputs_filter, input_amount))
    }

    async fn validate_outputs<S>(
        &self,
        store: &S,
        hash: &Hash,
        input_amount: Integer,
        fork: bool,
    ) -> Result<(), ValidationError>
    where
        S: DataStore + ?Sized,
    {
        let mut output_amount = Integer::zero();
        let mut ghost_filter: HashSet<Key> = HashSet::new();
        let mut ghost_keys: Vec<Key> = Vec::new();
        for output in &self.outputs {
            if output.keys.len() > SLICE_COUNT_LIMIT {
                return Err(ValidationError::InvalidOutputKeysCount(output.keys.len()));
            }
            if output.amount.sign() <= 0 {
                return Err(ValidationError::InvalidOutputAmount(output.amount));
            }

            if output.withdrawal.is_some() {
                output_amount = output_amount.add(output.amount);
                continue;
            }

            for key in &output.keys {
                if !ghost_filter.insert(*key) {
                    return Err(ValidationError::DuplicateOutputKey(*key));
                }
                if !key.check_key() {
                    return Err(ValidationError::InvalidOutputKeyFormat(*key));
                }
                ghost_keys.push(*key);
            }

            match output.output_type {
                OutputType::WithdrawalSubmit
                | OutputType::WithdrawalClaim
                | OutputType::NodePledge
                | OutputType::NodeCancel
                | OutputType::NodeAccept => {
                    if !output.keys.is_empty() {
                        return Err(ValidationError::KernelMultisigKeys(output.keys.len()));
                    }
                    if !output.script.is_empty() {
                        return Err(ValidationError::KernelMultisigScript(
                            output.script.to_string(),
                        ));
                    }
                    if let Some(mask) = output.mask {
                        return Err(ValidationError::KernelMultisigMask(mask));
                    }
                }
                _ => {
                    output.script.verify_format()?;
                    if output.mask.is_none() {
                        return Err(ValidationError::ScriptOutputEmptyMask);
                    }
                }
            }
            output_amount = output_amount.add(output.amount);
        }

        if input_amount != output_amount {
            return Err(ValidationError::AmountMismatch(input_amount, output_amount));
        }
        store.lock_ghost_keys(&ghost_keys, hash, fork).await?;
        Ok(())
    }

    async fn validate_mint<S>(&self, store: &S) -> Result<(), ValidationError>
    where
        S: DataStore + ?Sized,
    {
        if self.inputs.len() != 1 {
            return Err(ValidationError::InvalidMintInputsCount(self.inputs.len()));
        }
        let mint = match &self.inputs[0] {
            Input::Mint(mint) => mint,
            _ => return Err(ValidationError::InvalidType(TransactionType::Mint.code())),
        };
        if mint.group != MINT_GROUP_KERNEL_NODE {
            return Err(ValidationError::InvalidMintGroup(mint.group.clone()));
        }
        if mint.amount.sign() <= 0 {
            return Err(ValidationError::InvalidMintAmount(mint.amount));
        }
        let last = store.read_last_mint_distribution().await?;
        let expected = last.as_ref().map_or(1, |d| d.batch + 1);
        if mint.batch != expected {
            return Err(ValidationError::InvalidMintBatch(mint.batch, expected));
        }
        Ok(())
    }

    async fn validate_deposit<S>(
        &self,
        store: &S,
        hash: &Hash,
        snap_time: u64,
    ) -> Result<(), ValidationError>
    where
        S: DataStore + ?Sized,
    {
        if self.inputs.len() != 1 {
            return Err(ValidationError::InvalidDepositInputsCount(self.inputs.len()));
        }
        let deposit = match &self.inputs[0] {
            Input::Deposit(deposit) => deposit,
            _ => {
                return Err(ValidationError::InvalidType(
                    TransactionType::Deposit.code(),
                ))
            }
        };
        if !deposit.chain.has_value()
            || deposit.asset_key.is_empty()
            || deposit.transaction_key.is_empty()
        {
            return Err(ValidationError::InvalidDepositData(
                deposit.transaction_key.clone(),
            ));
        }
        if deposit.amount.sign() <= 0 {
            return Err(ValidationError::InvalidDepositData(
                deposit.amount.to_string(),
            ));
        }
        // proof verification happens behind the locker, against the
        // snapshot time of the containing snapshot
        store
            .lock_deposit_input(deposit, hash, snap_time, false)
            .await?;
        Ok(())
    }

    fn validate_withdrawal_submit(
        &self,
        inputs: &IndexMap<String, Utxo>,
    ) -> Result<(), ValidationError> {
        if self.outputs.len() > 2 {
            return Err(ValidationError::InvalidWithdrawalOutputsCount(
                self.outputs.len(),
            ));
        }
        let submit = &self.outputs[0];
        if submit.output_type != OutputType::WithdrawalSubmit {
            return Err(ValidationError::InvalidWithdrawalSubmitType(
                submit.output_type.code(),
            ));
        }
        match &submit.withdrawal {
            Some(withdrawal) if !withdrawal.address.is_empty() && withdrawal.chain.has_value() => {}
            _ => return Err(ValidationError::InvalidWithdrawalSubmitData),
        }
        require_script_inputs(inputs)
    }

    async fn validate_withdrawal_claim<S>(
        &self,
        store: &S,
        inputs: &IndexMap<String, Utxo>,
    ) -> Result<(), ValidationError>
    where
        S: DataStore + ?Sized,
    {
        if self.extra.len() != 32 {
            return Err(ValidationError::InvalidWithdrawalClaimExtra(
                self.extra.len(),
            ));
        }
        let submit_hash = Hash::new(self.extra[..32].try_into().unwrap());
        let (submit, _) = store
            .read_transaction(&submit_hash)
            .await?
            .ok_or(ValidationError::WithdrawalSubmitNotFound(submit_hash))?;
        if submit.transaction_type() != TransactionType::WithdrawalSubmit {
            return Err(ValidationError::InvalidWithdrawalSubmitTransaction(
                submit_hash,
            ));
        }
        if self.outputs[0].output_type != OutputType::WithdrawalClaim {
            return Err(ValidationError::InvalidWithdrawalSubmitType(
                self.outputs[0].output_type.code(),
            ));
        }
        require_script_inputs(inputs)
    }

    fn validate_node_pledge(&self, inputs: &IndexMap<String, Utxo>) -> Result<(), ValidationError> {
        if self.outputs.len() != 1 {
            return Err(ValidationError::InvalidPledgeOutputsCount(
                self.outputs.len(),
            ));
        }
        if self.extra.len() != NODE_EXTRA_SIZE {
            return Err(ValidationError::InvalidPledgeExtra(self.extra.len()));
        }
        require_script_inputs(inputs)
    }

    async fn validate_node_cancel<S>(&self, store: &S) -> Result<(), ValidationError>
    where
        S: DataStore + ?Sized,
    {
        if self.inputs.len() != 1 {
            return Err(ValidationError::InvalidCancelInputsCount(self.inputs.len()));
        }
        if self.outputs.len() != 2 {
            return Err(ValidationError::InvalidCancelOutputsCount(
                self.outputs.len(),
            ));
        }
        if self.outputs[0].output_type != OutputType::NodeCancel {
            return Err(ValidationError::InvalidCancelOutputsCount(
                self.outputs.len(),
            ));
        }
        if self.extra.len() != NODE_EXTRA_SIZE {
            return Err(ValidationError::InvalidCancelExtra(self.extra.len()));
        }
        let pledge_hash = match &self.inputs[0] {
            Input::Utxo { hash, .. } => *hash,
            _ => {
                return Err(ValidationError::InvalidType(
                    TransactionType::NodeCancel.code(),
                ))
            }
        };
        let (pledge, _) = store
            .read_transaction(&pledge_hash)
            .await?
            .ok_or(ValidationError::PledgeNotFound(pledge_hash))?;
        if pledge.extra != self.extra {
            return Err(ValidationError::CancelExtraMismatch(pledge_hash));
        }
        Ok(())
    }

    fn validate_node_accept(&self) -> Result<(), ValidationError> {
        if self.inputs.len() != 1 {
            return Err(ValidationError::InvalidAcceptInputsCount(self.inputs.len()));
        }
        if self.outputs.len() != 1 {
            return Err(ValidationError::InvalidAcceptOutputsCount(
                self.outputs.len(),
            ));
        }
        if self.extra.len() != NODE_EXTRA_SIZE {
            return Err(ValidationError::InvalidAcceptExtra(self.extra.len()));
        }
        Ok(())
    }

    fn validate_node_remove(&self) -> Result<(), ValidationError> {
        if self.inputs.len() != 1 {
            return Err(ValidationError::InvalidRemoveInputsCount(self.inputs.len()));
        }
        if self.outputs.len() != 1 {
            return Err(ValidationError::InvalidRemoveOutputsCount(
                self.outputs.len(),
            ));
        }
        if self.extra.len() != NODE_EXTRA_SIZE {
            return Err(ValidationError::InvalidRemoveExtra(self.extra.len()));
        }
        Ok(())
    }

    async fn validate_custodian_update_nodes<S>(&self, store: &S) -> Result<(), ValidationError>
    where
        S: DataStore + ?Sized,
    {
        let records = CustodianNodeRecord::decode_all(&self.extra)
            .ok_or(ValidationError::InvalidCustodianUpdateExtra(self.extra.len()))?;
        for record in &records {
            for key in [record.custodian, record.payee, record.signer] {
                if !key.check_key() {
                    return Err(ValidationError::InvalidCustodianNodeKey(key));
                }
            }
        }
        // updates are only meaningful against an installed custodian set;
        // the custodian's approval signature is checked by that collaborator
        if store.read_custodian().await?.is_none() {
            return Err(ValidationError::CustodianNotInitialized);
        }
        Ok(())
    }
}

fn validate_script_transaction(inputs: &IndexMap<String, Utxo>) -> Result<(), ValidationError> {
    for utxo in inputs.values() {
        if utxo.output_type != OutputType::Script && utxo.output_type != OutputType::NodeRemove {
            return Err(ValidationError::InvalidUtxoType(utxo.output_type.code()));
        }
    }
    Ok(())
}

fn require_script_inputs(inputs: &IndexMap<String, Utxo>) -> Result<(), ValidationError> {
    for utxo in inputs.values() {
        if utxo.output_type != OutputType::Script {
            return Err(ValidationError::InvalidUtxoType(utxo.output_type.code()));
        }
    }
    Ok(())
}

fn validate_utxo(
    index: usize,
    utxo: &Utxo,
    sigs: Option<&SignaturesMap>,
    aggregated: Option<&AggregatedSignature>,
    tx_type: TransactionType,
    key_sigs: &mut IndexMap<Key, Option<Signature>>,
    offset: usize,
) -> Result<(), ValidationError> {
    match utxo.output_type {
        OutputType::Script | OutputType::NodeRemove => {
            if let Some(aggregated) = aggregated {
                let limit = offset + utxo.keys.len();
                let mut signers = 0usize;
                for &m in &aggregated.signers {
                    if m >= limit {
                        break;
                    }
                    if m < offset {
                        continue;
                    }
                    key_sigs.insert(utxo.keys[m - offset], None);
                    signers += 1;
                }
                utxo.script.validate(signers)?;
            } else {
                let map = sigs
                    .and_then(|s| s.get(index))
                    .ok_or(ValidationError::MissingSignatures(index))?;
                for (&i, sig) in map {
                    if i as usize >= utxo.keys.len() {
                        return Err(ValidationError::InvalidSignatureMapIndex(
                            i as usize,
                            utxo.keys.len(),
                        ));
                    }
                    key_sigs.insert(utxo.keys[i as usize], Some(*sig));
                }
                utxo.script.validate(map.len())?;
            }
            Ok(())
        }
        OutputType::NodePledge => {
            if tx_type == TransactionType::NodeAccept || tx_type == TransactionType::NodeCancel {
                Ok(())
            } else {
                Err(ValidationError::PledgeInputForInvalidType(tx_type.code()))
            }
        }
        OutputType::NodeAccept => {
            if tx_type == TransactionType::NodeRemove {
                Ok(())
            } else {
                Err(ValidationError::AcceptInputForInvalidType(tx_type.code()))
            }
        }
        // TODO enable the cancel-refund spend path once its validation exists
        OutputType::NodeCancel => Err(ValidationError::UnsupportedCancelInput(
            utxo.output_type.code(),
        )),
        _ => Err(ValidationError::InvalidInputType(utxo.output_type.code())),
    }
}
