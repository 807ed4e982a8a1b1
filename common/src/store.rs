use async_trait::async_trait;
use thiserror::Error;

use crate::{
    crypto::{Address, Hash, Key},
    integer::Integer,
    transaction::{DepositData, Transaction, UtxoWithLock},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("ghost key {0} locked by transaction {1}")]
    GhostKeyLocked(Key, Hash),
    #[error("node operation locked until {0}")]
    NodeOperationLocked(u64),
    #[error("deposit {0}:{1} already claimed")]
    DepositClaimed(String, u64),
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

/// Latest entry of the mint schedule, consulted when validating a Mint
/// transaction. The distribution algorithm itself lives outside the kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MintDistribution {
    pub group: String,
    pub batch: u64,
    pub amount: Integer,
    pub transaction: Hash,
}

#[async_trait]
pub trait TransactionReader: Send + Sync {
    /// Resolve a transaction hash to the transaction and the id of the
    /// snapshot that finalised it. Both must be present for a reference to
    /// count as resolved.
    async fn read_transaction(
        &self,
        hash: &Hash,
    ) -> Result<Option<(Transaction, String)>, StoreError>;
}

#[async_trait]
pub trait UtxoLockReader: Send + Sync {
    async fn read_utxo_lock(
        &self,
        hash: &Hash,
        index: u16,
    ) -> Result<Option<UtxoWithLock>, StoreError>;
}

#[async_trait]
pub trait GhostLocker: Send + Sync {
    /// Atomically claim the ghost keys for a transaction. Fails when any key
    /// is already claimed by a different live transaction; under `fork` the
    /// existing claim is overwritten.
    async fn lock_ghost_keys(
        &self,
        keys: &[Key],
        tx_hash: &Hash,
        fork: bool,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait NodeOperationLocker: Send + Sync {
    /// Register a node membership operation under a TTL, rejecting a second
    /// concurrent operation within the window.
    async fn add_node_operation(
        &self,
        tx: &Transaction,
        timestamp: u64,
        ttl: u64,
        finalized: bool,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MintReader: Send + Sync {
    async fn read_last_mint_distribution(&self) -> Result<Option<MintDistribution>, StoreError>;
}

#[async_trait]
pub trait DepositLocker: Send + Sync {
    /// Verify the deposit proof against the snapshot time and claim it for
    /// a transaction; a deposit may only ever be claimed once. The proof
    /// math itself lives in the deposit collaborator behind this trait.
    async fn lock_deposit_input(
        &self,
        deposit: &DepositData,
        tx_hash: &Hash,
        snap_time: u64,
        fork: bool,
    ) -> Result<(), StoreError>;
}

/// The current custodian account and the transaction that installed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustodianState {
    pub custodian: Address,
    pub transaction: Hash,
    pub timestamp: u64,
}

#[async_trait]
pub trait CustodianReader: Send + Sync {
    async fn read_custodian(&self) -> Result<Option<CustodianState>, StoreError>;
}

/// Everything the transaction validator needs from the persistence layer.
pub trait DataStore:
    TransactionReader
    + UtxoLockReader
    + GhostLocker
    + NodeOperationLocker
    + MintReader
    + DepositLocker
    + CustodianReader
{
}

impl<T> DataStore for T where
    T: TransactionReader
        + UtxoLockReader
        + GhostLocker
        + NodeOperationLocker
        + MintReader
        + DepositLocker
        + CustodianReader
{
}
