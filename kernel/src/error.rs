use thiserror::Error;

use vela_common::{
    crypto::{CryptoError, Hash},
    integer::Integer,
    node::NodeState,
    store::StoreError,
    transaction::ValidationError,
};

use crate::genesis::GenesisError;

#[derive(Error, Debug)]
pub enum KernelError {
    // election / lifecycle rejections, expected on non-elected ticks
    #[error("node remove operation at {0} only by {1} not {2}")]
    RemoveElectionMismatch(u64, Hash, Hash),
    #[error("node pledge operation at {0} only by {1} not {2}")]
    PledgeElectionMismatch(u64, Hash, Hash),
    #[error("still pledging now {0}")]
    StillPledging(String),
    #[error("local time invalid {0} {1}")]
    LocalTimeInvalid(u64, u64),
    #[error("invalid node remove hour {0}")]
    InvalidRemoveHour(u64),
    #[error("invalid node accept hour {0}")]
    InvalidAcceptHour(u64),
    #[error("invalid node cancel hour {0}")]
    InvalidCancelHour(u64),
    #[error("invalid node pledge hour {0}")]
    InvalidPledgeHour(u64),
    #[error("invalid timestamp {0} {1}")]
    InvalidTimestamp(u64, u64),
    #[error("invalid snapshot timestamp {0} {1}")]
    InvalidSnapshotTimestamp(u64, u64),
    #[error("invalid period {0} {1} {2} {3}")]
    InvalidPeriod(u64, u64, u64, u64),
    #[error("invalid pledge period {0} {1}")]
    InvalidPledgePeriod(u64, u64),
    #[error("invalid accept period {0} {1}")]
    InvalidAcceptPeriod(u64, u64),
    #[error("invalid cancel period {0} {1}")]
    InvalidCancelPeriod(u64, u64),
    #[error("invalid node pending state {0} {1}")]
    InvalidNodePendingState(String, NodeState),
    #[error("all old nodes removed {0}")]
    AllOldNodesRemoved(usize),
    #[error("never handle the node remove transaction by the node self")]
    RemoveBySelf,
    #[error("no consensus pledging node")]
    NoPledgingNode,
    #[error("invalid consensus pledging node {0} {1}")]
    PledgingNodeMismatch(String, String),
    #[error("invalid consensus status")]
    InvalidConsensusStatus,
    #[error("invalid graph round {0} {1}")]
    InvalidGraphRound(Hash, u64),
    #[error("invalid snapshot round {0}")]
    InvalidSnapshotRound(u64),
    #[error("pledge transaction not available yet {0}")]
    PledgeNotAvailable(Hash),
    #[error("pledge transaction malformed {0} {1}")]
    PledgeMalformed(Hash, Hash),
    #[error("invalid pledge transaction extra {0}")]
    InvalidPledgeExtra(String),
    #[error("accept transaction not available yet {0}")]
    AcceptNotAvailable(Hash),
    #[error("accept transaction malformed {0} {1}")]
    AcceptMalformed(Hash, Hash),
    #[error("invalid accept transaction extra {0}")]
    InvalidAcceptExtra(String),
    #[error("invalid pledge amount {0}")]
    InvalidPledgeAmount(Integer),
    #[error("invalid node signer key {0} {1}")]
    InvalidNodeSignerKey(String, String),
    #[error("maximum kernel nodes count reached because cosi signature mask limit {0}")]
    MaxNodesCountReached(Hash),
    #[error("invalid node accept transaction {0} {1}")]
    AcceptRebuildMismatch(Hash, Hash),
    #[error("invalid node remove transaction {0} {1}")]
    RemoveRebuildMismatch(Hash, Hash),
    #[error("invalid node extra {0}")]
    InvalidNodeExtra(String),

    // import
    #[error("kernel already initialized {0} {1}")]
    AlreadyInitialized(usize, usize),
    #[error("kernel genesis unmatch {0} {1} {2}")]
    GenesisMismatch(usize, Hash, Hash),
    #[error("malformed transaction hash {0} {1}")]
    MalformedTransactionHash(Hash, Hash),
    #[error("snapshot without sole transaction at round {0}")]
    SnapshotWithoutSoleTransaction(u64),
    #[error("round out of order {0} {1}")]
    RoundOutOfOrder(u64, u64),
    #[error("no consensus snapshot available")]
    NoConsensusSnapshot,
    #[error("import interrupted")]
    ImportInterrupted,

    #[error(transparent)]
    Genesis(#[from] GenesisError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
