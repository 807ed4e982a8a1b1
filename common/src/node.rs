use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::crypto::{Address, Hash};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeState {
    Pledging,
    Accepted,
    Cancelled,
    Removed,
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::Pledging => "PLEDGING",
            NodeState::Accepted => "ACCEPTED",
            NodeState::Cancelled => "CANCELLED",
            NodeState::Removed => "REMOVED",
        };
        write!(f, "{}", s)
    }
}

/// A member of the kernel node set, created by a finalised pledge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusNode {
    pub signer: Address,
    pub payee: Address,
    pub state: NodeState,
    /// Nanosecond timestamp of the pledge
    pub timestamp: u64,
    /// Hash of the transaction that moved the node into its current state
    pub transaction: Hash,
}

impl ConsensusNode {
    pub fn id_for_network(&self, network_id: &Hash) -> Hash {
        self.signer.hash().for_network(network_id)
    }
}
