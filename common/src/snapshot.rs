use serde::{Deserialize, Serialize};

use crate::{
    config::SNAPSHOT_VERSION_COMMON_ENCODING,
    crypto::{hash, Hash},
    serializer::{Reader, ReaderError, Serializer, Writer},
};

/// Link from a round to its predecessor on the same chain and to the
/// referenced round of another chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundLink {
    pub self_hash: Hash,
    pub external: Hash,
}

/// A node-signed bundle advancing one chain's round, carrying a set
/// (usually singleton) of transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u8,
    pub node_id: Hash,
    pub round_number: u64,
    pub references: Option<RoundLink>,
    pub timestamp: u64,
    pub transactions: Vec<Hash>,
}

impl Snapshot {
    pub fn new(node_id: Hash) -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION_COMMON_ENCODING,
            node_id,
            round_number: 0,
            references: None,
            timestamp: 0,
            transactions: Vec::new(),
        }
    }

    pub fn add_sole_transaction(&mut self, tx: Hash) {
        self.transactions = vec![tx];
    }

    /// The single transaction a snapshot carries in the common case.
    pub fn sole_transaction(&self) -> Option<Hash> {
        match self.transactions.as_slice() {
            [tx] => Some(*tx),
            _ => None,
        }
    }

    pub fn payload_hash(&self) -> Hash {
        hash(&self.to_bytes())
    }
}

impl Serializer for Snapshot {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.version);
        self.node_id.write(writer);
        writer.write_u64(&self.round_number);
        match &self.references {
            Some(link) => {
                writer.write_u8(1);
                link.self_hash.write(writer);
                link.external.write(writer);
            }
            None => writer.write_u8(0),
        }
        writer.write_u64(&self.timestamp);
        writer.write_u16(self.transactions.len() as u16);
        for tx in &self.transactions {
            tx.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let version = reader.read_u8()?;
        let node_id = Hash::read(reader)?;
        let round_number = reader.read_u64()?;
        let references = match reader.read_u8()? {
            0 => None,
            1 => Some(RoundLink {
                self_hash: Hash::read(reader)?,
                external: Hash::read(reader)?,
            }),
            _ => return Err(ReaderError::InvalidValue),
        };
        let timestamp = reader.read_u64()?;
        let count = reader.read_u16()? as usize;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Hash::read(reader)?);
        }
        Ok(Snapshot {
            version,
            node_id,
            round_number,
            references,
            timestamp,
            transactions,
        })
    }
}

/// A finalised snapshot as the topology layer stores it, with its global
/// sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotWithTopologicalOrder {
    pub snapshot: Snapshot,
    pub topological_order: u64,
}

impl SnapshotWithTopologicalOrder {
    pub fn transaction(&self) -> Option<Hash> {
        self.snapshot.sole_transaction()
    }
}
