use serde::{Deserialize, Serialize};

use super::OutputType;
use crate::{
    crypto::{Hash, Key},
    integer::Integer,
    script::Script,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

/// Durable unspent output, materialised by the store from the producing
/// transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub output_type: OutputType,
    pub amount: Integer,
    pub keys: Vec<Key>,
    pub script: Script,
    pub mask: Option<Key>,
    pub asset: Hash,
}

/// A UTXO together with the advisory mempool-level lock naming the
/// transaction currently attempting to spend it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoWithLock {
    pub utxo: Utxo,
    pub lock_hash: Option<Hash>,
}

impl Serializer for Utxo {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.output_type.code());
        self.amount.write(writer);
        writer.write_u16(self.keys.len() as u16);
        for key in &self.keys {
            key.write(writer);
        }
        self.script.write(writer);
        match &self.mask {
            Some(mask) => {
                writer.write_u8(1);
                mask.write(writer);
            }
            None => writer.write_u8(0),
        }
        self.asset.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let output_type =
            OutputType::from_code(reader.read_u8()?).ok_or(ReaderError::InvalidValue)?;
        let amount = Integer::read(reader)?;
        let count = reader.read_u16()? as usize;
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(Key::read(reader)?);
        }
        let script = Script::read(reader)?;
        let mask = match reader.read_u8()? {
            0 => None,
            1 => Some(Key::read(reader)?),
            _ => return Err(ReaderError::InvalidValue),
        };
        Ok(Utxo {
            output_type,
            amount,
            keys,
            script,
            mask,
            asset: Hash::read(reader)?,
        })
    }
}
