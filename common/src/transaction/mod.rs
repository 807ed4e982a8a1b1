mod utxo;
pub mod validation;

#[cfg(test)]
mod tests;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    config::{EXTRA_SIZE_GENERAL_LIMIT, EXTRA_SIZE_STORAGE_CAPACITY, EXTRA_SIZE_STORAGE_STEP, EXTRA_STORAGE_PRICE_STEP, TX_VERSION_HASH_SIGNATURE, VELA_ASSET_ID},
    crypto::{derive_ghost_public_key, hash, Address, CryptoError, Hash, Key, PrivateKey, Signature},
    integer::Integer,
    script::Script,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

pub use utxo::{Utxo, UtxoWithLock};
pub use validation::ValidationError;

// The compact threshold script marking an output as a storage fee payment
const STORAGE_SCRIPT: &str = "fffe40";

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Script,
    WithdrawalSubmit,
    NodePledge,
    WithdrawalClaim,
    NodeAccept,
    NodeCancel,
    NodeRemove,
    CustodianUpdateNodes,
    CustodianSlashNodes,
}

impl OutputType {
    pub fn code(self) -> u8 {
        match self {
            OutputType::Script => 0x00,
            OutputType::WithdrawalSubmit => 0xa1,
            OutputType::NodePledge => 0xa2,
            OutputType::WithdrawalClaim => 0xa3,
            OutputType::NodeAccept => 0xa4,
            OutputType::NodeCancel => 0xa5,
            OutputType::NodeRemove => 0xa6,
            OutputType::CustodianUpdateNodes => 0xa7,
            OutputType::CustodianSlashNodes => 0xa8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(OutputType::Script),
            0xa1 => Some(OutputType::WithdrawalSubmit),
            0xa2 => Some(OutputType::NodePledge),
            0xa3 => Some(OutputType::WithdrawalClaim),
            0xa4 => Some(OutputType::NodeAccept),
            0xa5 => Some(OutputType::NodeCancel),
            0xa6 => Some(OutputType::NodeRemove),
            0xa7 => Some(OutputType::CustodianUpdateNodes),
            0xa8 => Some(OutputType::CustodianSlashNodes),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum TransactionType {
    Script,
    Mint,
    Deposit,
    WithdrawalSubmit,
    WithdrawalClaim,
    NodePledge,
    NodeAccept,
    NodeCancel,
    NodeRemove,
    CustodianUpdateNodes,
    CustodianSlashNodes,
    Unknown,
}

impl TransactionType {
    pub fn code(self) -> u8 {
        match self {
            TransactionType::Script => 0x00,
            TransactionType::Mint => 0x01,
            TransactionType::Deposit => 0x02,
            TransactionType::WithdrawalSubmit => 0x03,
            TransactionType::WithdrawalClaim => 0x05,
            TransactionType::NodePledge => 0x06,
            TransactionType::NodeAccept => 0x07,
            TransactionType::NodeCancel => 0x08,
            TransactionType::NodeRemove => 0x09,
            TransactionType::CustodianUpdateNodes => 0x0a,
            TransactionType::CustodianSlashNodes => 0x0b,
            TransactionType::Unknown => 0xff,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintData {
    pub group: String,
    pub batch: u64,
    pub amount: Integer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositData {
    pub chain: Hash,
    pub asset_key: String,
    pub transaction_key: String,
    pub output_index: u64,
    pub amount: Integer,
}

/// One source of value for a transaction. Exactly one form per input, by
/// construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    Utxo { hash: Hash, index: u16 },
    Genesis(#[serde(with = "hex")] Vec<u8>),
    Mint(MintData),
    Deposit(DepositData),
}

impl Input {
    /// The `hash:index` form used to reject duplicate spends within one
    /// transaction.
    pub fn fingerprint(&self) -> Option<String> {
        match self {
            Input::Utxo { hash, index } => Some(format!("{}:{}", hash, index)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalData {
    pub chain: Hash,
    pub address: String,
    pub tag: String,
}

pub const CUSTODIAN_RECORD_SIZE: usize = 96;

/// One custodian node entry as carried in a CustodianUpdateNodes extra:
/// custodian key ‖ payee key ‖ node signer key, 96 bytes per record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CustodianNodeRecord {
    pub custodian: Key,
    pub payee: Key,
    pub signer: Key,
}

impl CustodianNodeRecord {
    /// Decode a whole extra payload into records. Returns None unless the
    /// payload is a non-empty sequence of complete records.
    pub fn decode_all(extra: &[u8]) -> Option<Vec<CustodianNodeRecord>> {
        if extra.is_empty() || extra.len() % CUSTODIAN_RECORD_SIZE != 0 {
            return None;
        }
        let records = extra
            .chunks_exact(CUSTODIAN_RECORD_SIZE)
            .map(|chunk| CustodianNodeRecord {
                custodian: Key::new(chunk[..32].try_into().unwrap()),
                payee: Key::new(chunk[32..64].try_into().unwrap()),
                signer: Key::new(chunk[64..96].try_into().unwrap()),
            })
            .collect();
        Some(records)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub output_type: OutputType,
    pub amount: Integer,
    pub keys: Vec<Key>,
    pub script: Script,
    pub mask: Option<Key>,
    pub withdrawal: Option<WithdrawalData>,
}

/// Cosi-style signature over the whole payload: the signer indices select
/// keys out of the concatenated input key set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatedSignature {
    pub signers: Vec<usize>,
    pub signature: Signature,
}

/// Per-input signature maps, keyed by the index of the signing key within
/// the spent output's key list. Insertion order is preserved so batch
/// verification sees a deterministic key order.
pub type SignaturesMap = Vec<IndexMap<u16, Signature>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u8,
    pub asset: Hash,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub references: Vec<Hash>,
    pub extra: Vec<u8>,
    pub signatures_map: Option<SignaturesMap>,
    pub aggregated: Option<AggregatedSignature>,
}

impl Transaction {
    pub fn new(asset: Hash) -> Self {
        Transaction {
            version: TX_VERSION_HASH_SIGNATURE,
            asset,
            inputs: Vec::new(),
            outputs: Vec::new(),
            references: Vec::new(),
            extra: Vec::new(),
            signatures_map: None,
            aggregated: None,
        }
    }

    /// Derived from the inputs and outputs; transactions never carry an
    /// explicit type tag on the wire.
    pub fn transaction_type(&self) -> TransactionType {
        for input in &self.inputs {
            match input {
                Input::Mint(_) => return TransactionType::Mint,
                Input::Deposit(_) => return TransactionType::Deposit,
                _ => {}
            }
        }
        let mut found = None;
        for output in &self.outputs {
            let special = match output.output_type {
                OutputType::Script => continue,
                OutputType::WithdrawalSubmit => TransactionType::WithdrawalSubmit,
                OutputType::WithdrawalClaim => TransactionType::WithdrawalClaim,
                OutputType::NodePledge => TransactionType::NodePledge,
                OutputType::NodeAccept => TransactionType::NodeAccept,
                OutputType::NodeCancel => TransactionType::NodeCancel,
                OutputType::NodeRemove => TransactionType::NodeRemove,
                OutputType::CustodianUpdateNodes => TransactionType::CustodianUpdateNodes,
                OutputType::CustodianSlashNodes => TransactionType::CustodianSlashNodes,
            };
            match found {
                None => found = Some(special),
                Some(existing) if existing == special => {}
                Some(_) => return TransactionType::Unknown,
            }
        }
        found.unwrap_or(TransactionType::Script)
    }

    pub fn add_input(&mut self, hash: Hash, index: u16) {
        self.inputs.push(Input::Utxo { hash, index });
    }

    /// Append an output paying the given accounts through one-time ghost
    /// keys derived from the seed. Kernel-multisig outputs pass no accounts
    /// and carry no ghost material.
    pub fn add_output_with_type(
        &mut self,
        output_type: OutputType,
        accounts: &[&Address],
        script: Script,
        amount: Integer,
        seed: &[u8],
    ) -> Result<(), CryptoError> {
        if accounts.is_empty() {
            self.outputs.push(Output {
                output_type,
                amount,
                keys: Vec::new(),
                script,
                mask: None,
                withdrawal: None,
            });
            return Ok(());
        }
        let r = PrivateKey::from_seed(seed);
        let output_index = self.outputs.len() as u64;
        let mut keys = Vec::with_capacity(accounts.len());
        for account in accounts {
            keys.push(derive_ghost_public_key(
                &r,
                &account.public_view_key,
                &account.public_spend_key,
                output_index,
            )?);
        }
        self.outputs.push(Output {
            output_type,
            amount,
            keys,
            script,
            mask: Some(r.public()),
            withdrawal: None,
        });
        Ok(())
    }

    /// The canonical signed-over encoding: version byte then the common
    /// encoding of the body, signatures excluded.
    pub fn payload_marshal(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_u8(self.version);
        self.asset.write(&mut writer);
        writer.write_u16(self.inputs.len() as u16);
        for input in &self.inputs {
            input.write(&mut writer);
        }
        writer.write_u16(self.outputs.len() as u16);
        for output in &self.outputs {
            output.write(&mut writer);
        }
        writer.write_u16(self.references.len() as u16);
        for reference in &self.references {
            reference.write(&mut writer);
        }
        writer.write_u32(&(self.extra.len() as u32));
        writer.write_bytes(&self.extra);
        writer.bytes()
    }

    pub fn payload_hash(&self) -> Hash {
        hash(&self.payload_marshal())
    }

    /// The signer address a node transaction advertises in its extra field.
    /// Only the spend key is carried; the view key is derived.
    pub fn node_extra_as_signer(&self) -> Option<Address> {
        if self.extra.len() < 32 {
            return None;
        }
        let spend = Key::new(self.extra[..32].try_into().unwrap());
        Some(Address::from_spend_key(spend))
    }

    /// How many extra bytes this transaction may carry. Storage space is
    /// bought with a dedicated single-key `fffe40` output on the native
    /// asset; everything else gets the general limit.
    pub fn extra_limit(&self) -> usize {
        if self.asset != VELA_ASSET_ID {
            return EXTRA_SIZE_GENERAL_LIMIT;
        }
        let out = match self.find_storage_output() {
            Some(out) => out,
            None => return EXTRA_SIZE_GENERAL_LIMIT,
        };
        match out.output_type {
            OutputType::Script => {}
            OutputType::CustodianUpdateNodes => return EXTRA_SIZE_STORAGE_CAPACITY,
            _ => return EXTRA_SIZE_GENERAL_LIMIT,
        }
        if out.amount.cmp_amount(EXTRA_STORAGE_PRICE_STEP).is_lt() {
            return EXTRA_SIZE_GENERAL_LIMIT;
        }
        let cells = out.amount.count(EXTRA_STORAGE_PRICE_STEP);
        let limit = (cells as usize).saturating_mul(EXTRA_SIZE_STORAGE_STEP);
        limit.min(EXTRA_SIZE_STORAGE_CAPACITY)
    }

    fn find_storage_output(&self) -> Option<&Output> {
        let mut so: Option<&Output> = None;
        for out in &self.outputs {
            if out.keys.len() != 1 {
                continue;
            }
            if out.script.to_string() != STORAGE_SCRIPT {
                continue;
            }
            match so {
                None => so = Some(out),
                Some(best) if out.amount.cmp_amount(best.amount).is_gt() => so = Some(out),
                Some(_) => {}
            }
        }
        so
    }
}

impl Serializer for MintData {
    fn write(&self, writer: &mut Writer) {
        writer.write_u16(self.group.len() as u16);
        writer.write_bytes(self.group.as_bytes());
        writer.write_u64(&self.batch);
        self.amount.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let len = reader.read_u16()? as usize;
        let group = String::from_utf8(reader.read_bytes(len)?).map_err(|_| ReaderError::InvalidValue)?;
        Ok(MintData {
            group,
            batch: reader.read_u64()?,
            amount: Integer::read(reader)?,
        })
    }
}

impl Serializer for DepositData {
    fn write(&self, writer: &mut Writer) {
        self.chain.write(writer);
        writer.write_u16(self.asset_key.len() as u16);
        writer.write_bytes(self.asset_key.as_bytes());
        writer.write_u16(self.transaction_key.len() as u16);
        writer.write_bytes(self.transaction_key.as_bytes());
        writer.write_u64(&self.output_index);
        self.amount.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let chain = Hash::read(reader)?;
        let len = reader.read_u16()? as usize;
        let asset_key = String::from_utf8(reader.read_bytes(len)?).map_err(|_| ReaderError::InvalidValue)?;
        let len = reader.read_u16()? as usize;
        let transaction_key = String::from_utf8(reader.read_bytes(len)?).map_err(|_| ReaderError::InvalidValue)?;
        Ok(DepositData {
            chain,
            asset_key,
            transaction_key,
            output_index: reader.read_u64()?,
            amount: Integer::read(reader)?,
        })
    }
}

impl Serializer for Input {
    fn write(&self, writer: &mut Writer) {
        match self {
            Input::Utxo { hash, index } => {
                writer.write_u8(0);
                hash.write(writer);
                writer.write_u16(*index);
            }
            Input::Genesis(bytes) => {
                writer.write_u8(1);
                writer.write_u16(bytes.len() as u16);
                writer.write_bytes(bytes);
            }
            Input::Mint(mint) => {
                writer.write_u8(2);
                mint.write(writer);
            }
            Input::Deposit(deposit) => {
                writer.write_u8(3);
                deposit.write(writer);
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(Input::Utxo {
                hash: Hash::read(reader)?,
                index: reader.read_u16()?,
            }),
            1 => {
                let len = reader.read_u16()? as usize;
                Ok(Input::Genesis(reader.read_bytes(len)?))
            }
            2 => Ok(Input::Mint(MintData::read(reader)?)),
            3 => Ok(Input::Deposit(DepositData::read(reader)?)),
            _ => Err(ReaderError::InvalidValue),
        }
    }
}

impl Serializer for WithdrawalData {
    fn write(&self, writer: &mut Writer) {
        self.chain.write(writer);
        writer.write_u16(self.address.len() as u16);
        writer.write_bytes(self.address.as_bytes());
        writer.write_u16(self.tag.len() as u16);
        writer.write_bytes(self.tag.as_bytes());
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let chain = Hash::read(reader)?;
        let len = reader.read_u16()? as usize;
        let address = String::from_utf8(reader.read_bytes(len)?).map_err(|_| ReaderError::InvalidValue)?;
        let len = reader.read_u16()? as usize;
        let tag = String::from_utf8(reader.read_bytes(len)?).map_err(|_| ReaderError::InvalidValue)?;
        Ok(WithdrawalData { chain, address, tag })
    }
}

impl Serializer for Output {
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
        match &self.withdrawal {
            Some(withdrawal) => {
                writer.write_u8(1);
                withdrawal.write(writer);
            }
            None => writer.write_u8(0),
        }
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
        let withdrawal = match reader.read_u8()? {
            0 => None,
            1 => Some(WithdrawalData::read(reader)?),
            _ => return Err(ReaderError::InvalidValue),
        };
        Ok(Output {
            output_type,
            amount,
            keys,
            script,
            mask,
            withdrawal,
        })
    }
}

impl Serializer for AggregatedSignature {
    fn write(&self, writer: &mut Writer) {
        writer.write_u16(self.signers.len() as u16);
        for signer in &self.signers {
            writer.write_u16(*signer as u16);
        }
        self.signature.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let count = reader.read_u16()? as usize;
        let mut signers = Vec::with_capacity(count);
        for _ in 0..count {
            signers.push(reader.read_u16()? as usize);
        }
        Ok(AggregatedSignature {
            signers,
            signature: Signature::read(reader)?,
        })
    }
}

impl Serializer for Transaction {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.payload_marshal());
        match (&self.signatures_map, &self.aggregated) {
            (Some(maps), _) => {
                writer.write_u8(1);
                writer.write_u16(maps.len() as u16);
                for map in maps {
                    writer.write_u16(map.len() as u16);
                    for (index, signature) in map {
                        writer.write_u16(*index);
                        signature.write(writer);
                    }
                }
            }
            (None, Some(aggregated)) => {
                writer.write_u8(2);
                aggregated.write(writer);
            }
            (None, None) => writer.write_u8(0),
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let version = reader.read_u8()?;
        let asset = Hash::read(reader)?;
        let count = reader.read_u16()? as usize;
        let mut inputs = Vec::with_capacity(count);
        for _ in 0..count {
            inputs.push(Input::read(reader)?);
        }
        let count = reader.read_u16()? as usize;
        let mut outputs = Vec::with_capacity(count);
        for _ in 0..count {
            outputs.push(Output::read(reader)?);
        }
        let count = reader.read_u16()? as usize;
        let mut references = Vec::with_capacity(count);
        for _ in 0..count {
            references.push(Hash::read(reader)?);
        }
        let extra_len = reader.read_u32()? as usize;
        let extra = reader.read_bytes(extra_len)?;

        let mut signatures_map = None;
        let mut aggregated = None;
        match reader.read_u8()? {
            0 => {}
            1 => {
                let maps = reader.read_u16()? as usize;
                let mut all = Vec::with_capacity(maps);
                for _ in 0..maps {
                    let entries = reader.read_u16()? as usize;
                    let mut map = IndexMap::with_capacity(entries);
                    for _ in 0..entries {
                        let index = reader.read_u16()?;
                        map.insert(index, Signature::read(reader)?);
                    }
                    all.push(map);
                }
                signatures_map = Some(all);
            }
            2 => aggregated = Some(AggregatedSignature::read(reader)?),
            _ => return Err(ReaderError::InvalidValue),
        }

        Ok(Transaction {
            version,
            asset,
            inputs,
            outputs,
            references,
            extra,
            signatures_map,
            aggregated,
        })
    }
}
