use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize, Serializer as SerdeSerializer};
use thiserror::Error;

use super::{
    hash::{hash, Hash},
    key::{Key, PrivateKey, KEY_SIZE},
};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

pub const ADDRESS_PREFIX: &str = "VLA";

const CHECKSUM_SIZE: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address prefix: {0}")]
    InvalidPrefix(String),
    #[error("Invalid address encoding: {0}")]
    InvalidEncoding(String),
    #[error("Invalid address checksum")]
    InvalidChecksum,
}

/// Public half of a node or wallet identity: a spend key and a view key.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Address {
    pub public_spend_key: Key,
    pub public_view_key: Key,
}

impl Address {
    pub fn new(public_spend_key: Key, public_view_key: Key) -> Self {
        Address {
            public_spend_key,
            public_view_key,
        }
    }

    /// Rebuild an address from a spend key alone, deriving the view key
    /// deterministically. Node transactions carry only spend keys in their
    /// extra field.
    pub fn from_spend_key(public_spend_key: Key) -> Self {
        let view = PrivateKey::from_seed(public_spend_key.as_bytes()).public();
        Address {
            public_spend_key,
            public_view_key: view,
        }
    }

    pub fn hash(&self) -> Hash {
        let mut buf = [0u8; KEY_SIZE * 2];
        buf[..KEY_SIZE].copy_from_slice(self.public_spend_key.as_bytes());
        buf[KEY_SIZE..].copy_from_slice(self.public_view_key.as_bytes());
        hash(&buf)
    }

    fn checksum(&self) -> [u8; CHECKSUM_SIZE] {
        let mut buf = Vec::with_capacity(ADDRESS_PREFIX.len() + KEY_SIZE * 2);
        buf.extend_from_slice(ADDRESS_PREFIX.as_bytes());
        buf.extend_from_slice(self.public_spend_key.as_bytes());
        buf.extend_from_slice(self.public_view_key.as_bytes());
        let digest = hash(&buf);
        digest.as_bytes()[..CHECKSUM_SIZE].try_into().unwrap()
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            ADDRESS_PREFIX,
            self.public_spend_key.to_hex(),
            self.public_view_key.to_hex(),
            hex::encode(self.checksum())
        )
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or_else(|| AddressError::InvalidPrefix(s.to_string()))?;
        let bytes = hex::decode(body).map_err(|_| AddressError::InvalidEncoding(s.to_string()))?;
        if bytes.len() != KEY_SIZE * 2 + CHECKSUM_SIZE {
            return Err(AddressError::InvalidEncoding(s.to_string()));
        }
        let address = Address {
            public_spend_key: Key::new(bytes[..KEY_SIZE].try_into().unwrap()),
            public_view_key: Key::new(bytes[KEY_SIZE..KEY_SIZE * 2].try_into().unwrap()),
        };
        if address.checksum() != bytes[KEY_SIZE * 2..] {
            return Err(AddressError::InvalidChecksum);
        }
        Ok(address)
    }
}

impl Serializer for Address {
    fn write(&self, writer: &mut Writer) {
        self.public_spend_key.write(writer);
        self.public_view_key.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Address {
            public_spend_key: Key::read(reader)?,
            public_view_key: Key::read(reader)?,
        })
    }

    fn size(&self) -> usize {
        KEY_SIZE * 2
    }
}

impl Serialize for Address {
    fn serialize<S: SerdeSerializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
