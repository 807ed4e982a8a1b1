mod address;
mod hash;
mod key;

pub use address::{Address, AddressError, ADDRESS_PREFIX};
pub use hash::{hash, Hash, HASH_SIZE};
pub use key::{
    aggregate_sign, aggregate_verify, batch_verify, derive_ghost_public_key, CryptoError, Key,
    KeyPair, PrivateKey, Signature, KEY_SIZE, SIGNATURE_SIZE,
};
