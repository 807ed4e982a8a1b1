use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use curve25519_dalek::{
    constants::ED25519_BASEPOINT_TABLE,
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
    traits::{Identity, IsIdentity, VartimeMultiscalarMul},
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize, Serializer as SerdeSerializer};
use sha3::{Digest, Sha3_512};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::hash::{hash, Hash};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};

pub const KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key: not a curve point")]
    InvalidKey,
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Signature verification failed")]
    VerificationFailed,
    #[error("Invalid signer index {0} for {1} keys")]
    InvalidSignerIndex(usize, usize),
    #[error("Invalid hex string: {0}")]
    HexError(String),
}

/// Compressed Edwards point used as a public key or ghost key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    pub const fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Key(bytes)
    }

    pub const fn zero() -> Self {
        Key([0; KEY_SIZE])
    }

    pub fn has_value(&self) -> bool {
        *self != Key::zero()
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Curve membership check: the key must decompress to a point outside
    /// the small-order subgroup.
    pub fn check_key(&self) -> bool {
        match self.decompress() {
            Some(p) => !p.is_small_order(),
            None => false,
        }
    }

    pub fn hash(&self) -> Hash {
        hash(&self.0)
    }

    fn decompress(&self) -> Option<EdwardsPoint> {
        CompressedEdwardsY(self.0).decompress()
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Key {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::HexError(e.to_string()))?;
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::HexError(s.to_string()))?;
        Ok(Key(bytes))
    }
}

impl Serializer for Key {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Key(reader.read_array_32()?))
    }

    fn size(&self) -> usize {
        KEY_SIZE
    }
}

impl Serialize for Key {
    fn serialize<S: SerdeSerializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Secret scalar, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; KEY_SIZE]);

impl PrivateKey {
    pub fn generate() -> Self {
        let mut seed = [0u8; 64];
        OsRng.fill_bytes(&mut seed);
        PrivateKey(Scalar::from_bytes_mod_order_wide(&seed).to_bytes())
    }

    /// Deterministic derivation of a secret from arbitrary bytes. Used to
    /// derive a view key from a spend key when only the spend half is known.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut hasher = Sha3_512::new();
        hasher.update(seed);
        let wide: [u8; 64] = hasher.finalize().into();
        PrivateKey(Scalar::from_bytes_mod_order_wide(&wide).to_bytes())
    }

    fn scalar(&self) -> Scalar {
        Scalar::from_bytes_mod_order(self.0)
    }

    pub fn public(&self) -> Key {
        Key((&self.scalar() * ED25519_BASEPOINT_TABLE).compress().0)
    }

    /// Schnorr signature over the payload hash: R = r·B, s = r + k·a where
    /// k = H(R ‖ A ‖ M). The nonce is derived deterministically.
    pub fn sign(&self, message: &Hash) -> Signature {
        let a = self.scalar();
        let mut nonce = Sha3_512::new();
        nonce.update(self.0);
        nonce.update(message.as_bytes());
        let r = Scalar::from_bytes_mod_order_wide(&nonce.finalize().into());
        let big_r = (&r * ED25519_BASEPOINT_TABLE).compress();
        let public = self.public();
        let k = challenge(&big_r.0, &public, message);
        let s = r + k * a;
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes[..32].copy_from_slice(&big_r.0);
        bytes[32..].copy_from_slice(&s.to_bytes());
        Signature(bytes)
    }
}

pub struct KeyPair {
    pub private: PrivateKey,
    pub public: Key,
}

impl KeyPair {
    pub fn generate() -> Self {
        let private = PrivateKey::generate();
        let public = private.public();
        KeyPair { private, public }
    }
}

/// 64-byte Schnorr signature (R ‖ s).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    pub const fn new(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    fn parts(&self) -> Result<(EdwardsPoint, Scalar), CryptoError> {
        let r = CompressedEdwardsY(self.0[..32].try_into().unwrap())
            .decompress()
            .ok_or(CryptoError::InvalidSignature)?;
        let s: Option<Scalar> =
            Scalar::from_canonical_bytes(self.0[32..].try_into().unwrap()).into();
        Ok((r, s.ok_or(CryptoError::InvalidSignature)?))
    }

    pub fn verify(&self, key: &Key, message: &Hash) -> Result<(), CryptoError> {
        let a = CompressedEdwardsY(*key.as_bytes())
            .decompress()
            .ok_or(CryptoError::InvalidKey)?;
        let (big_r, s) = self.parts()?;
        let k = challenge(&self.0[..32].try_into().unwrap(), key, message);
        let lhs = &s * ED25519_BASEPOINT_TABLE;
        if lhs == big_r + k * a {
            Ok(())
        } else {
            Err(CryptoError::VerificationFailed)
        }
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serializer for Signature {
    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes(SIGNATURE_SIZE)?;
        Ok(Signature(bytes.try_into().unwrap()))
    }

    fn size(&self) -> usize {
        SIGNATURE_SIZE
    }
}

fn challenge(big_r: &[u8; 32], key: &Key, message: &Hash) -> Scalar {
    let mut hasher = Sha3_512::new();
    hasher.update(big_r);
    hasher.update(key.as_bytes());
    hasher.update(message.as_bytes());
    Scalar::from_bytes_mod_order_wide(&hasher.finalize().into())
}

/// All-or-nothing verification of parallel key/signature slices against one
/// payload hash, folded into a single multiscalar equation with random
/// weights.
pub fn batch_verify(message: &Hash, keys: &[&Key], signatures: &[&Signature]) -> bool {
    if keys.is_empty() || keys.len() != signatures.len() {
        return false;
    }

    let mut b_coefficient = Scalar::ZERO;
    let mut scalars = Vec::with_capacity(keys.len() * 2);
    let mut points = Vec::with_capacity(keys.len() * 2);
    let mut rng = OsRng;
    for (key, sig) in keys.iter().zip(signatures.iter()) {
        let a = match CompressedEdwardsY(*key.as_bytes()).decompress() {
            Some(p) => p,
            None => return false,
        };
        let (big_r, s) = match sig.parts() {
            Ok(parts) => parts,
            Err(_) => return false,
        };
        let k = challenge(&sig.0[..32].try_into().unwrap(), key, message);
        let mut z_bytes = [0u8; 64];
        rng.fill_bytes(&mut z_bytes);
        let z = Scalar::from_bytes_mod_order_wide(&z_bytes);

        // z·s·B − z·R − z·k·A accumulated for every pair
        b_coefficient += z * s;
        scalars.push(-z);
        points.push(big_r);
        scalars.push(-(z * k));
        points.push(a);
    }
    scalars.push(b_coefficient);
    points.push(curve25519_dalek::constants::ED25519_BASEPOINT_POINT);

    EdwardsPoint::vartime_multiscalar_mul(scalars, points).is_identity()
}

/// Cosi-style aggregated verification: the signer indices select keys out of
/// the full ordered key set, the selected keys are summed, and the single
/// aggregate signature is checked against the sum.
pub fn aggregate_verify(
    signature: &Signature,
    all_keys: &[&Key],
    signers: &[usize],
    message: &Hash,
) -> Result<(), CryptoError> {
    if signers.is_empty() {
        return Err(CryptoError::VerificationFailed);
    }
    let mut aggregated = EdwardsPoint::identity();
    for &m in signers {
        let key = all_keys
            .get(m)
            .ok_or(CryptoError::InvalidSignerIndex(m, all_keys.len()))?;
        let point = CompressedEdwardsY(*key.as_bytes())
            .decompress()
            .ok_or(CryptoError::InvalidKey)?;
        aggregated += point;
    }
    let aggregated_key = Key(aggregated.compress().0);
    let (big_r, s) = signature.parts()?;
    let k = challenge(
        &signature.0[..32].try_into().unwrap(),
        &aggregated_key,
        message,
    );
    if &s * ED25519_BASEPOINT_TABLE == big_r + k * aggregated {
        Ok(())
    } else {
        Err(CryptoError::VerificationFailed)
    }
}

/// Derive the one-time ghost public key hiding a payee output:
/// H(r·V ‖ index)·B + S for the payee's view key V and spend key S.
pub fn derive_ghost_public_key(
    r: &PrivateKey,
    view: &Key,
    spend: &Key,
    output_index: u64,
) -> Result<Key, CryptoError> {
    let view_point = CompressedEdwardsY(*view.as_bytes())
        .decompress()
        .ok_or(CryptoError::InvalidKey)?;
    let spend_point = CompressedEdwardsY(*spend.as_bytes())
        .decompress()
        .ok_or(CryptoError::InvalidKey)?;
    let shared = (r.scalar() * view_point).compress();
    let mut hasher = Sha3_512::new();
    hasher.update(shared.0);
    hasher.update(output_index.to_be_bytes());
    let h = Scalar::from_bytes_mod_order_wide(&hasher.finalize().into());
    let ghost = &h * ED25519_BASEPOINT_TABLE + spend_point;
    Ok(Key(ghost.compress().0))
}

/// Local aggregate signing over the same equation `aggregate_verify` checks.
/// The distributed aggregation protocol lives outside the kernel; this is
/// the single-process form used by tests and tools.
pub fn aggregate_sign(privates: &[&PrivateKey], message: &Hash) -> Signature {
    let mut r_sum = Scalar::ZERO;
    let mut a_sum = Scalar::ZERO;
    for private in privates {
        let mut nonce = Sha3_512::new();
        nonce.update(private.0);
        nonce.update(message.as_bytes());
        r_sum += Scalar::from_bytes_mod_order_wide(&nonce.finalize().into());
        a_sum += private.scalar();
    }
    let big_r = (&r_sum * ED25519_BASEPOINT_TABLE).compress();
    let aggregated_key = Key((&a_sum * ED25519_BASEPOINT_TABLE).compress().0);
    let k = challenge(&big_r.0, &aggregated_key, message);
    let s = r_sum + k * a_sum;
    let mut bytes = [0u8; SIGNATURE_SIZE];
    bytes[..32].copy_from_slice(&big_r.0);
    bytes[32..].copy_from_slice(&s.to_bytes());
    Signature(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let pair = KeyPair::generate();
        let message = hash(b"payload");
        let sig = pair.private.sign(&message);
        assert!(sig.verify(&pair.public, &message).is_ok());
        assert!(sig.verify(&pair.public, &hash(b"other")).is_err());
        let other = KeyPair::generate();
        assert!(sig.verify(&other.public, &message).is_err());
    }

    #[test]
    fn test_check_key() {
        let pair = KeyPair::generate();
        assert!(pair.public.check_key());
        // identity point is small order
        let identity = Key(CompressedEdwardsY(EdwardsPoint::identity().compress().0).0);
        assert!(!identity.check_key());
        assert!(!Key([0xff; 32]).check_key());
    }

    #[test]
    fn test_batch_verify() {
        let message = hash(b"batch");
        let pairs: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
        let sigs: Vec<Signature> = pairs.iter().map(|p| p.private.sign(&message)).collect();
        let keys: Vec<&Key> = pairs.iter().map(|p| &p.public).collect();
        let sig_refs: Vec<&Signature> = sigs.iter().collect();
        assert!(batch_verify(&message, &keys, &sig_refs));

        // one corrupted signature fails the whole batch
        let bad = pairs[0].private.sign(&hash(b"tampered"));
        let mut bad_refs = sig_refs.clone();
        bad_refs[2] = &bad;
        assert!(!batch_verify(&message, &keys, &bad_refs));
        assert!(!batch_verify(&message, &[], &[]));
    }

    #[test]
    fn test_aggregate_sign_verify() {
        let message = hash(b"aggregate");
        let pairs: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let keys: Vec<&Key> = pairs.iter().map(|p| &p.public).collect();

        let all = aggregate_sign(
            &pairs.iter().map(|p| &p.private).collect::<Vec<_>>(),
            &message,
        );
        assert!(aggregate_verify(&all, &keys, &[0, 1, 2], &message).is_ok());
        // wrong subset does not verify
        assert!(aggregate_verify(&all, &keys, &[0, 1], &message).is_err());
        // out of range signer index is rejected
        assert_eq!(
            aggregate_verify(&all, &keys, &[5], &message),
            Err(CryptoError::InvalidSignerIndex(5, 3))
        );
    }

    #[test]
    fn test_deterministic_seed_derivation() {
        let a = PrivateKey::from_seed(b"spend-key-bytes");
        let b = PrivateKey::from_seed(b"spend-key-bytes");
        assert_eq!(a.public(), b.public());
    }
}
