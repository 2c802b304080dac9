//! Crypto primitives (C1): scalar/point operations on the ed25519-based
//! curve — key derivation, key-image generation, ring signatures.
//!
//! All operations fail closed: anything that cannot complete the curve math
//! returns an error rather than panicking, so the enclosing operation can be
//! aborted per the design.

use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use zeroize::Zeroize;

use crate::error::{ConstructionError, WalletError, WalletResult};

/// A 32-byte opaque identifier, byte-comparable and hex-serializable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

/// A 32-byte curve point (CryptoNote public key / transaction public key).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(pub [u8; 32]);

/// A 32-byte curve scalar (CryptoNote private key). Zeroized on drop.
#[derive(Clone, Copy, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey(pub [u8; 32]);

/// The key image: a 32-byte value uniquely determined by a one-time keypair.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyImage(pub [u8; 32]);

/// A 64-byte ring-signature share `(c, r)` for one ring member.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

macro_rules! hex_newtype {
    ($ty:ident, $len:expr) => {
        impl $ty {
            pub fn from_hex(s: &str) -> WalletResult<Self> {
                let bytes = hex::decode(s).map_err(|_| {
                    WalletError::Invariant(format!("{} is not valid hex", stringify!($ty)))
                })?;
                if bytes.len() != $len {
                    return Err(WalletError::Invariant(format!(
                        "{} must be {} bytes, got {}",
                        stringify!($ty),
                        $len,
                        bytes.len()
                    )));
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(&bytes);
                Ok($ty(out))
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn zero() -> Self {
                $ty([0u8; $len])
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self.to_hex())
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                $ty::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_newtype!(Hash, 32);
hex_newtype!(PublicKey, 32);
hex_newtype!(KeyImage, 32);
hex_newtype!(Signature, 64);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(<redacted>)")
    }
}

impl SecretKey {
    pub fn from_hex(s: &str) -> WalletResult<Self> {
        let bytes =
            hex::decode(s).map_err(|_| WalletError::Invariant("SecretKey is not valid hex".into()))?;
        if bytes.len() != 32 {
            return Err(WalletError::Invariant("SecretKey must be 32 bytes".into()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(SecretKey(out))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn scalar(&self) -> Scalar {
        Scalar::from_bytes_mod_order(self.0)
    }

    /// Generate a fresh random secret scalar.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        SecretKey(Scalar::from_bytes_mod_order(bytes).to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        let point = &self.scalar() * &ED25519_BASEPOINT_TABLE;
        PublicKey(point.compress().to_bytes())
    }
}

impl PublicKey {
    fn point(&self) -> WalletResult<EdwardsPoint> {
        CompressedEdwardsY(self.0)
            .decompress()
            .ok_or_else(|| WalletError::Invariant("public key is not a valid curve point".into()))
    }
}

/// Hash an arbitrary byte string to a scalar mod the group order (`H_s`).
fn hash_to_scalar(data: &[u8]) -> Scalar {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let digest: [u8; 32] = hasher.finalize().into();
    Scalar::from_bytes_mod_order(digest)
}

/// Hash-to-point (`H_p`), used by `generateKeyImage`. Uses the standard
/// hash-then-multiply-by-cofactor construction over Keccak-256.
fn hash_to_point(pubkey: &PublicKey) -> WalletResult<EdwardsPoint> {
    let mut hasher = Keccak256::new();
    hasher.update(b"hash-to-point");
    hasher.update(pubkey.0);
    let digest: [u8; 32] = hasher.finalize().into();
    // Repeatedly rehash until we land on a valid curve point, then clear
    // the cofactor so the result lies in the prime-order subgroup.
    let mut attempt = digest;
    for _ in 0..8 {
        if let Some(point) = CompressedEdwardsY(attempt).decompress() {
            return Ok(point.mul_by_cofactor());
        }
        let mut hasher = Keccak256::new();
        hasher.update(attempt);
        attempt = hasher.finalize().into();
    }
    Err(WalletError::Invariant(
        "failed to hash to a curve point after repeated attempts".into(),
    ))
}

/// `deriveSharedSecret(txPublicKey, privateViewKey) -> derivation`.
pub fn derive_shared_secret(tx_public_key: &PublicKey, private_view_key: &SecretKey) -> WalletResult<Hash> {
    let point = tx_public_key.point()?;
    let derivation = (point * private_view_key.scalar()).mul_by_cofactor();
    Ok(Hash(derivation.compress().to_bytes()))
}

fn derivation_scalar(derivation: &Hash, output_index: u64) -> Scalar {
    let mut data = Vec::with_capacity(32 + 10);
    data.extend_from_slice(&derivation.0);
    // varint-style encoding of the index is unnecessary for our purposes;
    // a fixed little-endian u64 keeps this deterministic and simple.
    data.extend_from_slice(&output_index.to_le_bytes());
    hash_to_scalar(&data)
}

/// `derivePublicKey(derivation, outputIndex, receiverPublicSpendKey) -> oneTimePub`.
pub fn derive_public_key(
    derivation: &Hash,
    output_index: u64,
    receiver_public_spend_key: &PublicKey,
) -> WalletResult<PublicKey> {
    let scalar = derivation_scalar(derivation, output_index);
    let base = receiver_public_spend_key.point()?;
    let point = base + &scalar * &ED25519_BASEPOINT_TABLE;
    Ok(PublicKey(point.compress().to_bytes()))
}

/// `deriveSecretKey(derivation, outputIndex, ownerPrivateSpendKey) -> oneTimeSec`.
pub fn derive_secret_key(
    derivation: &Hash,
    output_index: u64,
    owner_private_spend_key: &SecretKey,
) -> SecretKey {
    let scalar = derivation_scalar(derivation, output_index) + owner_private_spend_key.scalar();
    SecretKey(scalar.to_bytes())
}

/// `underivePublicKey(derivation, outputIndex, onChainKey) -> candidateSpendKey`.
///
/// Used during scanning: the returned key is compared against each of our
/// public spend keys by the caller.
pub fn underive_public_key(
    derivation: &Hash,
    output_index: u64,
    on_chain_key: &PublicKey,
) -> WalletResult<PublicKey> {
    let scalar = derivation_scalar(derivation, output_index);
    let on_chain_point = on_chain_key.point()?;
    let candidate = on_chain_point - &scalar * &ED25519_BASEPOINT_TABLE;
    Ok(PublicKey(candidate.compress().to_bytes()))
}

/// `generateKeyImage(oneTimePub, oneTimeSec) -> keyImage`.
pub fn generate_key_image(one_time_pub: &PublicKey, one_time_sec: &SecretKey) -> WalletResult<KeyImage> {
    let hp = hash_to_point(one_time_pub)?;
    let image = hp * one_time_sec.scalar();
    Ok(KeyImage(image.compress().to_bytes()))
}

/// `generateRingSignature(txPrefixHash, keyImage, ringPubKeys[], oneTimeSec,
/// realIndexInRing) -> signatures[]`.
///
/// One `(c, r)` pair per ring member; only `real_index` is computed with
/// the true secret, the rest are simulated. Tied together by a ring-wide
/// challenge so the sum of per-member challenges equals a hash of the
/// message and all per-member commitments.
pub fn generate_ring_signature<R: RngCore + CryptoRng>(
    tx_prefix_hash: &Hash,
    key_image: &KeyImage,
    ring_pub_keys: &[PublicKey],
    one_time_sec: &SecretKey,
    real_index: usize,
    rng: &mut R,
) -> WalletResult<Vec<Signature>> {
    if real_index >= ring_pub_keys.len() {
        return Err(WalletError::Invariant(
            "real index out of bounds for ring signature".into(),
        ));
    }

    let image_point = CompressedEdwardsY(key_image.0)
        .decompress()
        .ok_or(ConstructionError::FailedToCreateRingSignature)?;

    let n = ring_pub_keys.len();
    let mut c = vec![Scalar::ZERO; n];
    let mut r = vec![Scalar::ZERO; n];
    let mut l_points = vec![EdwardsPoint::default(); n];
    let mut r_points = vec![EdwardsPoint::default(); n];

    let real_nonce = Scalar::from_bytes_mod_order(random_scalar_bytes(rng));
    let real_hp = hash_to_point(&ring_pub_keys[real_index])?;
    l_points[real_index] = &real_nonce * &ED25519_BASEPOINT_TABLE;
    r_points[real_index] = real_hp * real_nonce;

    for (i, pubkey) in ring_pub_keys.iter().enumerate() {
        if i == real_index {
            continue;
        }
        let point = pubkey.point()?;
        let hp = hash_to_point(pubkey)?;
        r[i] = Scalar::from_bytes_mod_order(random_scalar_bytes(rng));
        c[i] = Scalar::from_bytes_mod_order(random_scalar_bytes(rng));
        l_points[i] = &r[i] * &ED25519_BASEPOINT_TABLE + c[i] * point;
        r_points[i] = r[i] * hp + c[i] * image_point;
    }

    let mut challenge_data = Vec::new();
    challenge_data.extend_from_slice(&tx_prefix_hash.0);
    for i in 0..n {
        challenge_data.extend_from_slice(&l_points[i].compress().to_bytes());
        challenge_data.extend_from_slice(&r_points[i].compress().to_bytes());
    }
    let ring_challenge = hash_to_scalar(&challenge_data);

    let sum_others: Scalar = (0..n)
        .filter(|&i| i != real_index)
        .map(|i| c[i])
        .fold(Scalar::ZERO, |acc, x| acc + x);
    c[real_index] = ring_challenge - sum_others;
    r[real_index] = real_nonce - c[real_index] * one_time_sec.scalar();

    let mut signatures = Vec::with_capacity(n);
    for i in 0..n {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&c[i].to_bytes());
        bytes[32..].copy_from_slice(&r[i].to_bytes());
        signatures.push(Signature(bytes));
    }
    Ok(signatures)
}

fn random_scalar_bytes<R: RngCore + CryptoRng>(rng: &mut R) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// `checkRingSignature(...) -> bool`. Recomputes the commitment chain and
/// compares the final ring challenge.
pub fn check_ring_signature(
    tx_prefix_hash: &Hash,
    key_image: &KeyImage,
    ring_pub_keys: &[PublicKey],
    signatures: &[Signature],
) -> WalletResult<bool> {
    if ring_pub_keys.len() != signatures.len() {
        return Ok(false);
    }
    let image_point = match CompressedEdwardsY(key_image.0).decompress() {
        Some(p) => p,
        None => return Ok(false),
    };

    let n = ring_pub_keys.len();
    let mut c = Vec::with_capacity(n);
    let mut r = Vec::with_capacity(n);
    for sig in signatures {
        let mut c_bytes = [0u8; 32];
        let mut r_bytes = [0u8; 32];
        c_bytes.copy_from_slice(&sig.0[..32]);
        r_bytes.copy_from_slice(&sig.0[32..]);
        c.push(Scalar::from_bytes_mod_order(c_bytes));
        r.push(Scalar::from_bytes_mod_order(r_bytes));
    }

    let mut challenge_data = Vec::new();
    challenge_data.extend_from_slice(&tx_prefix_hash.0);

    let mut l_points = Vec::with_capacity(n);
    let mut r_points = Vec::with_capacity(n);
    for i in 0..n {
        let point = match ring_pub_keys[i].point() {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };
        let hp = hash_to_point(&ring_pub_keys[i])?;
        let l = &r[i] * &ED25519_BASEPOINT_TABLE + c[i] * point;
        let rr = r[i] * hp + c[i] * image_point;
        l_points.push(l);
        r_points.push(rr);
    }
    for i in 0..n {
        challenge_data.extend_from_slice(&l_points[i].compress().to_bytes());
        challenge_data.extend_from_slice(&r_points[i].compress().to_bytes());
    }
    let ring_challenge = hash_to_scalar(&challenge_data);

    let sum_c: Scalar = c.iter().fold(Scalar::ZERO, |acc, x| acc + x);
    Ok(sum_c == ring_challenge)
}
