// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Key material: secp256k1 keypairs, 256-bit symmetric keys, and the ECDH
//! shared-secret derivation both peers run during session settlement.
//!
//! The raw ECDH secret is never used directly; it is expanded through
//! HKDF-SHA256 into the 32-byte symmetric key that seals envelopes. Both
//! derivation directions (A's private with B's public, B's private with A's
//! public) land on the same curve point and therefore the same key, which is
//! what makes the settlement handshake work.
//!
//! Secret halves zeroize themselves on drop and redact themselves from Debug
//! output; they must never appear in logs or persisted diagnostics.

use k256::{
    ecdh::diffie_hellman,
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    EncodedPoint, SecretKey,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroize;

use super::error::CryptoError;

pub const SYM_KEY_LEN: usize = 32;
pub const PUBLIC_KEY_LEN: usize = 33;

/// 256-bit symmetric key shared by the two peers of a pairing or session.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; SYM_KEY_LEN]);

impl SymmetricKey {
    /// Generate a fresh random key (pairing creation).
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYM_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SYM_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SYM_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey {
            key_type: "symmetric_key".to_string(),
            reason: format!("hex decode error: {}", e),
        })?;
        let arr: [u8; SYM_KEY_LEN] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKey {
                key_type: "symmetric_key".to_string(),
                reason: format!("expected {} bytes", SYM_KEY_LEN),
            })?;
        Ok(Self(arr))
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

impl Serialize for SymmetricKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SymmetricKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SymmetricKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Compressed SEC1 secp256k1 public key (33 bytes). Safe to transmit and log.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey {
            key_type: "public_key".to_string(),
            reason: format!("hex decode error: {}", e),
        })?;
        let arr: [u8; PUBLIC_KEY_LEN] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKey {
                key_type: "public_key".to_string(),
                reason: format!("expected {} bytes compressed SEC1", PUBLIC_KEY_LEN),
            })?;
        // Reject byte strings that are not a point on the curve up front so
        // records never hold an unusable peer key.
        let point =
            EncodedPoint::from_bytes(arr).map_err(|e| CryptoError::InvalidKey {
                key_type: "public_key".to_string(),
                reason: format!("invalid SEC1 encoding: {}", e),
            })?;
        let parsed = k256::PublicKey::from_encoded_point(&point);
        if bool::from(parsed.is_none()) {
            return Err(CryptoError::InvalidKey {
                key_type: "public_key".to_string(),
                reason: "not a valid curve point".to_string(),
            });
        }
        Ok(Self(arr))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// secp256k1 keypair. The secret half never leaves the process that
/// generated it.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    public_key: PublicKey,
    secret: SecretBytes,
}

#[derive(Clone, PartialEq, Eq)]
struct SecretBytes([u8; SYM_KEY_LEN]);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl KeyPair {
    /// Generate a fresh keypair for a session handshake.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let point = secret.public_key().to_encoded_point(true);
        let mut public = [0u8; PUBLIC_KEY_LEN];
        public.copy_from_slice(point.as_bytes());
        let mut secret_bytes = [0u8; SYM_KEY_LEN];
        secret_bytes.copy_from_slice(secret.to_bytes().as_slice());
        Self {
            public_key: PublicKey(public),
            secret: SecretBytes(secret_bytes),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Run ECDH against the peer's public key and expand the raw shared
    /// secret through HKDF-SHA256 into a session symmetric key.
    pub fn derive_shared_key(&self, peer: &PublicKey) -> Result<SymmetricKey, CryptoError> {
        let secret = SecretKey::from_slice(&self.secret.0).map_err(|e| {
            CryptoError::InvalidKey {
                key_type: "private_key".to_string(),
                reason: e.to_string(),
            }
        })?;

        let point = EncodedPoint::from_bytes(peer.as_bytes()).map_err(|e| {
            CryptoError::InvalidKey {
                key_type: "peer_public_key".to_string(),
                reason: format!("invalid SEC1 encoding: {}", e),
            }
        })?;
        let peer_key = Option::<k256::PublicKey>::from(k256::PublicKey::from_encoded_point(&point))
            .ok_or_else(|| CryptoError::InvalidKey {
                key_type: "peer_public_key".to_string(),
                reason: "not a valid curve point".to_string(),
            })?;

        let shared = diffie_hellman(secret.to_nonzero_scalar(), peer_key.as_affine());

        let hkdf = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes().as_slice());
        let mut derived = [0u8; SYM_KEY_LEN];
        hkdf.expand(&[], &mut derived)
            .map_err(|e| CryptoError::KeyDerivationFailed {
                operation: "hkdf_expand".to_string(),
                reason: e.to_string(),
            })?;

        Ok(SymmetricKey(derived))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({}, <redacted>)", self.public_key.to_hex())
    }
}

impl Serialize for KeyPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut st = serializer.serialize_struct("KeyPair", 2)?;
        st.serialize_field("public_key", &self.public_key)?;
        st.serialize_field("secret", &hex::encode(self.secret.0))?;
        st.end()
    }
}

impl<'de> Deserialize<'de> for KeyPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            public_key: PublicKey,
            secret: String,
        }
        let raw = Raw::deserialize(deserializer)?;
        let bytes = hex::decode(&raw.secret).map_err(serde::de::Error::custom)?;
        let arr: [u8; SYM_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("secret must be 32 bytes"))?;
        Ok(KeyPair {
            public_key: raw.public_key,
            secret: SecretBytes(arr),
        })
    }
}
