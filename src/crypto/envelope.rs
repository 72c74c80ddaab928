// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Authenticated envelopes: every payload that crosses the relay is sealed
//! with XChaCha20-Poly1305 under the topic's symmetric key.
//!
//! Wire form is base64(nonce || ciphertext) with a fresh random 24-byte
//! nonce per seal. The extended nonce makes random generation safe without
//! any counter state, which matters because both peers seal under the same
//! key concurrently.
//!
//! Opening is fail-closed: any tampering, truncation, or wrong-key attempt
//! surfaces as [`CryptoError::DecryptionFailed`] with no partial plaintext.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce,
};
use std::fmt;

use super::error::CryptoError;
use super::keys::SymmetricKey;

/// XChaCha20 extended nonce length.
pub const NONCE_LEN: usize = 24;
/// Poly1305 authentication tag length.
pub const TAG_LEN: usize = 16;

/// A sealed payload: random nonce plus ciphertext (tag appended by the AEAD).
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// Encode for relay transport as base64(nonce || ciphertext).
    pub fn to_base64(&self) -> String {
        let mut combined = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        combined.extend_from_slice(&self.nonce);
        combined.extend_from_slice(&self.ciphertext);
        BASE64.encode(combined)
    }

    /// Decode a relay payload. Length and base64 structure are checked here;
    /// authenticity is only established by [`open`].
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let combined = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::MalformedEnvelope {
                reason: format!("base64 decode error: {}", e),
            })?;
        if combined.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedEnvelope {
                reason: format!(
                    "envelope too short: {} bytes, need at least {}",
                    combined.len(),
                    NONCE_LEN + TAG_LEN
                ),
            });
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&combined[..NONCE_LEN]);
        Ok(Self {
            nonce,
            ciphertext: combined[NONCE_LEN..].to_vec(),
        })
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Envelope({} ciphertext bytes)", self.ciphertext.len())
    }
}

/// Seal plaintext under a topic key with a fresh random nonce.
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext =
        cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed {
                operation: "envelope_seal".to_string(),
            })?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(nonce.as_slice());
    Ok(Envelope {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Open an envelope under a topic key. Returns the plaintext only if the
/// authentication tag verifies against the full ciphertext.
pub fn open(key: &SymmetricKey, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = XNonce::from_slice(&envelope.nonce);

    cipher
        .decrypt(nonce, envelope.ciphertext.as_ref())
        .map_err(|_| CryptoError::DecryptionFailed {
            operation: "envelope_open".to_string(),
        })
}
