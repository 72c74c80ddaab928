// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Typed errors for the cryptographic boundary.
//!
//! Decryption failures never reveal partial plaintext and never carry key
//! material; the variants hold only sizes and operation names.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD seal failed. Only possible on pathological plaintext sizes.
    #[error("encryption failed during {operation}")]
    EncryptionFailed { operation: String },

    /// AEAD open failed: authentication tag mismatch, truncated envelope, or
    /// ciphertext tampering. Callers must treat the envelope as noise.
    #[error("decryption failed during {operation}: authentication error")]
    DecryptionFailed { operation: String },

    /// A key failed to parse (wrong length or an invalid curve point).
    #[error("invalid {key_type}: {reason}")]
    InvalidKey { key_type: String, reason: String },

    /// Envelope bytes failed structural validation before any AEAD work.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// ECDH or HKDF expansion failed.
    #[error("key derivation failed during {operation}: {reason}")]
    KeyDerivationFailed { operation: String, reason: String },
}

impl CryptoError {
    pub fn error_code(&self) -> &'static str {
        match self {
            CryptoError::EncryptionFailed { .. } => "ENCRYPTION_FAILED",
            CryptoError::DecryptionFailed { .. } => "DECRYPTION_FAILED",
            CryptoError::InvalidKey { .. } => "INVALID_KEY",
            CryptoError::MalformedEnvelope { .. } => "MALFORMED_ENVELOPE",
            CryptoError::KeyDerivationFailed { .. } => "KEY_DERIVATION_FAILED",
        }
    }
}
