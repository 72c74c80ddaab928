// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Cryptographic core: keypairs and ECDH derivation, symmetric topic keys,
//! and the AEAD envelope format used for every relay payload.

pub mod envelope;
pub mod error;
pub mod keys;

pub use envelope::{open, seal, Envelope, NONCE_LEN, TAG_LEN};
pub use error::CryptoError;
pub use keys::{KeyPair, PublicKey, SymmetricKey, PUBLIC_KEY_LEN, SYM_KEY_LEN};
