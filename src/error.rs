// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Crate-wide error taxonomy.
//!
//! Lookup failures carry the exact topic so callers can surface actionable
//! messages; the three NotFound variants are distinguished because ping and
//! disconnect operate across both record kinds while approve/update target
//! exactly one.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::relay::RelayError;
use crate::storage::StorageError;
use crate::topics::Topic;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No pairing record with the given topic.
    #[error("No matching pairing with topic: {0}")]
    PairingNotFound(Topic),

    /// No session record with the given topic.
    #[error("No matching session with topic: {0}")]
    SessionNotFound(Topic),

    /// Neither a pairing nor a session with the given topic. Raised by the
    /// operations that search both tables (ping, disconnect) and by inbound
    /// dispatch for unknown topics.
    #[error("No matching pairing or session with topic: {0}")]
    TopicNotFound(Topic),

    /// No pending session proposal with the given request id.
    #[error("No matching session proposal with id: {0}")]
    ProposalNotFound(u64),

    /// The peer did not answer before the configured deadline.
    #[error("request timed out after {seconds}s waiting for {method} response on topic {topic}")]
    RequestTimeout {
        topic: Topic,
        method: String,
        seconds: u64,
    },

    /// Pairing URI failed to parse or carried unsupported fields.
    #[error("invalid pairing uri: {reason}")]
    InvalidUri { reason: String },

    /// Proposed or updated namespaces failed structural validation.
    #[error("invalid namespaces: {reason}")]
    InvalidNamespaces { reason: String },

    /// A locally supplied argument was rejected before any network work.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The peer answered with a JSON-RPC error object.
    #[error("peer rejected {method}: {message} (code {code})")]
    PeerRejected {
        method: String,
        code: i64,
        message: String,
    },

    /// A freshly derived topic already exists in local state. Settlement
    /// must abort rather than overwrite the existing record.
    #[error("topic collision: {0} already exists")]
    TopicCollision(Topic),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for every "the record you named does not exist" failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::PairingNotFound(_)
                | Error::SessionNotFound(_)
                | Error::TopicNotFound(_)
                | Error::ProposalNotFound(_)
        )
    }

    /// True for failures of locally supplied input, raised before any state
    /// change or network traffic.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidUri { .. }
                | Error::InvalidNamespaces { .. }
                | Error::InvalidRequest { .. }
        )
    }
}
