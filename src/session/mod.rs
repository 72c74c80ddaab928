// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Session records and the wire shapes of the session negotiation.
//!
//! A session is settled the moment both peers hold the same ECDH shared
//! key: its topic is sha256(shared_key), its record carries both the
//! negotiated namespaces and the flattened account view, and every later
//! update mutates the record in place on both sides.

use serde::{Deserialize, Serialize};

use crate::crypto::{KeyPair, PublicKey, SymmetricKey};
use crate::pairing::PeerMetadata;
use crate::topics::Topic;

pub mod namespaces;

pub use namespaces::{validate_account, validate_accounts, Namespace, Namespaces};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub topic: Topic,
    /// The pairing this session was negotiated over. A back-reference only;
    /// deleting the session leaves the pairing alone.
    pub pairing_topic: Topic,
    pub self_key_pair: KeyPair,
    pub peer_public_key: PublicKey,
    pub shared_key: SymmetricKey,
    pub namespaces: Namespaces,
    /// Flattened account view, derived from `namespaces` at settlement and
    /// replaced wholesale by account updates.
    pub accounts: Vec<String>,
    pub expiry: u64,
    pub relay_protocol: String,
    /// True on the proposing side.
    pub controller: bool,
    pub peer_metadata: Option<PeerMetadata>,
    /// True once the settlement confirmation has crossed the session topic
    /// in this side's direction.
    pub acknowledged: bool,
    pub created_at: u64,
}

impl Session {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry <= now
    }
}

/// A proposal received over a pairing, parked until the application
/// approves or rejects it. Held in memory only: an unanswered proposal does
/// not survive a restart, and the proposer's timeout handles the rest.
#[derive(Debug, Clone)]
pub struct SessionProposal {
    /// Locally minted id the application passes back to approve or reject.
    /// Never the peer's JSON-RPC id: the peer picks that one, and two
    /// pairings can carry requests with identical ids.
    pub id: u64,
    /// JSON-RPC id of the `session_propose` request. The answer travels
    /// back under this id so the proposer can correlate it.
    pub request_id: u64,
    pub pairing_topic: Topic,
    pub proposer_public_key: PublicKey,
    pub required_namespaces: Namespaces,
    pub relay_protocol: String,
    pub proposer_metadata: Option<PeerMetadata>,
    pub received_at: u64,
}

/// Body of a `session_propose` request, sent over the pairing topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeParams {
    pub proposer_public_key: PublicKey,
    pub required_namespaces: Namespaces,
    pub relay_protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PeerMetadata>,
}

/// Result of an approved `session_propose`, carried back over the pairing
/// topic. The expiry is the responder's choice and binds both records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeResult {
    pub responder_public_key: PublicKey,
    pub namespaces: Namespaces,
    pub expiry: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PeerMetadata>,
}

/// Body of a `session_update_accounts` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAccountsParams {
    pub accounts: Vec<String>,
}

/// Body of a `session_update_namespaces` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNamespacesParams {
    pub namespaces: Namespaces,
}

/// Body of a `session_update_expiry` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateExpiryParams {
    pub expiry: u64,
}
