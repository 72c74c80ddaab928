// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Pairing records: the long-lived, symmetric-key channel two peers
//! bootstrap out-of-band and then use to negotiate sessions.
//!
//! Lifecycle: created Pending with a short expiry (the URI is only worth
//! minutes), flipped Active with a long expiry once the approve handshake
//! acknowledges, extended every time a session settles on it, and deleted
//! on disconnect, peer delete, or expiry sweep.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::crypto::SymmetricKey;
use crate::time::now_secs;
use crate::topics::Topic;

pub mod uri;

pub use uri::{PairingUri, PROTOCOL_VERSION, URI_SCHEME};

/// Application identity a peer advertises about itself. Populated on a
/// pairing after the first session settles over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pairing {
    pub topic: Topic,
    pub sym_key: SymmetricKey,
    pub relay_protocol: String,
    pub relay_endpoint: Option<String>,
    /// Absolute unix seconds after which the record is dead.
    pub expiry: u64,
    /// False until the approve handshake acknowledges.
    pub active: bool,
    pub peer_metadata: Option<PeerMetadata>,
    pub created_at: u64,
}

impl Pairing {
    pub fn new(
        topic: Topic,
        sym_key: SymmetricKey,
        relay_protocol: impl Into<String>,
        relay_endpoint: Option<String>,
        pending_ttl: Duration,
    ) -> Self {
        let now = now_secs();
        Self {
            topic,
            sym_key,
            relay_protocol: relay_protocol.into(),
            relay_endpoint,
            expiry: now + pending_ttl.as_secs(),
            active: false,
            peer_metadata: None,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry <= now
    }

    /// Handshake acknowledged: the channel is proven live on both ends, so
    /// the record graduates from URI-lifetime to its full TTL.
    pub fn activate(&mut self, ttl: Duration) {
        self.active = true;
        self.expiry = now_secs() + ttl.as_secs();
    }

    /// A settled session vouches for the pairing; push the expiry out, but
    /// never pull it in.
    pub fn extend_expiry(&mut self, ttl: Duration) {
        self.expiry = self.expiry.max(now_secs() + ttl.as_secs());
    }
}
