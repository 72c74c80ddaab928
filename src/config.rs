// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Engine configuration. Defaults match the protocol's standing TTLs; most
//! embedders only ever override `metadata` and the storage location.

use std::env;
use std::time::Duration;

use crate::pairing::PeerMetadata;
use crate::relay::DEFAULT_RELAY_PROTOCOL;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Deadline for an ordinary request/response round-trip.
    pub request_timeout: Duration,
    /// Deadline for a session proposal: a human is usually in this loop.
    pub proposal_timeout: Duration,
    /// Lifetime of a pairing that has not completed its handshake. Also
    /// bounds how long a generated URI stays redeemable.
    pub pairing_pending_ttl: Duration,
    /// Lifetime of an activated pairing.
    pub pairing_ttl: Duration,
    /// Lifetime of a settled session.
    pub session_ttl: Duration,
    /// Cadence of the expiry sweep.
    pub sweep_interval: Duration,
    /// How long the relay should hold published payloads for offline peers.
    pub publish_ttl: Duration,
    /// Relay protocol identifier advertised in pairing URIs.
    pub relay_protocol: String,
    /// Optional relay endpoint override carried in pairing URIs.
    pub relay_endpoint: Option<String>,
    /// Identity advertised to peers during session negotiation.
    pub metadata: Option<PeerMetadata>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            proposal_timeout: Duration::from_secs(5 * 60),
            pairing_pending_ttl: Duration::from_secs(5 * 60),
            pairing_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            session_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            publish_ttl: Duration::from_secs(5 * 60),
            relay_protocol: DEFAULT_RELAY_PROTOCOL.to_string(),
            relay_endpoint: None,
            metadata: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            request_timeout: Duration::from_secs(
                env::var("PAIRLINK_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            proposal_timeout: Duration::from_secs(
                env::var("PAIRLINK_PROPOSAL_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            pairing_pending_ttl: Duration::from_secs(5 * 60),
            pairing_ttl: Duration::from_secs(
                env::var("PAIRLINK_PAIRING_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30 * 24 * 60 * 60),
            ),
            session_ttl: Duration::from_secs(
                env::var("PAIRLINK_SESSION_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(7 * 24 * 60 * 60),
            ),
            sweep_interval: Duration::from_secs(
                env::var("PAIRLINK_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
            publish_ttl: Duration::from_secs(5 * 60),
            relay_protocol: env::var("PAIRLINK_RELAY_PROTOCOL")
                .unwrap_or_else(|_| DEFAULT_RELAY_PROTOCOL.to_string()),
            relay_endpoint: env::var("PAIRLINK_RELAY_ENDPOINT").ok(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: PeerMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
