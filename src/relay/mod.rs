// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Relay boundary: the untrusted store-and-forward publish/subscribe bus
//! that carries sealed envelopes between peers.
//!
//! The engine assumes at-least-once delivery, possible reordering across
//! topics, and zero trust in the relay operator. Everything published here
//! is ciphertext; the relay learns only topics and timing.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::topics::Topic;

pub mod memory;
pub mod subscriptions;

pub use memory::{MemoryHub, MemoryRelay};
pub use subscriptions::SubscriptionManager;

/// Default relay protocol identifier advertised in pairing URIs.
pub const DEFAULT_RELAY_PROTOCOL: &str = "sfr1";

/// Default time-to-live the relay keeps an undelivered payload.
pub const DEFAULT_PUBLISH_TTL: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("relay publish failed on topic {topic}: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("relay subscribe failed on topic {topic}: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    #[error("relay connection closed")]
    Disconnected,
}

/// Opaque handle naming one live subscription at the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-publish knobs forwarded to the relay.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// How long the relay should hold the payload for offline peers.
    pub ttl: Duration,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_PUBLISH_TTL,
        }
    }
}

/// Inbound traffic from the relay connection.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A sealed envelope arrived on a subscribed topic.
    Message { topic: Topic, payload: String },
    /// The connection dropped and was re-established. Relay-side
    /// subscription state is gone; the engine must resubscribe everything.
    Reconnected,
}

/// The relay transport as the engine sees it.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn subscribe(&self, topic: &Topic) -> Result<SubscriptionId, RelayError>;

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), RelayError>;

    async fn publish(
        &self,
        topic: &Topic,
        payload: String,
        options: PublishOptions,
    ) -> Result<(), RelayError>;

    /// Hand over the inbound event stream. Yields `Some` exactly once; the
    /// single consumer owns demultiplexing from then on.
    async fn take_events(&self) -> Option<mpsc::Receiver<RelayEvent>>;
}
