// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod pairing;
pub mod relay;
pub mod rpc;
pub mod session;
pub mod storage;
pub mod time;
pub mod topics;

// Re-export the engine surface
pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use events::{ClientEvent, SessionUpdate};

// Re-export the domain types applications handle
pub use pairing::{Pairing, PairingUri, PeerMetadata};
pub use session::{Namespace, Namespaces, Session, SessionProposal};
pub use topics::Topic;

// Re-export the pluggable edges
pub use relay::{
    MemoryHub, MemoryRelay, PublishOptions, Relay, RelayError, RelayEvent, SubscriptionId,
};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
