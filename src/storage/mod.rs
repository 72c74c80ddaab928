// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Durable state. Everything the engine must remember across restarts goes
//! through the [`Storage`] trait: pairing records, settled sessions, topic
//! keys, and relay subscriptions.
//!
//! Records are stored as JSON strings keyed by (collection, key); the engine
//! serializes above this layer, so backends never need to know record
//! shapes. Writes must be atomic: a crash mid-write leaves either the old
//! record or the new one, never a torn file.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

pub const COLLECTION_PAIRINGS: &str = "pairings";
pub const COLLECTION_SESSIONS: &str = "sessions";
pub const COLLECTION_KEYPAIRS: &str = "crypto-keypairs";
pub const COLLECTION_SUBSCRIPTIONS: &str = "pending-subscriptions";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Non-filesystem backends report failures here.
    #[error("storage backend error: {message}")]
    Backend { message: String },
}

/// Storage backend for engine state.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write a record, replacing any previous value under the same key.
    async fn put(&self, collection: &str, key: &str, value: &str) -> Result<(), StorageError>;

    /// Read a record. `None` means the key was never written or was deleted.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<String>, StorageError>;

    /// Remove a record. Deleting an absent key is not an error.
    async fn delete(&self, collection: &str, key: &str) -> Result<(), StorageError>;

    /// All keys currently present in a collection, in no particular order.
    async fn list_keys(&self, collection: &str) -> Result<Vec<String>, StorageError>;
}
