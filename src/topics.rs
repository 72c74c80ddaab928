// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Topics: 32-byte identifiers that scope every relay message to one
//! pairing or session, plus the registry mapping live topics to their
//! symmetric keys.
//!
//! Topics are derived, not chosen: a pairing topic is sha256 of its
//! symmetric key, a session topic is sha256 of the settled shared key.
//! Both peers of a session compute the same topic independently after
//! ECDH without ever sending it in plaintext.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::crypto::SymmetricKey;
use crate::error::Error;
use crate::storage::{Storage, COLLECTION_KEYPAIRS};
use crate::time::now_secs;

pub const TOPIC_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid topic: {reason}")]
pub struct TopicParseError {
    pub reason: String,
}

/// Identifier scoping relay traffic to one pairing or session.
///
/// Rendered as 64 lowercase hex characters everywhere: logs, URIs,
/// storage keys, and relay subscriptions.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic([u8; TOPIC_LEN]);

impl Topic {
    /// Random topic, unrelated to any key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOPIC_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Topic bound to a key by hashing it. Deterministic, so two holders
    /// of the same key arrive at the same topic without coordination.
    pub fn from_key(key: &SymmetricKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let mut bytes = [0u8; TOPIC_LEN];
        bytes.copy_from_slice(digest.as_slice());
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; TOPIC_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOPIC_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TopicParseError> {
        let bytes = hex::decode(s).map_err(|e| TopicParseError {
            reason: format!("hex decode error: {}", e),
        })?;
        let arr: [u8; TOPIC_LEN] = bytes.try_into().map_err(|_| TopicParseError {
            reason: format!("expected {} hex characters", TOPIC_LEN * 2),
        })?;
        Ok(Self(arr))
    }
}

impl FromStr for Topic {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::from_hex(s)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self.to_hex())
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Topic::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyRecord {
    topic: Topic,
    sym_key: SymmetricKey,
    created_at: u64,
}

/// Live topic -> symmetric key mapping, write-through persisted so the
/// correlator can decrypt again after a restart.
///
/// The registry is the decrypt boundary: an inbound envelope on a topic
/// with no registered key is noise by definition and gets dropped upstream.
pub struct TopicRegistry {
    storage: Arc<dyn Storage>,
    keys: RwLock<HashMap<Topic, SymmetricKey>>,
}

impl TopicRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Register key material under its topic. Re-registering the same key is
    /// a no-op; a different key under a live topic is a collision and fatal
    /// for the operation that produced it.
    pub async fn register(&self, topic: Topic, key: SymmetricKey) -> Result<(), Error> {
        {
            let keys = self.keys.read().await;
            if let Some(existing) = keys.get(&topic) {
                if *existing == key {
                    return Ok(());
                }
                return Err(Error::TopicCollision(topic));
            }
        }

        let record = KeyRecord {
            topic,
            sym_key: key.clone(),
            created_at: now_secs(),
        };
        self.storage
            .put(
                COLLECTION_KEYPAIRS,
                &topic.to_hex(),
                &serde_json::to_string(&record)?,
            )
            .await?;

        let mut keys = self.keys.write().await;
        keys.insert(topic, key);
        debug!("🔑 registered key for topic {}", topic);
        Ok(())
    }

    pub async fn lookup(&self, topic: &Topic) -> Option<SymmetricKey> {
        self.keys.read().await.get(topic).cloned()
    }

    pub async fn contains(&self, topic: &Topic) -> bool {
        self.keys.read().await.contains_key(topic)
    }

    /// Drop a topic's key. Removing an unknown topic is a no-op.
    pub async fn remove(&self, topic: &Topic) -> Result<(), Error> {
        {
            let mut keys = self.keys.write().await;
            keys.remove(topic);
        }
        self.storage.delete(COLLECTION_KEYPAIRS, &topic.to_hex()).await?;
        Ok(())
    }

    /// Reload every persisted key at startup. Unreadable records are logged
    /// and skipped; one corrupt file must not strand the rest of the state.
    pub async fn restore(&self) -> Result<usize, Error> {
        let mut restored = 0;
        for key in self.storage.list_keys(COLLECTION_KEYPAIRS).await? {
            let raw = match self.storage.get(COLLECTION_KEYPAIRS, &key).await? {
                Some(raw) => raw,
                None => continue,
            };
            match serde_json::from_str::<KeyRecord>(&raw) {
                Ok(record) => {
                    let mut keys = self.keys.write().await;
                    keys.insert(record.topic, record.sym_key);
                    restored += 1;
                }
                Err(e) => {
                    warn!("skipping corrupt key record {}: {}", key, e);
                }
            }
        }
        Ok(restored)
    }
}
