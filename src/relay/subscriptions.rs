// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Subscription bookkeeping: which topics this client is listening on, with
//! intents persisted so a restart (or relay reconnect) can rebuild the
//! relay-side state without re-pairing.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{Relay, SubscriptionId};
use crate::error::Result;
use crate::storage::{Storage, COLLECTION_SUBSCRIPTIONS};
use crate::time::now_secs;
use crate::topics::Topic;

#[derive(Debug, Serialize, Deserialize)]
struct SubscriptionRecord {
    topic: Topic,
    created_at: u64,
}

pub struct SubscriptionManager {
    relay: Arc<dyn Relay>,
    storage: Arc<dyn Storage>,
    active: RwLock<HashMap<Topic, SubscriptionId>>,
}

impl SubscriptionManager {
    pub fn new(relay: Arc<dyn Relay>, storage: Arc<dyn Storage>) -> Self {
        Self {
            relay,
            storage,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe a topic, persisting the intent first. Subscribing a topic
    /// that is already active is a no-op.
    pub async fn subscribe(&self, topic: &Topic) -> Result<()> {
        {
            let active = self.active.read().await;
            if active.contains_key(topic) {
                return Ok(());
            }
        }

        let record = SubscriptionRecord {
            topic: *topic,
            created_at: now_secs(),
        };
        self.storage
            .put(
                COLLECTION_SUBSCRIPTIONS,
                &topic.to_hex(),
                &serde_json::to_string(&record)?,
            )
            .await?;

        let id = match self.relay.subscribe(topic).await {
            Ok(id) => id,
            Err(e) => {
                // Roll the intent back so storage never claims a
                // subscription the relay refused.
                self.storage
                    .delete(COLLECTION_SUBSCRIPTIONS, &topic.to_hex())
                    .await?;
                return Err(e.into());
            }
        };

        let mut active = self.active.write().await;
        active.insert(*topic, id);
        debug!("subscribed to topic {}", topic);
        Ok(())
    }

    /// Drop a topic's subscription. Unknown topics are a no-op.
    pub async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        let removed = {
            let mut active = self.active.write().await;
            active.remove(topic)
        };

        if let Some(id) = removed {
            self.relay.unsubscribe(&id).await?;
            debug!("unsubscribed from topic {}", topic);
        }

        self.storage
            .delete(COLLECTION_SUBSCRIPTIONS, &topic.to_hex())
            .await?;
        Ok(())
    }

    pub async fn is_subscribed(&self, topic: &Topic) -> bool {
        self.active.read().await.contains_key(topic)
    }

    /// Rebuild relay subscriptions at startup: the union of the topics the
    /// engines rehydrated and any persisted intents. Individual failures
    /// are logged and skipped so one bad topic cannot block the rest.
    pub async fn restore(&self, topics: &[Topic]) -> Result<usize> {
        let mut wanted: HashSet<Topic> = topics.iter().copied().collect();

        for key in self.storage.list_keys(COLLECTION_SUBSCRIPTIONS).await? {
            match Topic::from_hex(&key) {
                Ok(topic) => {
                    wanted.insert(topic);
                }
                Err(e) => {
                    warn!("skipping unreadable subscription intent {}: {}", key, e);
                }
            }
        }

        let wanted: Vec<Topic> = wanted.into_iter().collect();
        let results = join_all(wanted.iter().map(|topic| self.subscribe(topic))).await;

        let mut restored = 0;
        for (topic, result) in wanted.iter().zip(results) {
            match result {
                Ok(()) => restored += 1,
                Err(e) => warn!("failed to restore subscription for {}: {}", topic, e),
            }
        }

        info!("🔗 restored {} relay subscriptions", restored);
        Ok(restored)
    }

    /// After a relay reconnect every server-side subscription is gone.
    /// Re-subscribe everything we believe is active, replacing the handles.
    pub async fn resubscribe_all(&self) {
        let topics: Vec<Topic> = {
            let active = self.active.read().await;
            active.keys().copied().collect()
        };

        for topic in topics {
            match self.relay.subscribe(&topic).await {
                Ok(id) => {
                    let mut active = self.active.write().await;
                    active.insert(topic, id);
                }
                Err(e) => warn!("resubscribe failed for {}: {}", topic, e),
            }
        }
    }
}
