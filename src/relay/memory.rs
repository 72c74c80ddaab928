// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! In-process relay: a hub that fans published payloads out to every other
//! attached client subscribed to the topic.
//!
//! Used by tests and by embedded deployments where both peers live in one
//! process. Payloads are delivered to currently attached subscribers only;
//! there is no offline mailbox. A publisher never receives its own payload,
//! matching a relay that does not echo down the publishing connection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use super::{PublishOptions, Relay, RelayError, RelayEvent, SubscriptionId};
use crate::topics::Topic;

const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Default)]
struct HubInner {
    clients: RwLock<HashMap<u64, ClientSlot>>,
    next_client_id: AtomicU64,
}

struct ClientSlot {
    event_tx: mpsc::Sender<RelayEvent>,
    subscriptions: HashMap<SubscriptionId, Topic>,
}

/// Shared fan-out point. Clone it and [`MemoryHub::attach`] once per peer.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new client connection to the hub.
    pub async fn attach(&self) -> MemoryRelay {
        let client_id = self.inner.next_client_id.fetch_add(1, Ordering::SeqCst);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut clients = self.inner.clients.write().await;
        clients.insert(
            client_id,
            ClientSlot {
                event_tx: event_tx.clone(),
                subscriptions: HashMap::new(),
            },
        );

        MemoryRelay {
            inner: self.inner.clone(),
            client_id,
            event_tx,
            events: Mutex::new(Some(event_rx)),
        }
    }
}

/// One client's connection to a [`MemoryHub`].
pub struct MemoryRelay {
    inner: Arc<HubInner>,
    client_id: u64,
    event_tx: mpsc::Sender<RelayEvent>,
    events: Mutex<Option<mpsc::Receiver<RelayEvent>>>,
}

impl MemoryRelay {
    /// Drop all relay-side subscription state for this client and surface a
    /// [`RelayEvent::Reconnected`], exactly as a real connection bounce
    /// would. The engine is expected to resubscribe everything it knows.
    pub async fn simulate_reconnect(&self) {
        let mut clients = self.inner.clients.write().await;
        if let Some(slot) = clients.get_mut(&self.client_id) {
            slot.subscriptions.clear();
        }
        drop(clients);

        let _ = self.event_tx.send(RelayEvent::Reconnected).await;
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn subscribe(&self, topic: &Topic) -> Result<SubscriptionId, RelayError> {
        let id = SubscriptionId::new(Uuid::new_v4().to_string());

        let mut clients = self.inner.clients.write().await;
        let slot = clients
            .get_mut(&self.client_id)
            .ok_or_else(|| RelayError::SubscribeFailed {
                topic: topic.to_hex(),
                reason: "client detached from hub".to_string(),
            })?;
        slot.subscriptions.insert(id.clone(), *topic);

        Ok(id)
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), RelayError> {
        let mut clients = self.inner.clients.write().await;
        if let Some(slot) = clients.get_mut(&self.client_id) {
            slot.subscriptions.remove(id);
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &Topic,
        payload: String,
        _options: PublishOptions,
    ) -> Result<(), RelayError> {
        // Snapshot receivers, then send outside the lock so a slow consumer
        // cannot stall subscribe/unsubscribe on other clients.
        let targets: Vec<mpsc::Sender<RelayEvent>> = {
            let clients = self.inner.clients.read().await;
            clients
                .iter()
                .filter(|(id, slot)| {
                    **id != self.client_id
                        && slot.subscriptions.values().any(|t| t == topic)
                })
                .map(|(_, slot)| slot.event_tx.clone())
                .collect()
        };

        for tx in targets {
            // A dropped receiver means the client went away; not an error.
            let _ = tx
                .send(RelayEvent::Message {
                    topic: *topic,
                    payload: payload.clone(),
                })
                .await;
        }

        Ok(())
    }

    async fn take_events(&self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.events.lock().await.take()
    }
}
