// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Request/response correlation over the relay.
//!
//! Outbound: seal the JSON-RPC request under the topic key, publish it,
//! park the caller on a oneshot until the matching response (same id, same
//! topic) arrives, the deadline passes, or the topic is deleted.
//!
//! Inbound: decrypt via the topic registry, then route. Requests go to the
//! dispatch channel; responses resolve pending entries. Anything that fails
//! decryption is dropped without side effects, because the relay happily
//! redelivers traffic for keys this client no longer holds. Duplicate
//! responses are likewise no-ops; this table is the de-duplication boundary
//! for the at-least-once relay.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use super::{IdGenerator, RpcPayload, RpcRequest, RpcResponse};
use crate::crypto::{self, Envelope};
use crate::error::{Error, Result};
use crate::relay::{PublishOptions, Relay};
use crate::time::now_secs;
use crate::topics::{Topic, TopicRegistry};

const INBOUND_CHANNEL_CAPACITY: usize = 100;

/// A decrypted peer request, handed to the engine dispatch loop.
#[derive(Debug)]
pub struct InboundRequest {
    pub topic: Topic,
    pub request: RpcRequest,
}

struct Pending {
    topic: Topic,
    method: String,
    created_at: u64,
    responder: oneshot::Sender<Result<Value>>,
}

pub struct Correlator {
    registry: Arc<TopicRegistry>,
    relay: Arc<dyn Relay>,
    ids: IdGenerator,
    publish_ttl: Duration,
    pending: Mutex<HashMap<u64, Pending>>,
    inbound_tx: mpsc::Sender<InboundRequest>,
}

impl Correlator {
    pub fn new(
        registry: Arc<TopicRegistry>,
        relay: Arc<dyn Relay>,
        publish_ttl: Duration,
    ) -> (Self, mpsc::Receiver<InboundRequest>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        (
            Self {
                registry,
                relay,
                ids: IdGenerator::new(),
                publish_ttl,
                pending: Mutex::new(HashMap::new()),
                inbound_tx,
            },
            inbound_rx,
        )
    }

    async fn seal_payload(&self, topic: &Topic, json: &str) -> Result<String> {
        let key = self
            .registry
            .lookup(topic)
            .await
            .ok_or(Error::TopicNotFound(*topic))?;
        let envelope = crypto::seal(&key, json.as_bytes())?;
        Ok(envelope.to_base64())
    }

    /// Send a request on a topic and wait for the peer's answer.
    ///
    /// The pending entry is registered before the publish so a fast peer
    /// cannot answer into a void, and is removed on every exit path so the
    /// table never holds stale entries.
    pub async fn request(
        &self,
        topic: &Topic,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.ids.next_id();
        let request = RpcRequest::new(id, method, params);
        let payload = self
            .seal_payload(topic, &serde_json::to_string(&request)?)
            .await?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                id,
                Pending {
                    topic: *topic,
                    method: method.to_string(),
                    created_at: now_secs(),
                    responder: tx,
                },
            );
        }

        if let Err(e) = self
            .relay
            .publish(topic, payload, PublishOptions { ttl: self.publish_ttl })
            .await
        {
            let mut pending = self.pending.lock().await;
            pending.remove(&id);
            return Err(e.into());
        }
        debug!("sent {} request {} on topic {}", method, id, topic);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Responder dropped without answering: the engine is shutting
            // down. Surface as a timeout rather than panicking the caller.
            Ok(Err(_)) => Err(Error::RequestTimeout {
                topic: *topic,
                method: method.to_string(),
                seconds: timeout.as_secs(),
            }),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(Error::RequestTimeout {
                    topic: *topic,
                    method: method.to_string(),
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    /// Seal and publish a request without registering a pending entry.
    /// Used for delete notifications: the sender tears the topic down right
    /// after, so it could never consume the answer anyway. The peer's
    /// response surfaces as an unknown id and is dropped.
    pub async fn notify(&self, topic: &Topic, method: &str, params: Value) -> Result<()> {
        let id = self.ids.next_id();
        let request = RpcRequest::new(id, method, params);
        let payload = self
            .seal_payload(topic, &serde_json::to_string(&request)?)
            .await?;
        self.relay
            .publish(topic, payload, PublishOptions { ttl: self.publish_ttl })
            .await?;
        debug!("sent {} notification {} on topic {}", method, id, topic);
        Ok(())
    }

    /// Seal and publish a response to an inbound request.
    pub async fn respond(&self, topic: &Topic, response: RpcResponse) -> Result<()> {
        let payload = self
            .seal_payload(topic, &serde_json::to_string(&response)?)
            .await?;
        self.relay
            .publish(topic, payload, PublishOptions { ttl: self.publish_ttl })
            .await?;
        Ok(())
    }

    /// Demultiplex one inbound relay payload.
    pub async fn handle_inbound(&self, topic: Topic, payload: &str) {
        let envelope = match Envelope::from_base64(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("dropping malformed envelope on topic {}: {}", topic, e);
                return;
            }
        };

        let key = match self.registry.lookup(&topic).await {
            Some(key) => key,
            None => {
                debug!("dropping envelope on unregistered topic {}", topic);
                return;
            }
        };

        let plaintext = match crypto::open(&key, &envelope) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                // Could be traffic for a key we rotated away; treat as noise.
                debug!("dropping undecryptable envelope on topic {}: {}", topic, e);
                return;
            }
        };

        match serde_json::from_slice::<RpcPayload>(&plaintext) {
            Ok(RpcPayload::Request(request)) => {
                if self
                    .inbound_tx
                    .send(InboundRequest { topic, request })
                    .await
                    .is_err()
                {
                    warn!("dispatch channel closed; dropping request on topic {}", topic);
                }
            }
            Ok(RpcPayload::Response(response)) => self.resolve(topic, response).await,
            Err(e) => {
                debug!("dropping unparseable payload on topic {}: {}", topic, e);
            }
        }
    }

    async fn resolve(&self, topic: Topic, response: RpcResponse) {
        let entry = {
            let mut pending = self.pending.lock().await;
            match pending.get(&response.id) {
                Some(p) if p.topic == topic => pending.remove(&response.id),
                Some(_) => {
                    debug!(
                        "ignoring response id {} delivered on wrong topic {}",
                        response.id, topic
                    );
                    return;
                }
                None => {
                    debug!("ignoring duplicate or unknown response id {}", response.id);
                    return;
                }
            }
        };

        let Some(entry) = entry else { return };

        debug!(
            "resolved {} request {} on topic {} after {}s",
            entry.method,
            response.id,
            topic,
            now_secs().saturating_sub(entry.created_at)
        );

        let outcome = match response.error {
            Some(err) => Err(Error::PeerRejected {
                method: entry.method,
                code: err.code,
                message: err.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        // The requester may have timed out and gone; that is fine.
        let _ = entry.responder.send(outcome);
    }

    /// Force-reject every pending request scoped to a deleted topic.
    pub async fn reject_all(&self, topic: &Topic) {
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock().await;
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| p.topic == *topic)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        for entry in drained {
            debug!(
                "rejecting in-flight {} request on deleted topic {}",
                entry.method, topic
            );
            let _ = entry.responder.send(Err(Error::TopicNotFound(*topic)));
        }
    }

    /// Outstanding request count, across all topics.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}
