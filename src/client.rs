// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! The engine facade: pairing and session lifecycles, inbound dispatch,
//! and the background loops that keep both running.
//!
//! All state mutations follow the same discipline: take the per-topic
//! lock, re-read the record under it, mutate a clone, persist, commit the
//! clone to memory, then notify. A crash between persist and notify leaves
//! a consistent store; a notify failure after persist is reported through
//! the event channel but never rolls local state back.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::crypto::{KeyPair, SymmetricKey};
use crate::error::{Error, Result};
use crate::events::{ClientEvent, SessionUpdate};
use crate::pairing::{Pairing, PairingUri, PeerMetadata};
use crate::relay::{Relay, RelayEvent, SubscriptionManager};
use crate::rpc::{
    codes, methods, Correlator, DeleteParams, IdGenerator, InboundRequest, RpcError, RpcRequest,
    RpcResponse,
};
use crate::session::{
    validate_accounts, Namespaces, ProposeParams, ProposeResult, Session, SessionProposal,
    UpdateAccountsParams, UpdateExpiryParams, UpdateNamespacesParams,
};
use crate::storage::{Storage, COLLECTION_PAIRINGS, COLLECTION_SESSIONS};
use crate::time::now_secs;
use crate::topics::{Topic, TopicRegistry};

const EVENT_CHANNEL_CAPACITY: usize = 1000;

type RpcOutcome = std::result::Result<Value, RpcError>;

/// Record map that remembers insertion order, so `keys()`-style accessors
/// enumerate oldest-first. Replacing a record keeps its original slot.
struct RecordTable<T> {
    map: HashMap<Topic, T>,
    order: Vec<Topic>,
}

impl<T> RecordTable<T> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn get(&self, topic: &Topic) -> Option<&T> {
        self.map.get(topic)
    }

    fn contains(&self, topic: &Topic) -> bool {
        self.map.contains_key(topic)
    }

    fn insert(&mut self, topic: Topic, record: T) {
        if self.map.insert(topic, record).is_none() {
            self.order.push(topic);
        }
    }

    fn remove(&mut self, topic: &Topic) -> Option<T> {
        let removed = self.map.remove(topic);
        if removed.is_some() {
            self.order.retain(|t| t != topic);
        }
        removed
    }

    fn values(&self) -> impl Iterator<Item = &T> {
        self.order.iter().filter_map(|topic| self.map.get(topic))
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// One async mutex per live topic. The critical section for a topic spans
/// read, mutate, persist, and notify, so two racing updates to the same
/// record serialize instead of interleaving their persists.
#[derive(Clone, Default)]
struct TopicLocks {
    inner: Arc<Mutex<HashMap<Topic, Arc<Mutex<()>>>>>,
}

impl TopicLocks {
    async fn lock(&self, topic: &Topic) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().await;
            map.entry(*topic).or_default().clone()
        };
        slot.lock_owned().await
    }

    async fn forget(&self, topic: &Topic) {
        self.inner.lock().await.remove(topic);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopicKind {
    Pairing,
    Session,
}

fn apply_update(session: &mut Session, update: &SessionUpdate) {
    match update {
        SessionUpdate::Accounts(accounts) => session.accounts = accounts.clone(),
        SessionUpdate::Namespaces(namespaces) => {
            session.namespaces = namespaces.clone();
            session.accounts = namespaces.flatten_accounts();
        }
        SessionUpdate::Expiry(expiry) => session.expiry = *expiry,
    }
}

/// Protocol engine for one peer identity.
///
/// Cheap to clone; all shared state sits behind `Arc`s, and the background
/// loops spawned by [`Client::start`] run on clones of the whole handle.
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    storage: Arc<dyn Storage>,
    relay: Arc<dyn Relay>,
    registry: Arc<TopicRegistry>,
    correlator: Arc<Correlator>,
    subscriptions: Arc<SubscriptionManager>,
    pairings: Arc<RwLock<RecordTable<Pairing>>>,
    sessions: Arc<RwLock<RecordTable<Session>>>,
    proposals: Arc<RwLock<HashMap<u64, SessionProposal>>>,
    proposal_ids: Arc<IdGenerator>,
    locks: TopicLocks,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Arc<Mutex<Option<mpsc::Receiver<ClientEvent>>>>,
    inbound_rx: Arc<Mutex<Option<mpsc::Receiver<InboundRequest>>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Client {
    pub fn new(relay: Arc<dyn Relay>, storage: Arc<dyn Storage>, config: ClientConfig) -> Self {
        let registry = Arc::new(TopicRegistry::new(storage.clone()));
        let (correlator, inbound_rx) =
            Correlator::new(registry.clone(), relay.clone(), config.publish_ttl);
        let subscriptions = Arc::new(SubscriptionManager::new(relay.clone(), storage.clone()));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            storage,
            relay,
            registry,
            correlator: Arc::new(correlator),
            subscriptions,
            pairings: Arc::new(RwLock::new(RecordTable::new())),
            sessions: Arc::new(RwLock::new(RecordTable::new())),
            proposals: Arc::new(RwLock::new(HashMap::new())),
            proposal_ids: Arc::new(IdGenerator::new()),
            locks: TopicLocks::default(),
            event_tx,
            event_rx: Arc::new(Mutex::new(Some(event_rx))),
            inbound_rx: Arc::new(Mutex::new(Some(inbound_rx))),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Rehydrate persisted state, resubscribe every live topic, and spawn
    /// the relay demux, inbound dispatch, and expiry sweep loops.
    pub async fn start(&self) -> Result<()> {
        let restored_keys = self.registry.restore().await?;
        let mut topics = self.rehydrate_pairings().await?;
        topics.extend(self.rehydrate_sessions().await?);
        self.subscriptions.restore(&topics).await?;

        let mut relay_events =
            self.relay
                .take_events()
                .await
                .ok_or_else(|| Error::InvalidRequest {
                    reason: "relay event stream already consumed".to_string(),
                })?;
        let mut inbound_rx =
            self.inbound_rx
                .lock()
                .await
                .take()
                .ok_or_else(|| Error::InvalidRequest {
                    reason: "client already started".to_string(),
                })?;

        let demux = {
            let engine = self.clone();
            tokio::spawn(async move {
                while let Some(event) = relay_events.recv().await {
                    match event {
                        RelayEvent::Message { topic, payload } => {
                            engine.correlator.handle_inbound(topic, &payload).await;
                        }
                        RelayEvent::Reconnected => {
                            info!("relay reconnected; restoring subscriptions");
                            engine.subscriptions.resubscribe_all().await;
                        }
                    }
                }
            })
        };

        let dispatch = {
            let engine = self.clone();
            tokio::spawn(async move {
                while let Some(inbound) = inbound_rx.recv().await {
                    // One task per request: a handler parked on a busy
                    // topic's lock must not hold up traffic on other topics.
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        engine.handle_request(inbound).await;
                    });
                }
            })
        };

        let sweeper = {
            let engine = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(engine.config.sweep_interval);
                // The immediate first tick; rehydration already pruned.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    engine.sweep_expired().await;
                }
            })
        };

        self.tasks.lock().await.extend([demux, dispatch, sweeper]);

        let pairing_count = self.pairings.read().await.len();
        let session_count = self.sessions.read().await.len();
        info!(
            "🚀 engine started: {} keys, {} pairings, {} sessions restored",
            restored_keys, pairing_count, session_count
        );
        Ok(())
    }

    /// Stop the background loops. State is already durable; a later
    /// [`Client::start`] on a fresh instance picks up where this left off.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("engine stopped");
    }

    /// Take the application event stream. Yields `None` after the first
    /// call; there is exactly one consumer.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.lock().await.take()
    }

    // ---- rehydration ----

    async fn load_collection<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let keys = self.storage.list_keys(collection).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = self.storage.get(collection, &key).await? else {
                continue;
            };
            match serde_json::from_str(&raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping corrupt {} record {}: {}", collection, key, e),
            }
        }
        Ok(records)
    }

    async fn rehydrate_pairings(&self) -> Result<Vec<Topic>> {
        let mut records: Vec<Pairing> = self.load_collection(COLLECTION_PAIRINGS).await?;
        records.sort_by_key(|p| p.created_at);

        let now = now_secs();
        let mut live = Vec::new();
        let mut pairings = self.pairings.write().await;
        for pairing in records {
            if pairing.is_expired(now) {
                debug!("dropping expired pairing {} during rehydration", pairing.topic);
                self.storage
                    .delete(COLLECTION_PAIRINGS, &pairing.topic.to_hex())
                    .await?;
                self.registry.remove(&pairing.topic).await?;
                continue;
            }
            // Re-registering heals a keychain that lost its record; a
            // mismatched key is corruption and fails startup.
            self.registry
                .register(pairing.topic, pairing.sym_key.clone())
                .await?;
            live.push(pairing.topic);
            pairings.insert(pairing.topic, pairing);
        }
        Ok(live)
    }

    async fn rehydrate_sessions(&self) -> Result<Vec<Topic>> {
        let mut records: Vec<Session> = self.load_collection(COLLECTION_SESSIONS).await?;
        records.sort_by_key(|s| s.created_at);

        let now = now_secs();
        let mut live = Vec::new();
        let mut sessions = self.sessions.write().await;
        for session in records {
            if session.is_expired(now) {
                debug!("dropping expired session {} during rehydration", session.topic);
                self.storage
                    .delete(COLLECTION_SESSIONS, &session.topic.to_hex())
                    .await?;
                self.registry.remove(&session.topic).await?;
                continue;
            }
            self.registry
                .register(session.topic, session.shared_key.clone())
                .await?;
            live.push(session.topic);
            sessions.insert(session.topic, session);
        }
        Ok(live)
    }

    // ---- pairing lifecycle ----

    /// Create a pairing offer: fresh symmetric key, topic bound to it by
    /// hash, record persisted and subscribed before the URI ever leaves
    /// this process.
    pub async fn create_pairing(&self) -> Result<(PairingUri, Topic)> {
        let sym_key = SymmetricKey::generate();
        let topic = Topic::from_key(&sym_key);
        self.ensure_topic_free(&topic).await?;
        self.registry.register(topic, sym_key.clone()).await?;

        let pairing = Pairing::new(
            topic,
            sym_key.clone(),
            self.config.relay_protocol.clone(),
            self.config.relay_endpoint.clone(),
            self.config.pairing_pending_ttl,
        );
        if let Err(e) = self.persist_pairing(&pairing).await {
            self.discard_pairing_artifacts(&topic).await;
            return Err(e);
        }
        self.pairings.write().await.insert(topic, pairing);

        if let Err(e) = self.subscriptions.subscribe(&topic).await {
            self.discard_pairing_artifacts(&topic).await;
            return Err(e);
        }

        let mut uri = PairingUri::new(topic, sym_key, self.config.relay_protocol.clone());
        if let Some(endpoint) = &self.config.relay_endpoint {
            uri = uri.with_endpoint(endpoint.clone());
        }
        info!("pairing {} created, awaiting peer", topic);
        Ok((uri, topic))
    }

    /// Join a pairing from a received URI and run the approve handshake.
    ///
    /// A pending pairing for the same topic is retried rather than
    /// recreated, so a timed-out `pair` call can simply be called again.
    pub async fn pair(&self, uri: &str) -> Result<Topic> {
        let parsed = PairingUri::parse(uri)?;
        let topic = parsed.topic;
        if topic != Topic::from_key(&parsed.sym_key) {
            return Err(Error::InvalidUri {
                reason: "topic is not the hash of symKey".to_string(),
            });
        }
        if self.sessions.read().await.contains(&topic) {
            return Err(Error::TopicCollision(topic));
        }

        let existing = { self.pairings.read().await.get(&topic).cloned() };
        let created_here = match existing {
            Some(pairing) if pairing.active => {
                return Err(Error::InvalidRequest {
                    reason: format!("pairing {} is already active", topic),
                });
            }
            Some(_) => {
                debug!("re-running approve handshake for pending pairing {}", topic);
                false
            }
            None => {
                self.registry.register(topic, parsed.sym_key.clone()).await?;
                let pairing = Pairing::new(
                    topic,
                    parsed.sym_key.clone(),
                    parsed.relay_protocol.clone(),
                    parsed.relay_endpoint.clone(),
                    self.config.pairing_pending_ttl,
                );
                if let Err(e) = self.persist_pairing(&pairing).await {
                    self.discard_pairing_artifacts(&topic).await;
                    return Err(e);
                }
                self.pairings.write().await.insert(topic, pairing);
                true
            }
        };

        if let Err(e) = self.subscriptions.subscribe(&topic).await {
            if created_here {
                self.discard_pairing_artifacts(&topic).await;
            }
            return Err(e);
        }

        // A failed handshake leaves the pairing pending; the caller may
        // retry with the same URI until the pending TTL runs out.
        self.correlator
            .request(
                &topic,
                methods::PAIRING_APPROVE,
                json!({}),
                self.config.request_timeout,
            )
            .await?;

        {
            let _guard = self.locks.lock(&topic).await;
            let snapshot = { self.pairings.read().await.get(&topic).cloned() };
            if let Some(mut pairing) = snapshot {
                pairing.activate(self.config.pairing_ttl);
                self.persist_pairing(&pairing).await?;
                self.pairings.write().await.insert(topic, pairing);
            }
        }
        self.emit(ClientEvent::PairingActivated { topic });
        info!("🤝 pairing {} activated", topic);
        Ok(topic)
    }

    // ---- session lifecycle ----

    /// Propose a session over an active pairing and wait for the peer's
    /// decision. On approval the session settles locally and the settle
    /// confirmation runs over the new session topic.
    pub async fn propose_session(
        &self,
        pairing_topic: Topic,
        namespaces: Namespaces,
    ) -> Result<Topic> {
        namespaces.validate()?;
        let pairing = { self.pairings.read().await.get(&pairing_topic).cloned() }
            .ok_or(Error::PairingNotFound(pairing_topic))?;
        if pairing.is_expired(now_secs()) {
            self.expire_pairing(pairing_topic).await;
            return Err(Error::PairingNotFound(pairing_topic));
        }

        let key_pair = KeyPair::generate();
        let params = ProposeParams {
            proposer_public_key: key_pair.public_key().clone(),
            required_namespaces: namespaces,
            relay_protocol: pairing.relay_protocol.clone(),
            metadata: self.config.metadata.clone(),
        };
        let answer = self
            .correlator
            .request(
                &pairing_topic,
                methods::SESSION_PROPOSE,
                serde_json::to_value(&params)?,
                self.config.proposal_timeout,
            )
            .await?;
        let result: ProposeResult = serde_json::from_value(answer)?;
        result.namespaces.validate()?;
        if result.expiry <= now_secs() {
            return Err(Error::InvalidRequest {
                reason: "peer settled an already-expired session".to_string(),
            });
        }

        let shared_key = key_pair.derive_shared_key(&result.responder_public_key)?;
        let session_topic = Topic::from_key(&shared_key);
        self.ensure_topic_free(&session_topic).await?;
        self.registry.register(session_topic, shared_key.clone()).await?;

        let accounts = result.namespaces.flatten_accounts();
        let session = Session {
            topic: session_topic,
            pairing_topic,
            self_key_pair: key_pair,
            peer_public_key: result.responder_public_key.clone(),
            shared_key,
            namespaces: result.namespaces.clone(),
            accounts,
            expiry: result.expiry,
            relay_protocol: pairing.relay_protocol.clone(),
            controller: true,
            peer_metadata: result.metadata.clone(),
            acknowledged: false,
            created_at: now_secs(),
        };
        if let Err(e) = self.persist_session(&session).await {
            self.discard_session_artifacts(&session_topic).await;
            return Err(e);
        }
        self.sessions.write().await.insert(session_topic, session);
        if let Err(e) = self.subscriptions.subscribe(&session_topic).await {
            self.discard_session_artifacts(&session_topic).await;
            return Err(e);
        }
        self.note_session_on_pairing(&pairing_topic, result.metadata).await;

        // Settle confirmation over the session topic proves both sides
        // derived the same key. Failure here degrades to NotifyFailed;
        // the session itself is already settled and durable.
        match self
            .correlator
            .request(
                &session_topic,
                methods::SESSION_SETTLE,
                json!({}),
                self.config.request_timeout,
            )
            .await
        {
            Ok(_) => {
                let _guard = self.locks.lock(&session_topic).await;
                let snapshot = { self.sessions.read().await.get(&session_topic).cloned() };
                if let Some(mut session) = snapshot {
                    session.acknowledged = true;
                    if let Err(e) = self.persist_session(&session).await {
                        warn!("failed to persist settle ack for {}: {}", session_topic, e);
                    } else {
                        self.sessions.write().await.insert(session_topic, session);
                    }
                }
                self.emit(ClientEvent::SessionSettled {
                    topic: session_topic,
                });
            }
            Err(e) => {
                warn!("settle confirmation failed on {}: {}", session_topic, e);
                self.emit(ClientEvent::NotifyFailed {
                    topic: session_topic,
                    method: methods::SESSION_SETTLE.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        info!(
            "🤝 session {} settled as proposer over pairing {}",
            session_topic, pairing_topic
        );
        Ok(session_topic)
    }

    /// Approve a parked proposal with the namespaces the application
    /// grants. Settles the session locally before the answer leaves, so a
    /// crash cannot acknowledge a session that was never durable.
    pub async fn approve_session(
        &self,
        proposal_id: u64,
        namespaces: Namespaces,
    ) -> Result<Topic> {
        namespaces.validate()?;
        let proposal = { self.proposals.write().await.remove(&proposal_id) }
            .ok_or(Error::ProposalNotFound(proposal_id))?;
        if now_secs() >= proposal.received_at + self.config.proposal_timeout.as_secs() {
            debug!("proposal {} expired before approval", proposal_id);
            return Err(Error::ProposalNotFound(proposal_id));
        }

        let key_pair = KeyPair::generate();
        let responder_public_key = key_pair.public_key().clone();
        let shared_key = key_pair.derive_shared_key(&proposal.proposer_public_key)?;
        let session_topic = Topic::from_key(&shared_key);
        self.ensure_topic_free(&session_topic).await?;
        self.registry.register(session_topic, shared_key.clone()).await?;

        let expiry = now_secs() + self.config.session_ttl.as_secs();
        let accounts = namespaces.flatten_accounts();
        let session = Session {
            topic: session_topic,
            pairing_topic: proposal.pairing_topic,
            self_key_pair: key_pair,
            peer_public_key: proposal.proposer_public_key.clone(),
            shared_key,
            namespaces: namespaces.clone(),
            accounts,
            expiry,
            relay_protocol: proposal.relay_protocol.clone(),
            controller: false,
            peer_metadata: proposal.proposer_metadata.clone(),
            acknowledged: false,
            created_at: now_secs(),
        };
        if let Err(e) = self.persist_session(&session).await {
            self.discard_session_artifacts(&session_topic).await;
            return Err(e);
        }
        self.sessions.write().await.insert(session_topic, session);
        if let Err(e) = self.subscriptions.subscribe(&session_topic).await {
            self.discard_session_artifacts(&session_topic).await;
            return Err(e);
        }
        self.note_session_on_pairing(&proposal.pairing_topic, proposal.proposer_metadata.clone())
            .await;

        let result = ProposeResult {
            responder_public_key,
            namespaces,
            expiry,
            metadata: self.config.metadata.clone(),
        };
        let response = RpcResponse::ok(proposal.request_id, serde_json::to_value(result)?);
        if let Err(e) = self.correlator.respond(&proposal.pairing_topic, response).await {
            warn!(
                "failed to answer proposal {} on pairing {}: {}",
                proposal_id, proposal.pairing_topic, e
            );
            self.emit(ClientEvent::NotifyFailed {
                topic: proposal.pairing_topic,
                method: methods::SESSION_PROPOSE.to_string(),
                reason: e.to_string(),
            });
        }

        info!(
            "🤝 session {} settled as responder over pairing {}",
            session_topic, proposal.pairing_topic
        );
        Ok(session_topic)
    }

    /// Decline a parked proposal. The proposer sees a rejection error on
    /// its pending `session_propose`.
    pub async fn reject_session(&self, proposal_id: u64, reason: impl Into<String>) -> Result<()> {
        let proposal = { self.proposals.write().await.remove(&proposal_id) }
            .ok_or(Error::ProposalNotFound(proposal_id))?;
        let response = RpcResponse::err(
            proposal.request_id,
            RpcError::new(codes::PROPOSAL_REJECTED, reason.into()),
        );
        self.correlator
            .respond(&proposal.pairing_topic, response)
            .await?;
        info!("session proposal {} rejected", proposal_id);
        Ok(())
    }

    // ---- session updates ----

    /// Replace the session's account list and notify the peer.
    pub async fn update_accounts(&self, topic: Topic, accounts: Vec<String>) -> Result<()> {
        validate_accounts(&accounts)?;
        let params = serde_json::to_value(UpdateAccountsParams {
            accounts: accounts.clone(),
        })?;
        self.commit_update(
            topic,
            SessionUpdate::Accounts(accounts),
            methods::SESSION_UPDATE_ACCOUNTS,
            params,
        )
        .await
    }

    /// Replace the session's namespaces; the flattened account view is
    /// re-derived from the new map.
    pub async fn update_namespaces(&self, topic: Topic, namespaces: Namespaces) -> Result<()> {
        namespaces.validate()?;
        let params = serde_json::to_value(UpdateNamespacesParams {
            namespaces: namespaces.clone(),
        })?;
        self.commit_update(
            topic,
            SessionUpdate::Namespaces(namespaces),
            methods::SESSION_UPDATE_NAMESPACES,
            params,
        )
        .await
    }

    /// Move the session expiry. Must lie in the future and within the
    /// configured maximum session lifetime from now.
    pub async fn update_expiry(&self, topic: Topic, expiry: u64) -> Result<()> {
        self.validate_expiry(expiry)?;
        let params = serde_json::to_value(UpdateExpiryParams { expiry })?;
        self.commit_update(
            topic,
            SessionUpdate::Expiry(expiry),
            methods::SESSION_UPDATE_EXPIRY,
            params,
        )
        .await
    }

    async fn commit_update(
        &self,
        topic: Topic,
        update: SessionUpdate,
        method: &str,
        params: Value,
    ) -> Result<()> {
        let _guard = self.locks.lock(&topic).await;
        let snapshot = { self.sessions.read().await.get(&topic).cloned() };
        let Some(mut session) = snapshot else {
            return Err(Error::SessionNotFound(topic));
        };
        if session.is_expired(now_secs()) {
            self.delete_session_local(topic, codes::EXPIRED, "session expired")
                .await;
            return Err(Error::SessionNotFound(topic));
        }

        apply_update(&mut session, &update);
        // Persist failure aborts before memory or the wire see the change.
        self.persist_session(&session).await?;
        self.sessions.write().await.insert(topic, session);

        if let Err(e) = self
            .correlator
            .request(&topic, method, params, self.config.request_timeout)
            .await
        {
            warn!("update notification {} failed on {}: {}", method, topic, e);
            self.emit(ClientEvent::NotifyFailed {
                topic,
                method: method.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    fn validate_expiry(&self, expiry: u64) -> Result<()> {
        let now = now_secs();
        if expiry <= now {
            return Err(Error::InvalidRequest {
                reason: "expiry must be in the future".to_string(),
            });
        }
        let max = now + self.config.session_ttl.as_secs();
        if expiry > max {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "expiry exceeds the maximum session lifetime of {}s",
                    self.config.session_ttl.as_secs()
                ),
            });
        }
        Ok(())
    }

    // ---- liveness and teardown ----

    /// Round-trip a ping over a live pairing or session topic.
    pub async fn ping(&self, topic: Topic) -> Result<()> {
        let method = match self.classify(&topic).await? {
            TopicKind::Session => methods::SESSION_PING,
            TopicKind::Pairing => methods::PAIRING_PING,
        };
        self.correlator
            .request(&topic, method, json!({}), self.config.request_timeout)
            .await?;
        Ok(())
    }

    /// Tear down a pairing or session: notify the peer best-effort, then
    /// delete locally. The local delete happens even when the
    /// notification cannot be delivered.
    pub async fn disconnect(&self, topic: Topic, reason: impl Into<String>) -> Result<()> {
        let kind = self.classify(&topic).await?;
        let message = reason.into();
        let params = serde_json::to_value(DeleteParams {
            code: codes::USER_DISCONNECTED,
            message: message.clone(),
        })?;

        let method = match kind {
            TopicKind::Session => methods::SESSION_DELETE,
            TopicKind::Pairing => methods::PAIRING_DELETE,
        };
        let _guard = self.locks.lock(&topic).await;
        if let Err(e) = self.correlator.notify(&topic, method, params).await {
            warn!("delete notification failed on {}: {}", topic, e);
            self.emit(ClientEvent::NotifyFailed {
                topic,
                method: method.to_string(),
                reason: e.to_string(),
            });
        }
        match kind {
            TopicKind::Session => {
                self.delete_session_local(topic, codes::USER_DISCONNECTED, &message)
                    .await;
            }
            TopicKind::Pairing => {
                self.delete_pairing_local(topic, codes::USER_DISCONNECTED, &message)
                    .await;
            }
        }
        Ok(())
    }

    // ---- accessors ----

    pub async fn get_pairing(&self, topic: &Topic) -> Result<Pairing> {
        let snapshot = { self.pairings.read().await.get(topic).cloned() };
        match snapshot {
            Some(pairing) if !pairing.is_expired(now_secs()) => Ok(pairing),
            _ => Err(Error::PairingNotFound(*topic)),
        }
    }

    pub async fn get_session(&self, topic: &Topic) -> Result<Session> {
        let snapshot = { self.sessions.read().await.get(topic).cloned() };
        match snapshot {
            Some(session) if !session.is_expired(now_secs()) => Ok(session),
            _ => Err(Error::SessionNotFound(*topic)),
        }
    }

    /// Topics of live pairings, oldest first.
    pub async fn pairing_topics(&self) -> Vec<Topic> {
        let now = now_secs();
        let pairings = self.pairings.read().await;
        pairings
            .values()
            .filter(|p| !p.is_expired(now))
            .map(|p| p.topic)
            .collect()
    }

    /// Topics of live sessions, oldest first.
    pub async fn session_topics(&self) -> Vec<Topic> {
        let now = now_secs();
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| !s.is_expired(now))
            .map(|s| s.topic)
            .collect()
    }

    // ---- shared helpers ----

    async fn ensure_topic_free(&self, topic: &Topic) -> Result<()> {
        if self.pairings.read().await.contains(topic)
            || self.sessions.read().await.contains(topic)
            || self.registry.contains(topic).await
        {
            return Err(Error::TopicCollision(*topic));
        }
        Ok(())
    }

    /// Decide whether a topic names a live pairing or session, lazily
    /// collecting it when it turns out to be expired.
    async fn classify(&self, topic: &Topic) -> Result<TopicKind> {
        let session = { self.sessions.read().await.get(topic).cloned() };
        if let Some(session) = session {
            if session.is_expired(now_secs()) {
                self.expire_session(*topic).await;
                return Err(Error::TopicNotFound(*topic));
            }
            return Ok(TopicKind::Session);
        }
        let pairing = { self.pairings.read().await.get(topic).cloned() };
        if let Some(pairing) = pairing {
            if pairing.is_expired(now_secs()) {
                self.expire_pairing(*topic).await;
                return Err(Error::TopicNotFound(*topic));
            }
            return Ok(TopicKind::Pairing);
        }
        Err(Error::TopicNotFound(*topic))
    }

    async fn persist_pairing(&self, pairing: &Pairing) -> Result<()> {
        let raw = serde_json::to_string(pairing)?;
        self.storage
            .put(COLLECTION_PAIRINGS, &pairing.topic.to_hex(), &raw)
            .await?;
        Ok(())
    }

    async fn persist_session(&self, session: &Session) -> Result<()> {
        let raw = serde_json::to_string(session)?;
        self.storage
            .put(COLLECTION_SESSIONS, &session.topic.to_hex(), &raw)
            .await?;
        Ok(())
    }

    /// Best-effort unwind of a half-created record after a setup step
    /// failed. The caller reports the original failure.
    async fn discard_pairing_artifacts(&self, topic: &Topic) {
        self.pairings.write().await.remove(topic);
        if let Err(e) = self.storage.delete(COLLECTION_PAIRINGS, &topic.to_hex()).await {
            warn!("cleanup of pairing record {} failed: {}", topic, e);
        }
        if let Err(e) = self.registry.remove(topic).await {
            warn!("cleanup of pairing key {} failed: {}", topic, e);
        }
    }

    async fn discard_session_artifacts(&self, topic: &Topic) {
        self.sessions.write().await.remove(topic);
        if let Err(e) = self.storage.delete(COLLECTION_SESSIONS, &topic.to_hex()).await {
            warn!("cleanup of session record {} failed: {}", topic, e);
        }
        if let Err(e) = self.registry.remove(topic).await {
            warn!("cleanup of session key {} failed: {}", topic, e);
        }
    }

    /// Settlement bookkeeping on the host pairing: activate it if the
    /// handshake never completed, extend its expiry, and adopt the peer's
    /// metadata if none is known yet.
    async fn note_session_on_pairing(
        &self,
        pairing_topic: &Topic,
        peer_metadata: Option<PeerMetadata>,
    ) {
        let _guard = self.locks.lock(pairing_topic).await;
        let snapshot = { self.pairings.read().await.get(pairing_topic).cloned() };
        let Some(mut pairing) = snapshot else {
            return;
        };
        if pairing.active {
            pairing.extend_expiry(self.config.pairing_ttl);
        } else {
            pairing.activate(self.config.pairing_ttl);
        }
        if pairing.peer_metadata.is_none() {
            pairing.peer_metadata = peer_metadata;
        }
        if let Err(e) = self.persist_pairing(&pairing).await {
            warn!(
                "failed to persist pairing {} after settlement: {}",
                pairing_topic, e
            );
            return;
        }
        self.pairings.write().await.insert(*pairing_topic, pairing);
    }

    fn emit(&self, event: ClientEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            warn!("event channel full; dropping {:?}", event);
        }
    }

    async fn respond_err(&self, topic: Topic, id: u64, error: RpcError) {
        if let Err(e) = self
            .correlator
            .respond(&topic, RpcResponse::err(id, error))
            .await
        {
            warn!("failed to send error response on {}: {}", topic, e);
        }
    }

    // ---- inbound dispatch ----

    async fn handle_request(&self, inbound: InboundRequest) {
        let InboundRequest { topic, request } = inbound;
        let id = request.id;
        let method = request.method.clone();
        debug!("inbound {} on topic {}", method, topic);

        // Proposals defer their answer until the application decides.
        if method == methods::SESSION_PROPOSE {
            self.on_session_propose(topic, request).await;
            return;
        }

        let outcome = match method.as_str() {
            methods::PAIRING_APPROVE => self.on_pairing_approve(topic).await,
            methods::PAIRING_PING => self.on_pairing_ping(topic).await,
            methods::PAIRING_DELETE => self.on_pairing_delete(topic, request.params).await,
            methods::SESSION_SETTLE => self.on_session_settle(topic).await,
            methods::SESSION_PING => self.on_session_ping(topic).await,
            methods::SESSION_DELETE => self.on_session_delete(topic, request.params).await,
            methods::SESSION_UPDATE_ACCOUNTS => {
                self.on_update_accounts(topic, request.params).await
            }
            methods::SESSION_UPDATE_NAMESPACES => {
                self.on_update_namespaces(topic, request.params).await
            }
            methods::SESSION_UPDATE_EXPIRY => self.on_update_expiry(topic, request.params).await,
            other => Err(RpcError::method_not_found(other)),
        };

        let response = match outcome {
            Ok(value) => RpcResponse::ok(id, value),
            Err(error) => RpcResponse::err(id, error),
        };
        if let Err(e) = self.correlator.respond(&topic, response).await {
            warn!("failed to respond to {} on {}: {}", method, topic, e);
        }
    }

    async fn on_pairing_approve(&self, topic: Topic) -> RpcOutcome {
        let _guard = self.locks.lock(&topic).await;
        let snapshot = { self.pairings.read().await.get(&topic).cloned() };
        let Some(pairing) = snapshot else {
            return Err(RpcError::no_matching_topic(&topic));
        };
        if pairing.is_expired(now_secs()) {
            self.delete_pairing_local(topic, codes::EXPIRED, "pairing expired")
                .await;
            return Err(RpcError::no_matching_topic(&topic));
        }
        if pairing.active {
            // Redelivered approve: acknowledge again, touch nothing.
            return Ok(json!(true));
        }

        let mut updated = pairing;
        updated.activate(self.config.pairing_ttl);
        if let Err(e) = self.persist_pairing(&updated).await {
            warn!("failed to persist pairing activation for {}: {}", topic, e);
            return Err(RpcError::internal());
        }
        self.pairings.write().await.insert(topic, updated);
        self.emit(ClientEvent::PairingActivated { topic });
        info!("🤝 pairing {} activated by peer", topic);
        Ok(json!(true))
    }

    async fn on_pairing_ping(&self, topic: Topic) -> RpcOutcome {
        let snapshot = { self.pairings.read().await.get(&topic).cloned() };
        match snapshot {
            Some(pairing) if !pairing.is_expired(now_secs()) => Ok(json!(true)),
            Some(_) => {
                self.expire_pairing(topic).await;
                Err(RpcError::no_matching_topic(&topic))
            }
            None => Err(RpcError::no_matching_topic(&topic)),
        }
    }

    async fn on_pairing_delete(&self, topic: Topic, params: Value) -> RpcOutcome {
        let reason: DeleteParams = serde_json::from_value(params).unwrap_or(DeleteParams {
            code: codes::USER_DISCONNECTED,
            message: "peer disconnected".to_string(),
        });
        let _guard = self.locks.lock(&topic).await;
        self.delete_pairing_local(topic, reason.code, &reason.message)
            .await;
        Ok(json!(true))
    }

    async fn on_session_propose(&self, topic: Topic, request: RpcRequest) {
        let id = request.id;
        let pairing = { self.pairings.read().await.get(&topic).cloned() };
        let live = matches!(&pairing, Some(p) if !p.is_expired(now_secs()));
        if !live {
            self.respond_err(topic, id, RpcError::no_matching_topic(&topic))
                .await;
            return;
        }

        let params: ProposeParams = match serde_json::from_value(request.params) {
            Ok(params) => params,
            Err(e) => {
                self.respond_err(
                    topic,
                    id,
                    RpcError::malformed_request(format!("bad session_propose params: {}", e)),
                )
                .await;
                return;
            }
        };
        if let Err(e) = params.required_namespaces.validate() {
            self.respond_err(topic, id, RpcError::malformed_request(e.to_string()))
                .await;
            return;
        }

        let proposal = {
            let mut proposals = self.proposals.write().await;
            // Redelivery carries the same request id on the same pairing;
            // the eventual answer covers both copies. The same request id
            // on a *different* pairing is an unrelated proposal, so the
            // parked table is keyed by a locally minted id instead of the
            // peer-chosen one.
            let redelivered = proposals
                .values()
                .any(|p| p.pairing_topic == topic && p.request_id == id);
            if redelivered {
                debug!("duplicate session proposal {} on {} ignored", id, topic);
                return;
            }
            let proposal = SessionProposal {
                id: self.proposal_ids.next_id(),
                request_id: id,
                pairing_topic: topic,
                proposer_public_key: params.proposer_public_key,
                required_namespaces: params.required_namespaces,
                relay_protocol: params.relay_protocol,
                proposer_metadata: params.metadata,
                received_at: now_secs(),
            };
            proposals.insert(proposal.id, proposal.clone());
            proposal
        };
        info!(
            "session proposal {} received on pairing {}",
            proposal.id, topic
        );
        self.emit(ClientEvent::SessionProposed { proposal });
    }

    async fn on_session_settle(&self, topic: Topic) -> RpcOutcome {
        let _guard = self.locks.lock(&topic).await;
        let snapshot = { self.sessions.read().await.get(&topic).cloned() };
        let Some(mut session) = snapshot else {
            return Err(RpcError::no_matching_topic(&topic));
        };
        if session.is_expired(now_secs()) {
            self.delete_session_local(topic, codes::EXPIRED, "session expired")
                .await;
            return Err(RpcError::no_matching_topic(&topic));
        }
        if !session.acknowledged {
            session.acknowledged = true;
            if let Err(e) = self.persist_session(&session).await {
                warn!("failed to persist settle ack for {}: {}", topic, e);
                return Err(RpcError::internal());
            }
            self.sessions.write().await.insert(topic, session);
            self.emit(ClientEvent::SessionSettled { topic });
            info!("session {} acknowledged", topic);
        }
        Ok(json!(true))
    }

    async fn on_session_ping(&self, topic: Topic) -> RpcOutcome {
        let snapshot = { self.sessions.read().await.get(&topic).cloned() };
        match snapshot {
            Some(session) if !session.is_expired(now_secs()) => Ok(json!(true)),
            Some(_) => {
                self.expire_session(topic).await;
                Err(RpcError::no_matching_topic(&topic))
            }
            None => Err(RpcError::no_matching_topic(&topic)),
        }
    }

    async fn on_session_delete(&self, topic: Topic, params: Value) -> RpcOutcome {
        let reason: DeleteParams = serde_json::from_value(params).unwrap_or(DeleteParams {
            code: codes::USER_DISCONNECTED,
            message: "peer disconnected".to_string(),
        });
        let _guard = self.locks.lock(&topic).await;
        self.delete_session_local(topic, reason.code, &reason.message)
            .await;
        Ok(json!(true))
    }

    async fn on_update_accounts(&self, topic: Topic, params: Value) -> RpcOutcome {
        let params: UpdateAccountsParams = serde_json::from_value(params)
            .map_err(|e| RpcError::malformed_request(format!("bad accounts update: {}", e)))?;
        validate_accounts(&params.accounts)
            .map_err(|e| RpcError::malformed_request(e.to_string()))?;
        self.apply_peer_update(topic, SessionUpdate::Accounts(params.accounts))
            .await
    }

    async fn on_update_namespaces(&self, topic: Topic, params: Value) -> RpcOutcome {
        let params: UpdateNamespacesParams = serde_json::from_value(params)
            .map_err(|e| RpcError::malformed_request(format!("bad namespaces update: {}", e)))?;
        params
            .namespaces
            .validate()
            .map_err(|e| RpcError::malformed_request(e.to_string()))?;
        self.apply_peer_update(topic, SessionUpdate::Namespaces(params.namespaces))
            .await
    }

    async fn on_update_expiry(&self, topic: Topic, params: Value) -> RpcOutcome {
        let params: UpdateExpiryParams = serde_json::from_value(params)
            .map_err(|e| RpcError::malformed_request(format!("bad expiry update: {}", e)))?;
        // The carried value wins as-is; a peer moving expiry into the past
        // hands the record to the sweep.
        self.apply_peer_update(topic, SessionUpdate::Expiry(params.expiry))
            .await
    }

    /// Apply an update pushed by the peer. Last notification wins: the
    /// carried value replaces ours wholesale. A redelivered update whose
    /// value already matches is acknowledged without persisting again.
    async fn apply_peer_update(&self, topic: Topic, update: SessionUpdate) -> RpcOutcome {
        let _guard = self.locks.lock(&topic).await;
        let snapshot = { self.sessions.read().await.get(&topic).cloned() };
        let Some(mut session) = snapshot else {
            return Err(RpcError::no_matching_topic(&topic));
        };
        if session.is_expired(now_secs()) {
            self.delete_session_local(topic, codes::EXPIRED, "session expired")
                .await;
            return Err(RpcError::no_matching_topic(&topic));
        }

        let changed = match &update {
            SessionUpdate::Accounts(accounts) => session.accounts != *accounts,
            SessionUpdate::Namespaces(namespaces) => session.namespaces != *namespaces,
            SessionUpdate::Expiry(expiry) => session.expiry != *expiry,
        };
        if changed {
            apply_update(&mut session, &update);
            if let Err(e) = self.persist_session(&session).await {
                warn!("failed to persist peer update on {}: {}", topic, e);
                return Err(RpcError::internal());
            }
            self.sessions.write().await.insert(topic, session);
            self.emit(ClientEvent::SessionUpdated { topic, update });
        } else {
            debug!("redelivered update on {} matches current state", topic);
        }
        Ok(json!(true))
    }

    // ---- teardown and expiry ----

    /// Remove every local trace of a pairing. Callers hold the topic
    /// lock. Deleting an already-deleted topic is a no-op.
    async fn delete_pairing_local(&self, topic: Topic, code: i64, message: &str) {
        let removed = { self.pairings.write().await.remove(&topic) };
        if removed.is_none() {
            return;
        }
        if let Err(e) = self.storage.delete(COLLECTION_PAIRINGS, &topic.to_hex()).await {
            warn!("failed to delete pairing record {}: {}", topic, e);
        }
        if let Err(e) = self.registry.remove(&topic).await {
            warn!("failed to remove pairing key {}: {}", topic, e);
        }
        if let Err(e) = self.subscriptions.unsubscribe(&topic).await {
            warn!("failed to unsubscribe pairing {}: {}", topic, e);
        }
        self.correlator.reject_all(&topic).await;
        self.locks.forget(&topic).await;
        self.emit(ClientEvent::PairingDeleted {
            topic,
            code,
            message: message.to_string(),
        });
        info!("🗑️ pairing {} deleted: {}", topic, message);
    }

    async fn delete_session_local(&self, topic: Topic, code: i64, message: &str) {
        let removed = { self.sessions.write().await.remove(&topic) };
        if removed.is_none() {
            return;
        }
        if let Err(e) = self.storage.delete(COLLECTION_SESSIONS, &topic.to_hex()).await {
            warn!("failed to delete session record {}: {}", topic, e);
        }
        if let Err(e) = self.registry.remove(&topic).await {
            warn!("failed to remove session key {}: {}", topic, e);
        }
        if let Err(e) = self.subscriptions.unsubscribe(&topic).await {
            warn!("failed to unsubscribe session {}: {}", topic, e);
        }
        self.correlator.reject_all(&topic).await;
        self.locks.forget(&topic).await;
        self.emit(ClientEvent::SessionDeleted {
            topic,
            code,
            message: message.to_string(),
        });
        info!("🗑️ session {} deleted: {}", topic, message);
    }

    async fn expire_pairing(&self, topic: Topic) {
        let _guard = self.locks.lock(&topic).await;
        let expired = {
            self.pairings
                .read()
                .await
                .get(&topic)
                .map(|p| p.is_expired(now_secs()))
                .unwrap_or(false)
        };
        if expired {
            self.delete_pairing_local(topic, codes::EXPIRED, "pairing expired")
                .await;
        }
    }

    async fn expire_session(&self, topic: Topic) {
        let _guard = self.locks.lock(&topic).await;
        let expired = {
            self.sessions
                .read()
                .await
                .get(&topic)
                .map(|s| s.is_expired(now_secs()))
                .unwrap_or(false)
        };
        if expired {
            self.delete_session_local(topic, codes::EXPIRED, "session expired")
                .await;
        }
    }

    /// Collect expired pairings, sessions, and parked proposals. Peers
    /// are not notified; their own sweeps reach the same conclusion.
    async fn sweep_expired(&self) {
        let now = now_secs();
        let expired_pairings: Vec<Topic> = {
            self.pairings
                .read()
                .await
                .values()
                .filter(|p| p.is_expired(now))
                .map(|p| p.topic)
                .collect()
        };
        for topic in expired_pairings {
            self.expire_pairing(topic).await;
        }

        let expired_sessions: Vec<Topic> = {
            self.sessions
                .read()
                .await
                .values()
                .filter(|s| s.is_expired(now))
                .map(|s| s.topic)
                .collect()
        };
        for topic in expired_sessions {
            self.expire_session(topic).await;
        }

        let horizon = self.config.proposal_timeout.as_secs();
        let mut proposals = self.proposals.write().await;
        let before = proposals.len();
        proposals.retain(|_, p| now < p.received_at + horizon);
        let dropped = before - proposals.len();
        if dropped > 0 {
            debug!("dropped {} expired session proposals", dropped);
        }
    }
}
