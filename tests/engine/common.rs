//! Shared harness for the engine tests: two clients talking over an
//! in-process relay hub, with helpers for draining the event stream.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use pairlink::relay::MemoryHub;
use pairlink::session::Namespace;
use pairlink::storage::Storage;
use pairlink::{Client, ClientConfig, ClientEvent, Namespaces, PeerMetadata, SessionProposal};

pub struct Peer {
    pub client: Client,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Config with short timeouts so failure paths resolve in test time.
pub fn fast_config(name: &str) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.request_timeout = Duration::from_secs(2);
    config.proposal_timeout = Duration::from_secs(10);
    config.metadata = Some(PeerMetadata {
        name: name.to_string(),
        description: format!("{} test peer", name),
        url: "https://example.test".to_string(),
        icons: Vec::new(),
    });
    config
}

pub async fn spawn_peer(hub: &MemoryHub, storage: Arc<dyn Storage>, config: ClientConfig) -> Peer {
    // Engine logs show up under --nocapture; repeat inits are fine.
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let relay = Arc::new(hub.attach().await);
    let client = Client::new(relay, storage, config);
    client.start().await.expect("engine should start");
    let events = client
        .take_events()
        .await
        .expect("event stream should be available once");
    Peer { client, events }
}

/// Wait for the first event `pick` accepts, discarding the rest.
pub async fn wait_for<F, T>(events: &mut mpsc::Receiver<ClientEvent>, mut pick: F) -> T
where
    F: FnMut(ClientEvent) -> Option<T>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = timeout(remaining, events.recv())
            .await
            .expect("timed out waiting for a matching engine event")
            .expect("event channel closed while waiting");
        if let Some(found) = pick(event) {
            return found;
        }
    }
}

pub async fn wait_for_proposal(events: &mut mpsc::Receiver<ClientEvent>) -> SessionProposal {
    wait_for(events, |event| match event {
        ClientEvent::SessionProposed { proposal } => Some(proposal),
        _ => None,
    })
    .await
}

pub fn sample_namespaces() -> Namespaces {
    let mut namespaces = Namespaces::new();
    namespaces.insert(
        "eip155",
        Namespace {
            accounts: vec![
                "eip155:1:0xaa11".to_string(),
                "eip155:137:0xbb22".to_string(),
            ],
            methods: BTreeSet::from([
                "personal_sign".to_string(),
                "eth_sendTransaction".to_string(),
            ]),
            events: BTreeSet::from(["accountsChanged".to_string()]),
        },
    );
    namespaces
}

/// Run the full pairing handshake and return the shared pairing topic.
pub async fn establish_pairing(a: &mut Peer, b: &mut Peer) -> pairlink::Topic {
    let (uri, topic) = a.client.create_pairing().await.expect("create_pairing");
    let joined = b.client.pair(&uri.to_string()).await.expect("pair");
    assert_eq!(joined, topic, "both sides must agree on the pairing topic");
    wait_for(&mut a.events, |event| match event {
        ClientEvent::PairingActivated { topic } => Some(topic),
        _ => None,
    })
    .await;
    topic
}

/// Run propose/approve/settle over an established pairing and return the
/// session topic both sides agreed on.
pub async fn establish_session(
    a: &mut Peer,
    b: &mut Peer,
    pairing_topic: pairlink::Topic,
    granted: Namespaces,
) -> pairlink::Topic {
    let proposer = {
        let client = a.client.clone();
        let required = granted.clone();
        tokio::spawn(async move { client.propose_session(pairing_topic, required).await })
    };

    let proposal = wait_for_proposal(&mut b.events).await;
    let responder_topic = b
        .client
        .approve_session(proposal.id, granted)
        .await
        .expect("approve_session");

    let proposer_topic = proposer
        .await
        .expect("proposer task")
        .expect("propose_session");
    assert_eq!(
        proposer_topic, responder_topic,
        "both sides must derive the same session topic"
    );
    proposer_topic
}
