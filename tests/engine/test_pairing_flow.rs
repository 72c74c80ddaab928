//! Pairing lifecycle over the in-process hub: URI exchange, the approve
//! handshake, retries against absent peers, and liveness pings.

use std::sync::Arc;

use pairlink::storage::MemoryStorage;
use pairlink::{ClientEvent, Error, MemoryHub, PairingUri, Topic};

use super::common::{establish_pairing, fast_config, spawn_peer, wait_for};

#[tokio::test]
async fn test_pair_activates_both_sides() {
    let hub = MemoryHub::new();
    let mut a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;
    let mut b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;

    let (uri, topic) = a.client.create_pairing().await.expect("create_pairing");
    assert_eq!(
        uri.topic, topic,
        "the URI must carry the topic of the created pairing"
    );

    let before = a.client.get_pairing(&topic).await.expect("pending pairing");
    assert!(!before.active, "a fresh pairing starts pending");

    let joined = b.client.pair(&uri.to_string()).await.expect("pair");
    assert_eq!(joined, topic);

    wait_for(&mut a.events, |event| match event {
        ClientEvent::PairingActivated { topic: t } => Some(t),
        _ => None,
    })
    .await;

    let on_a = a.client.get_pairing(&topic).await.expect("pairing on a");
    let on_b = b.client.get_pairing(&topic).await.expect("pairing on b");
    assert!(on_a.active, "creator side must be active after the handshake");
    assert!(on_b.active, "joiner side must be active after the handshake");
    assert_eq!(
        on_a.sym_key, on_b.sym_key,
        "both sides must hold the same symmetric key"
    );

    assert_eq!(a.client.pairing_topics().await, vec![topic]);
    assert_eq!(b.client.pairing_topics().await, vec![topic]);
}

#[tokio::test]
async fn test_uri_topic_must_hash_from_key() {
    let hub = MemoryHub::new();
    let b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;

    // A URI whose topic was not derived from its key is tampered goods.
    let key = pairlink::crypto::SymmetricKey::generate();
    let wrong_topic = Topic::from_bytes([7u8; 32]);
    let tampered = PairingUri::new(wrong_topic, key, "sfr1").to_string();

    let err = b.client.pair(&tampered).await.expect_err("tampered URI");
    assert!(
        matches!(err, Error::InvalidUri { .. }),
        "mismatched topic/key must be rejected as an invalid URI, got {:?}",
        err
    );
}

#[tokio::test]
async fn test_pair_without_peer_times_out_but_stays_pending() {
    let hub = MemoryHub::new();
    let b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;

    // Nobody ever created this pairing on the other side.
    let key = pairlink::crypto::SymmetricKey::generate();
    let topic = Topic::from_key(&key);
    let uri = PairingUri::new(topic, key, "sfr1").to_string();

    let err = b.client.pair(&uri).await.expect_err("no peer to approve");
    assert!(
        matches!(err, Error::RequestTimeout { .. }),
        "an unanswered approve must surface as a timeout, got {:?}",
        err
    );

    // The pending record survives so the same URI can be retried.
    let pending = b.client.get_pairing(&topic).await.expect("pending record");
    assert!(!pending.active, "an unacknowledged pairing stays pending");
}

#[tokio::test]
async fn test_pair_retry_succeeds_after_peer_comes_back() {
    let hub = MemoryHub::new();
    let creator_storage = Arc::new(MemoryStorage::new());
    let a = spawn_peer(&hub, creator_storage.clone(), fast_config("alice")).await;
    let b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;

    let (uri, topic) = a.client.create_pairing().await.expect("create_pairing");

    // The creator goes dark before the joiner shows up.
    a.client.shutdown().await;
    let err = b.client.pair(&uri.to_string()).await.expect_err("no answer");
    assert!(matches!(err, Error::RequestTimeout { .. }));

    // It returns from the same store; the identical URI works on retry.
    let mut a2 = spawn_peer(&hub, creator_storage, fast_config("alice")).await;
    let joined = b.client.pair(&uri.to_string()).await.expect("retry pair");
    assert_eq!(joined, topic);

    wait_for(&mut a2.events, |event| match event {
        ClientEvent::PairingActivated { .. } => Some(()),
        _ => None,
    })
    .await;
    let restored = a2.client.get_pairing(&topic).await.expect("pairing on a2");
    assert!(restored.active, "the retried handshake must activate the pairing");
}

#[tokio::test]
async fn test_pairing_ping_round_trip() {
    let hub = MemoryHub::new();
    let mut a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;
    let mut b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;

    let topic = establish_pairing(&mut a, &mut b).await;

    a.client.ping(topic).await.expect("ping from creator");
    b.client.ping(topic).await.expect("ping from joiner");
}

#[tokio::test]
async fn test_ping_unknown_topic_reports_exact_message() {
    let hub = MemoryHub::new();
    let a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;

    let missing = Topic::from_bytes([9u8; 32]);
    let err = a.client.ping(missing).await.expect_err("unknown topic");
    assert!(err.is_not_found());
    assert_eq!(
        err.to_string(),
        format!("No matching pairing or session with topic: {}", missing),
        "the not-found message must name the topic"
    );
}
