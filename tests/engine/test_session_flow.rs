//! Session negotiation end to end: propose, approve or reject, the settle
//! confirmation over the derived topic, and the resulting records.

use std::sync::Arc;
use std::time::Duration;

use pairlink::crypto::{seal, KeyPair};
use pairlink::rpc::{codes, methods, RpcRequest};
use pairlink::session::ProposeParams;
use pairlink::storage::MemoryStorage;
use pairlink::{ClientEvent, Error, MemoryHub, PairingUri, PublishOptions, Relay, Topic};

use super::common::{
    establish_pairing, establish_session, fast_config, sample_namespaces, spawn_peer,
    wait_for, wait_for_proposal,
};

#[tokio::test]
async fn test_propose_approve_settles_identical_records() {
    let hub = MemoryHub::new();
    let mut a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;
    let mut b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;

    let pairing_topic = establish_pairing(&mut a, &mut b).await;
    let granted = sample_namespaces();
    let session_topic = establish_session(&mut a, &mut b, pairing_topic, granted.clone()).await;

    assert_ne!(
        session_topic, pairing_topic,
        "the session must settle on its own derived topic"
    );

    // The responder flags settlement when the confirmation lands.
    wait_for(&mut b.events, |event| match event {
        ClientEvent::SessionSettled { topic } => Some(topic),
        _ => None,
    })
    .await;

    let on_a = a.client.get_session(&session_topic).await.expect("session on a");
    let on_b = b.client.get_session(&session_topic).await.expect("session on b");

    assert_eq!(on_a.namespaces, on_b.namespaces, "namespaces must match");
    assert_eq!(on_a.accounts, on_b.accounts, "flattened accounts must match");
    assert_eq!(on_a.expiry, on_b.expiry, "the responder's expiry binds both");
    assert_eq!(on_a.shared_key, on_b.shared_key, "ECDH must agree");
    assert_eq!(on_a.pairing_topic, pairing_topic);
    assert!(on_a.controller, "the proposer is the controller");
    assert!(!on_b.controller, "the responder is not the controller");
    assert!(on_a.acknowledged, "proposer saw the settle ack");
    assert!(on_b.acknowledged, "responder saw the settle request");
    assert_eq!(
        on_a.accounts,
        granted.flatten_accounts(),
        "accounts must be the flattened namespace view"
    );

    // Peer identities crossed over during negotiation.
    assert_eq!(
        on_a.peer_metadata.as_ref().map(|m| m.name.as_str()),
        Some("bob")
    );
    assert_eq!(
        on_b.peer_metadata.as_ref().map(|m| m.name.as_str()),
        Some("alice")
    );

    assert_eq!(a.client.session_topics().await, vec![session_topic]);
    assert_eq!(b.client.session_topics().await, vec![session_topic]);

    // Both records settled; ping works in both directions on the new topic.
    a.client.ping(session_topic).await.expect("proposer ping");
    b.client.ping(session_topic).await.expect("responder ping");
}

#[tokio::test]
async fn test_reject_propagates_to_proposer() {
    let hub = MemoryHub::new();
    let mut a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;
    let mut b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;

    let pairing_topic = establish_pairing(&mut a, &mut b).await;

    let proposer = {
        let client = a.client.clone();
        let required = sample_namespaces();
        tokio::spawn(async move { client.propose_session(pairing_topic, required).await })
    };

    let proposal = wait_for_proposal(&mut b.events).await;
    b.client
        .reject_session(proposal.id, "user declined")
        .await
        .expect("reject_session");

    let err = proposer
        .await
        .expect("proposer task")
        .expect_err("rejected proposal");
    match err {
        Error::PeerRejected { code, message, .. } => {
            assert_eq!(code, codes::PROPOSAL_REJECTED);
            assert_eq!(message, "user declined");
        }
        other => panic!("expected PeerRejected, got {:?}", other),
    }

    // Nothing settled anywhere.
    assert!(a.client.session_topics().await.is_empty());
    assert!(b.client.session_topics().await.is_empty());
}

#[tokio::test]
async fn test_approve_unknown_proposal_is_not_found() {
    let hub = MemoryHub::new();
    let b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;

    let err = b
        .client
        .approve_session(424242, sample_namespaces())
        .await
        .expect_err("no such proposal");
    assert_eq!(
        err.to_string(),
        "No matching session proposal with id: 424242"
    );
}

#[tokio::test]
async fn test_proposal_is_consumed_by_its_first_answer() {
    let hub = MemoryHub::new();
    let mut a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;
    let mut b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;

    let pairing_topic = establish_pairing(&mut a, &mut b).await;

    let proposer = {
        let client = a.client.clone();
        tokio::spawn(async move {
            client
                .propose_session(pairing_topic, sample_namespaces())
                .await
        })
    };

    let proposal = wait_for_proposal(&mut b.events).await;
    b.client
        .approve_session(proposal.id, sample_namespaces())
        .await
        .expect("first approve");
    proposer.await.expect("task").expect("propose");

    let err = b
        .client
        .approve_session(proposal.id, sample_namespaces())
        .await
        .expect_err("second answer to the same proposal");
    assert!(
        matches!(err, Error::ProposalNotFound(id) if id == proposal.id),
        "an answered proposal must be gone, got {:?}",
        err
    );
}

#[tokio::test]
async fn test_identical_request_ids_on_two_pairings_stay_distinct() {
    let hub = MemoryHub::new();
    let mut b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;

    // A raw connection standing in for two remote proposers that happen to
    // mint the same JSON-RPC request id.
    let wire = hub.attach().await;
    let (uri_one, topic_one) = b.client.create_pairing().await.expect("first pairing");
    let (uri_two, topic_two) = b.client.create_pairing().await.expect("second pairing");

    let sealed_propose = |uri: &PairingUri| {
        let params = ProposeParams {
            proposer_public_key: KeyPair::generate().public_key().clone(),
            required_namespaces: sample_namespaces(),
            relay_protocol: "sfr1".to_string(),
            metadata: None,
        };
        let request = RpcRequest::new(
            424242,
            methods::SESSION_PROPOSE,
            serde_json::to_value(&params).unwrap(),
        );
        seal(&uri.sym_key, &serde_json::to_vec(&request).unwrap())
            .unwrap()
            .to_base64()
    };

    let payload_one = sealed_propose(&uri_one);
    wire.publish(&topic_one, payload_one.clone(), PublishOptions::default())
        .await
        .expect("publish on first pairing");
    wire.publish(&topic_two, sealed_propose(&uri_two), PublishOptions::default())
        .await
        .expect("publish on second pairing");

    let first = wait_for_proposal(&mut b.events).await;
    let second = wait_for_proposal(&mut b.events).await;

    let mut surfaced = [first.pairing_topic, second.pairing_topic];
    surfaced.sort_by_key(|t| t.to_hex());
    let mut expected = [topic_one, topic_two];
    expected.sort_by_key(|t| t.to_hex());
    assert_eq!(
        surfaced, expected,
        "both pairings must surface their proposal"
    );
    assert_eq!(first.request_id, 424242);
    assert_eq!(second.request_id, 424242);
    assert_ne!(
        first.id, second.id,
        "each parked proposal must get its own id"
    );

    // A true redelivery (same request id on the same pairing) is absorbed.
    wire.publish(&topic_one, payload_one, PublishOptions::default())
        .await
        .expect("redeliver on first pairing");
    let extra = tokio::time::timeout(Duration::from_millis(500), b.events.recv()).await;
    assert!(extra.is_err(), "a redelivered proposal must not surface again");

    // Both proposals remain independently answerable.
    let session_one = b
        .client
        .approve_session(first.id, sample_namespaces())
        .await
        .expect("approve first proposal");
    let session_two = b
        .client
        .approve_session(second.id, sample_namespaces())
        .await
        .expect("approve second proposal");
    assert_ne!(session_one, session_two);
}

#[tokio::test]
async fn test_propose_on_unknown_pairing_is_not_found() {
    let hub = MemoryHub::new();
    let a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;

    let missing = Topic::from_bytes([3u8; 32]);
    let err = a
        .client
        .propose_session(missing, sample_namespaces())
        .await
        .expect_err("no such pairing");
    assert_eq!(
        err.to_string(),
        format!("No matching pairing with topic: {}", missing)
    );
}

#[tokio::test]
async fn test_propose_with_invalid_namespaces_fails_fast() {
    let hub = MemoryHub::new();
    let a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;

    let err = a
        .client
        .propose_session(Topic::from_bytes([4u8; 32]), pairlink::Namespaces::new())
        .await
        .expect_err("empty namespaces");
    assert!(
        matches!(err, Error::InvalidNamespaces { .. }),
        "validation must run before any lookup, got {:?}",
        err
    );
}

#[tokio::test]
async fn test_session_settles_while_pairing_keeps_living() {
    let hub = MemoryHub::new();
    let mut a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;
    let mut b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;

    let pairing_topic = establish_pairing(&mut a, &mut b).await;
    let session_topic =
        establish_session(&mut a, &mut b, pairing_topic, sample_namespaces()).await;

    // The pairing remains usable for further proposals after settlement.
    a.client.ping(pairing_topic).await.expect("pairing ping");
    a.client.ping(session_topic).await.expect("session ping");

    let second = establish_session(&mut a, &mut b, pairing_topic, sample_namespaces()).await;
    assert_ne!(
        second, session_topic,
        "a fresh key exchange must yield a distinct session topic"
    );
    assert_eq!(
        a.client.session_topics().await,
        vec![session_topic, second],
        "session topics must enumerate in creation order"
    );
}
