//! Session mutations after settlement: accounts, namespaces, and expiry
//! travel to the peer and replace its record wholesale.

use std::collections::BTreeSet;
use std::sync::Arc;

use pairlink::session::Namespace;
use pairlink::storage::MemoryStorage;
use pairlink::{ClientEvent, Error, MemoryHub, Namespaces, SessionUpdate, Topic};

use super::common::{
    establish_pairing, establish_session, fast_config, sample_namespaces, spawn_peer, wait_for,
};

async fn settled_pair() -> (
    super::common::Peer,
    super::common::Peer,
    Topic,
) {
    let hub = MemoryHub::new();
    let mut a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;
    let mut b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;
    let pairing_topic = establish_pairing(&mut a, &mut b).await;
    let session_topic =
        establish_session(&mut a, &mut b, pairing_topic, sample_namespaces()).await;
    (a, b, session_topic)
}

#[tokio::test]
async fn test_update_accounts_reaches_the_peer() {
    let (a, mut b, session_topic) = settled_pair().await;

    let accounts = vec!["eip155:1:0xcc33".to_string()];
    a.client
        .update_accounts(session_topic, accounts.clone())
        .await
        .expect("update_accounts");

    let update = wait_for(&mut b.events, |event| match event {
        ClientEvent::SessionUpdated { topic, update } if topic == session_topic => Some(update),
        _ => None,
    })
    .await;
    match update {
        SessionUpdate::Accounts(received) => assert_eq!(received, accounts),
        other => panic!("expected an accounts update, got {:?}", other),
    }

    let on_a = a.client.get_session(&session_topic).await.unwrap();
    let on_b = b.client.get_session(&session_topic).await.unwrap();
    assert_eq!(on_a.accounts, accounts, "sender record must carry the update");
    assert_eq!(on_b.accounts, accounts, "receiver record must carry the update");
}

#[tokio::test]
async fn test_update_namespaces_rederives_accounts_both_sides() {
    let (mut a, b, session_topic) = settled_pair().await;

    let mut replacement = Namespaces::new();
    replacement.insert(
        "cosmos",
        Namespace {
            accounts: vec!["cosmos:cosmoshub-4:cosmos1abcd".to_string()],
            methods: BTreeSet::from(["cosmos_signDirect".to_string()]),
            events: BTreeSet::new(),
        },
    );

    // The responder can push updates too; direction does not matter.
    b.client
        .update_namespaces(session_topic, replacement.clone())
        .await
        .expect("update_namespaces");

    wait_for(&mut a.events, |event| match event {
        ClientEvent::SessionUpdated { topic, .. } if topic == session_topic => Some(()),
        _ => None,
    })
    .await;

    let expected_accounts = replacement.flatten_accounts();
    let on_a = a.client.get_session(&session_topic).await.unwrap();
    let on_b = b.client.get_session(&session_topic).await.unwrap();
    assert_eq!(on_a.namespaces, replacement);
    assert_eq!(on_b.namespaces, replacement);
    assert_eq!(
        on_a.accounts, expected_accounts,
        "receiver must re-derive accounts from the new namespaces"
    );
    assert_eq!(
        on_b.accounts, expected_accounts,
        "sender must re-derive accounts from the new namespaces"
    );
}

#[tokio::test]
async fn test_update_expiry_binds_both_records() {
    let (a, mut b, session_topic) = settled_pair().await;

    let before = a.client.get_session(&session_topic).await.unwrap().expiry;
    let target = before - 3600;
    a.client
        .update_expiry(session_topic, target)
        .await
        .expect("update_expiry");

    wait_for(&mut b.events, |event| match event {
        ClientEvent::SessionUpdated { topic, .. } if topic == session_topic => Some(()),
        _ => None,
    })
    .await;

    assert_eq!(a.client.get_session(&session_topic).await.unwrap().expiry, target);
    assert_eq!(b.client.get_session(&session_topic).await.unwrap().expiry, target);
}

#[tokio::test]
async fn test_update_expiry_rejects_out_of_bounds_values() {
    let (a, _b, session_topic) = settled_pair().await;
    let now = pairlink::time::now_secs();

    let err = a
        .client
        .update_expiry(session_topic, now.saturating_sub(60))
        .await
        .expect_err("past expiry");
    assert!(matches!(err, Error::InvalidRequest { .. }));

    let err = a
        .client
        .update_expiry(session_topic, now + 365 * 24 * 3600)
        .await
        .expect_err("expiry beyond the session lifetime cap");
    assert!(matches!(err, Error::InvalidRequest { .. }));
}

#[tokio::test]
async fn test_update_on_unknown_session_is_not_found() {
    let hub = MemoryHub::new();
    let a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;

    let missing = Topic::from_bytes([5u8; 32]);
    let err = a
        .client
        .update_accounts(missing, vec!["eip155:1:0xdd44".to_string()])
        .await
        .expect_err("no such session");
    assert_eq!(
        err.to_string(),
        format!("No matching session with topic: {}", missing)
    );
}

#[tokio::test]
async fn test_busy_session_topic_does_not_stall_other_topics() {
    let hub = MemoryHub::new();
    let mut a = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("alice")).await;
    let mut b = spawn_peer(&hub, Arc::new(MemoryStorage::new()), fast_config("bob")).await;
    let pairing_topic = establish_pairing(&mut a, &mut b).await;
    let session_topic =
        establish_session(&mut a, &mut b, pairing_topic, sample_namespaces()).await;

    // Crossing updates: each side holds its own session lock while it
    // waits for the peer, for up to the full request timeout.
    let a_update = {
        let client = a.client.clone();
        tokio::spawn(async move {
            client
                .update_accounts(session_topic, vec!["eip155:1:0xaaaa".to_string()])
                .await
        })
    };
    let b_update = {
        let client = b.client.clone();
        tokio::spawn(async move {
            client
                .update_accounts(session_topic, vec!["eip155:1:0xbbbb".to_string()])
                .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    // The pairing topic must stay responsive in the meantime.
    tokio::time::timeout(
        std::time::Duration::from_millis(1000),
        a.client.ping(pairing_topic),
    )
    .await
    .expect("ping must not queue behind the busy session topic")
    .expect("pairing ping");

    a_update.await.expect("proposer task").expect("update_accounts");
    b_update.await.expect("responder task").expect("update_accounts");
}

#[tokio::test]
async fn test_malformed_accounts_fail_before_touching_the_peer() {
    let (a, b, session_topic) = settled_pair().await;

    let err = a
        .client
        .update_accounts(session_topic, vec!["not-an-account".to_string()])
        .await
        .expect_err("malformed account id");
    assert!(matches!(err, Error::InvalidNamespaces { .. }));

    // Neither side's record moved.
    let expected = sample_namespaces().flatten_accounts();
    assert_eq!(a.client.get_session(&session_topic).await.unwrap().accounts, expected);
    assert_eq!(b.client.get_session(&session_topic).await.unwrap().accounts, expected);
}
