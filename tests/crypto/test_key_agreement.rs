//! Key agreement as the session handshake uses it: each side derives the
//! shared key from its own secret and the peer's public key, and both
//! must land on the same key and the same derived topic.

use pairlink::crypto::{KeyPair, PublicKey, SymmetricKey};
use pairlink::Topic;

#[test]
fn test_both_sides_derive_the_same_key_and_topic() {
    let proposer = KeyPair::generate();
    let responder = KeyPair::generate();

    let on_proposer = proposer
        .derive_shared_key(responder.public_key())
        .expect("proposer derivation");
    let on_responder = responder
        .derive_shared_key(proposer.public_key())
        .expect("responder derivation");

    assert_eq!(
        on_proposer, on_responder,
        "ECDH must commute across the two key pairs"
    );
    assert_eq!(
        Topic::from_key(&on_proposer),
        Topic::from_key(&on_responder),
        "a shared key must pin down one session topic"
    );
}

#[test]
fn test_different_peers_yield_different_keys() {
    let us = KeyPair::generate();
    let peer_one = KeyPair::generate();
    let peer_two = KeyPair::generate();

    let with_one = us.derive_shared_key(peer_one.public_key()).unwrap();
    let with_two = us.derive_shared_key(peer_two.public_key()).unwrap();
    assert_ne!(
        with_one, with_two,
        "distinct peers must never share a session key"
    );
}

#[test]
fn test_key_pair_survives_persistence() {
    let original = KeyPair::generate();
    let peer = KeyPair::generate();
    let before = original.derive_shared_key(peer.public_key()).unwrap();

    // Round-trip through the storage encoding, the way session records do.
    let json = serde_json::to_string(&original).expect("serialize");
    let restored: KeyPair = serde_json::from_str(&json).expect("deserialize");

    let after = restored.derive_shared_key(peer.public_key()).unwrap();
    assert_eq!(
        before, after,
        "a restored key pair must reach the same shared key"
    );
    assert_eq!(restored.public_key(), original.public_key());
}

#[test]
fn test_public_key_rejects_non_curve_points() {
    // Right length, wrong content: not a point on the curve.
    let junk = format!("02{}", "00".repeat(32));
    assert!(
        PublicKey::from_hex(&junk).is_err(),
        "an off-curve encoding must not produce a public key"
    );

    let valid = KeyPair::generate().public_key().to_hex();
    assert!(PublicKey::from_hex(&valid).is_ok());
}

#[test]
fn test_symmetric_key_hex_round_trip() {
    let key = SymmetricKey::generate();
    let restored = SymmetricKey::from_hex(&key.to_hex()).expect("hex round trip");
    assert_eq!(restored, key);

    assert!(SymmetricKey::from_hex("abc").is_err(), "truncated hex");
    assert!(
        SymmetricKey::from_hex(&"zz".repeat(32)).is_err(),
        "non-hex characters"
    );
}
