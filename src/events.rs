// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Events surfaced to the embedding application: inbound proposals that
//! need a decision, lifecycle transitions triggered by the peer, and the
//! non-fatal warning channel for notify failures.

use crate::session::{Namespaces, SessionProposal};
use crate::topics::Topic;

#[derive(Debug, Clone)]
pub enum SessionUpdate {
    Accounts(Vec<String>),
    Namespaces(Namespaces),
    Expiry(u64),
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A peer proposed a session over one of our pairings. The application
    /// must answer with `approve_session` or `reject_session`.
    SessionProposed { proposal: SessionProposal },

    /// The pairing handshake acknowledged; the channel is live.
    PairingActivated { topic: Topic },

    /// The peer deleted the pairing, or the expiry sweep collected it.
    PairingDeleted {
        topic: Topic,
        code: i64,
        message: String,
    },

    /// A session settled and is ready for traffic.
    SessionSettled { topic: Topic },

    /// The peer pushed an update; our record already reflects it.
    SessionUpdated { topic: Topic, update: SessionUpdate },

    /// The peer deleted the session, or the expiry sweep collected it.
    SessionDeleted {
        topic: Topic,
        code: i64,
        message: String,
    },

    /// Local state committed but the peer notification round-trip failed.
    /// Local state stays authoritative; the peer converges on its next
    /// exchange. Surfaced so applications can show degraded-sync status.
    NotifyFailed {
        topic: Topic,
        method: String,
        reason: String,
    },
}
