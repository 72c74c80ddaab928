// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! JSON-RPC 2.0 framing for protocol traffic. Every payload crossing the
//! relay is one [`RpcRequest`] or [`RpcResponse`], sealed inside an
//! envelope; correlation is by request id within a topic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::time::unix_micros;

pub mod correlator;

pub use correlator::{Correlator, InboundRequest};

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol method names.
pub mod methods {
    pub const PAIRING_APPROVE: &str = "pairing_approve";
    pub const PAIRING_PING: &str = "pairing_ping";
    pub const PAIRING_DELETE: &str = "pairing_delete";
    pub const SESSION_PROPOSE: &str = "session_propose";
    pub const SESSION_SETTLE: &str = "session_settle";
    pub const SESSION_PING: &str = "session_ping";
    pub const SESSION_DELETE: &str = "session_delete";
    pub const SESSION_UPDATE_ACCOUNTS: &str = "session_update_accounts";
    pub const SESSION_UPDATE_NAMESPACES: &str = "session_update_namespaces";
    pub const SESSION_UPDATE_EXPIRY: &str = "session_update_expiry";
}

/// Reason codes carried in JSON-RPC error objects and delete notifications.
pub mod codes {
    /// Request body failed structural validation on the receiving side.
    pub const MALFORMED_REQUEST: i64 = 3000;
    /// Responder declined a session proposal.
    pub const PROPOSAL_REJECTED: i64 = 5000;
    /// Peer disconnected the pairing or session deliberately.
    pub const USER_DISCONNECTED: i64 = 6000;
    /// Receiver has no live record for the topic (deleted or expired).
    pub const NO_MATCHING_TOPIC: i64 = 6002;
    /// Record collected by the expiry sweep.
    pub const EXPIRED: i64 = 6003;
    /// Standard JSON-RPC unknown-method code.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Standard JSON-RPC internal-error code. Details stay in local logs.
    pub const INTERNAL: i64 = -32603;
}

/// Either half of a JSON-RPC exchange, as decrypted off the wire.
///
/// Requests are tried first: they are the only shape carrying `method`, so
/// a response (which lacks it) can never be mistaken for one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcPayload {
    Request(RpcRequest),
    Response(RpcResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Body of `pairing_delete` and `session_delete` notifications: the reason
/// the sender tore the record down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteParams {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("method not found: {}", method),
        )
    }

    pub fn no_matching_topic(topic: &crate::topics::Topic) -> Self {
        Self::new(
            codes::NO_MATCHING_TOPIC,
            format!("No matching pairing or session with topic: {}", topic),
        )
    }

    pub fn malformed_request(reason: impl Into<String>) -> Self {
        Self::new(codes::MALFORMED_REQUEST, reason)
    }

    /// Opaque failure answer. The real cause is logged locally, never sent.
    pub fn internal() -> Self {
        Self::new(codes::INTERNAL, "internal error")
    }
}

/// Request ids, unique for the life of the process and monotonic.
///
/// Seeded from the microsecond clock so ids minted after a restart cannot
/// collide with responses still in flight from the previous lifetime.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(unix_micros()),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
