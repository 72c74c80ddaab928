// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Namespaces: the capability map negotiated at session settlement.
//!
//! Keyed by chain-namespace id (e.g. `eip155`), each entry lists the
//! accounts exposed and the methods/events permitted. Validation here is
//! purely structural: shape, arity, and namespace/account consistency.
//! What a method or event *means* is policy and lives above this crate.
//!
//! Accounts follow the `namespace:reference:address` convention, so
//! `eip155:1:0xab..` belongs to the `eip155` namespace and chain `1`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Ordered account identifiers; order is preserved through settlement.
    pub accounts: Vec<String>,
    pub methods: BTreeSet<String>,
    pub events: BTreeSet<String>,
}

/// Map from chain-namespace id to its capability grant. BTreeMap keeps the
/// wire form deterministic, so both peers persist byte-identical records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Namespaces(pub BTreeMap<String, Namespace>);

impl Namespaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, namespace: Namespace) {
        self.0.insert(id.into(), namespace);
    }

    pub fn get(&self, id: &str) -> Option<&Namespace> {
        self.0.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Structural validation, run before any state mutation or publish.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::InvalidNamespaces {
                reason: "no namespaces given".to_string(),
            });
        }

        for (id, namespace) in &self.0 {
            if id.is_empty() {
                return Err(Error::InvalidNamespaces {
                    reason: "empty namespace id".to_string(),
                });
            }
            for account in &namespace.accounts {
                validate_account(account)?;
                if !account.starts_with(&format!("{}:", id)) {
                    return Err(Error::InvalidNamespaces {
                        reason: format!(
                            "account {} does not belong to namespace {}",
                            account, id
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// The flattened account view kept on the session record: namespace
    /// order, then account order, first occurrence wins.
    pub fn flatten_accounts(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut flattened = Vec::new();
        for namespace in self.0.values() {
            for account in &namespace.accounts {
                if seen.insert(account.clone()) {
                    flattened.push(account.clone());
                }
            }
        }
        flattened
    }
}

/// An account identifier must be exactly three non-empty colon-separated
/// parts: namespace, chain reference, address.
pub fn validate_account(account: &str) -> Result<()> {
    let parts: Vec<&str> = account.split(':').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::InvalidNamespaces {
            reason: format!(
                "malformed account {:?}: expected namespace:reference:address",
                account
            ),
        });
    }
    Ok(())
}

/// Validate a flattened account list, as carried by account updates.
pub fn validate_accounts(accounts: &[String]) -> Result<()> {
    for account in accounts {
        validate_account(account)?;
    }
    Ok(())
}
