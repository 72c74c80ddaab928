// Copyright (c) 2026 Pairlink
// SPDX-License-Identifier: BUSL-1.1
//! Connection URIs: the out-of-band string a proposer hands a responder to
//! bootstrap a pairing.
//!
//! Shape: `pairlink:{topic}@{version}?symKey={hex}&relay-protocol={id}`
//! with an optional `relay-endpoint` override. The URI carries the raw
//! symmetric key, so it is a bearer secret: whoever sees it can join the
//! pairing. It is meant for QR codes and deep links, never for logs.

use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::crypto::SymmetricKey;
use crate::error::{Error, Result};
use crate::topics::Topic;

pub const URI_SCHEME: &str = "pairlink";
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    pub topic: Topic,
    pub version: u32,
    pub sym_key: SymmetricKey,
    pub relay_protocol: String,
    pub relay_endpoint: Option<String>,
}

impl PairingUri {
    pub fn new(topic: Topic, sym_key: SymmetricKey, relay_protocol: impl Into<String>) -> Self {
        Self {
            topic,
            version: PROTOCOL_VERSION,
            sym_key,
            relay_protocol: relay_protocol.into(),
            relay_endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.relay_endpoint = Some(endpoint.into());
        self
    }

    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| Error::InvalidUri {
            reason: format!("parse error: {}", e),
        })?;

        if url.scheme() != URI_SCHEME {
            return Err(Error::InvalidUri {
                reason: format!("unsupported scheme: {}", url.scheme()),
            });
        }

        let (topic_part, version_part) =
            url.path().split_once('@').ok_or_else(|| Error::InvalidUri {
                reason: "missing @version suffix".to_string(),
            })?;

        let topic = Topic::from_hex(topic_part).map_err(|e| Error::InvalidUri {
            reason: format!("bad topic: {}", e),
        })?;

        let version: u32 = version_part.parse().map_err(|_| Error::InvalidUri {
            reason: format!("bad version: {}", version_part),
        })?;
        if version != PROTOCOL_VERSION {
            return Err(Error::InvalidUri {
                reason: format!("unsupported protocol version: {}", version),
            });
        }

        let mut sym_key = None;
        let mut relay_protocol = None;
        let mut relay_endpoint = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "symKey" => {
                    sym_key = Some(SymmetricKey::from_hex(&value).map_err(|e| {
                        Error::InvalidUri {
                            reason: format!("bad symKey: {}", e),
                        }
                    })?);
                }
                "relay-protocol" => relay_protocol = Some(value.into_owned()),
                "relay-endpoint" => relay_endpoint = Some(value.into_owned()),
                // Unknown parameters are ignored for forward compatibility.
                _ => {}
            }
        }

        Ok(Self {
            topic,
            version,
            sym_key: sym_key.ok_or_else(|| Error::InvalidUri {
                reason: "missing symKey parameter".to_string(),
            })?,
            relay_protocol: relay_protocol.ok_or_else(|| Error::InvalidUri {
                reason: "missing relay-protocol parameter".to_string(),
            })?,
            relay_endpoint,
        })
    }
}

impl fmt::Display for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("symKey", &self.sym_key.to_hex());
        query.append_pair("relay-protocol", &self.relay_protocol);
        if let Some(endpoint) = &self.relay_endpoint {
            query.append_pair("relay-endpoint", endpoint);
        }
        write!(
            f,
            "{}:{}@{}?{}",
            URI_SCHEME,
            self.topic,
            self.version,
            query.finish()
        )
    }
}

impl FromStr for PairingUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PairingUri::parse(s)
    }
}
