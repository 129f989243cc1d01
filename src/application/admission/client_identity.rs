//! Client identity for admission decisions.
//!
//! The direct connection's address is the identity unless the deployment
//! has explicitly declared a trusted intermediary in front of it; only then
//! is the first hop of a forwarded-identity header believed.

use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn resolve_client_key(
    peer_addr: SocketAddr,
    forwarded_for: Option<&str>,
    trust_forwarded_header: bool,
) -> ClientKey {
    if trust_forwarded_header {
        if let Some(header) = forwarded_for {
            if let Some(first_hop) = header.split(',').next() {
                let first_hop = first_hop.trim();
                if !first_hop.is_empty() {
                    return ClientKey::new(first_hop);
                }
            }
        }
    }

    ClientKey::new(peer_addr.ip().to_string())
}
