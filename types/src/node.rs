//! Upstream node endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Role of a configured upstream node. Fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Node 0: reachable over a persistent websocket, supports head subscriptions.
    Primary,
    /// Every other node: request/response over HTTP.
    Secondary,
}

impl NodeRole {
    /// Role for the node at `index` in configuration order.
    pub fn for_index(index: usize) -> Self {
        if index == 0 {
            Self::Primary
        } else {
            Self::Secondary
        }
    }

    /// URL scheme used to reach a node with this role.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Primary => "ws",
            Self::Secondary => "http",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

/// A configured upstream node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub index: usize,
    pub address: String,
    pub port: u16,
    pub role: NodeRole,
}

impl NodeEndpoint {
    /// Build the endpoint for configuration slot `index`.
    pub fn new(index: usize, address: impl Into<String>, port: u16) -> Result<Self, TypesError> {
        let address = address.into().trim().to_string();
        if address.is_empty() {
            return Err(TypesError::InvalidEndpoint(format!(
                "node {index} has an empty address"
            )));
        }
        if port == 0 {
            return Err(TypesError::InvalidEndpoint(format!(
                "node {index} has port 0"
            )));
        }
        Ok(Self {
            index,
            address,
            port,
            role: NodeRole::for_index(index),
        })
    }

    /// Full URL including the role-specific scheme.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.role.scheme(), self.address, self.port)
    }

    pub fn is_primary(&self) -> bool {
        self.role == NodeRole::Primary
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}({})", self.index, self.url())
    }
}
