use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Nodes that have not answered a poll for this long are dropped.
pub const NODE_TIMEOUT: Duration = Duration::from_secs(12);

/// A receiving node discovered through ArtPollReply.
#[derive(Clone, Debug, Serialize)]
pub struct ArtNetNode {
    pub address: Ipv4Addr,
    pub short_name: String,
    pub long_name: String,
    #[serde(skip)]
    pub last_poll_reply: Instant,
}

impl ArtNetNode {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_poll_reply) > NODE_TIMEOUT
    }
}

/// Discovered nodes in order of first appearance, one entry per address.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<ArtNetNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a poll reply from `address`. Returns true for a new node.
    pub fn refresh(
        &mut self,
        address: Ipv4Addr,
        short_name: &str,
        long_name: &str,
        now: Instant,
    ) -> bool {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.address == address) {
            node.last_poll_reply = now;
            node.short_name = short_name.to_string();
            node.long_name = long_name.to_string();
            return false;
        }
        self.nodes.push(ArtNetNode {
            address,
            short_name: short_name.to_string(),
            long_name: long_name.to_string(),
            last_poll_reply: now,
        });
        true
    }

    /// Removes expired nodes and returns their addresses.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<Ipv4Addr> {
        let mut expired = Vec::new();
        self.nodes.retain(|node| {
            if node.is_expired(now) {
                expired.push(node.address);
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn targets(&self) -> Vec<Ipv4Addr> {
        self.nodes.iter().map(|n| n.address).collect()
    }

    pub fn nodes(&self) -> &[ArtNetNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
