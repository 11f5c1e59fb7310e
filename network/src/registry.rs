use crate::protocol::NodeId;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub address: SocketAddr,
    pub prepared: bool,
}

/// Nodes learned from inbound traffic. Cloning yields another handle onto the
/// same table.
#[derive(Clone)]
pub struct NodeRegistry {
    node_port: u16,
    nodes: Arc<Mutex<BTreeMap<NodeId, Node>>>,
}

impl NodeRegistry {
    pub fn new(node_port: u16) -> Self {
        Self {
            node_port,
            nodes: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<NodeId, Node>> {
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn lookup_or_register(&self, id: NodeId, address: IpAddr) -> Node {
        let address = SocketAddr::new(address, self.node_port);
        let mut nodes = self.lock();
        let node = nodes.entry(id).or_insert_with(|| {
            info!("Found new node {id} @ {}", address.ip());
            Node {
                id,
                address,
                prepared: false,
            }
        });
        if node.address != address {
            warn!("Node {id} has a new address {}", address.ip());
            node.address = address;
        }
        node.clone()
    }

    pub fn get(&self, id: NodeId) -> Option<Node> {
        self.lock().get(&id).cloned()
    }

    pub fn all_known(&self) -> Vec<Node> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// True iff every known node acknowledged its PREPARE. Vacuously true
    /// while no node is known.
    pub fn all_prepared(&self) -> bool {
        self.lock().values().all(|node| node.prepared)
    }

    pub fn mark_prepared(&self, id: NodeId) -> bool {
        match self.lock().get_mut(&id) {
            Some(node) => {
                node.prepared = true;
                true
            }
            None => false,
        }
    }

    /// Clears the readiness of a node that is about to receive a new PREPARE.
    pub fn rearm(&self, id: NodeId) -> Option<Node> {
        let mut nodes = self.lock();
        let node = nodes.get_mut(&id)?;
        node.prepared = false;
        Some(node.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const PORT: u16 = 1225;

    fn id(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn registering_twice_is_idempotent() {
        let registry = NodeRegistry::new(PORT);
        let first = registry.lookup_or_register(id(1), ip(10));
        let second = registry.lookup_or_register(id(1), ip(10));

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(first.address, SocketAddr::new(ip(10), PORT));
    }

    #[test]
    fn relearns_address_and_keeps_readiness() {
        let registry = NodeRegistry::new(PORT);
        registry.lookup_or_register(id(2), ip(10));
        assert!(registry.mark_prepared(id(2)));

        let moved = registry.lookup_or_register(id(2), ip(11));
        assert_eq!(moved.address, SocketAddr::new(ip(11), PORT));
        assert!(moved.prepared);
        assert_eq!(registry.get(id(2)), Some(moved));
    }

    #[test]
    fn readiness_is_vacuous_without_nodes() {
        let registry = NodeRegistry::new(PORT);
        assert!(registry.is_empty());
        assert!(registry.all_prepared());
    }

    #[test]
    fn readiness_needs_every_node() {
        let registry = NodeRegistry::new(PORT);
        registry.lookup_or_register(id(1), ip(10));
        registry.lookup_or_register(id(2), ip(11));
        registry.mark_prepared(id(1));
        assert!(!registry.all_prepared());

        registry.mark_prepared(id(2));
        assert!(registry.all_prepared());

        let rearmed = registry.rearm(id(2)).unwrap();
        assert!(!rearmed.prepared);
        assert!(!registry.all_prepared());
    }

    #[test]
    fn unknown_nodes_are_not_touched() {
        let registry = NodeRegistry::new(PORT);
        assert!(!registry.mark_prepared(id(7)));
        assert_eq!(registry.rearm(id(7)), None);
        assert_eq!(registry.get(id(7)), None);
    }

    #[test]
    fn all_known_is_ordered_by_id() {
        let registry = NodeRegistry::new(PORT);
        registry.lookup_or_register(id(3), ip(13));
        registry.lookup_or_register(id(1), ip(11));
        let ids: Vec<u8> = registry.all_known().iter().map(|node| node.id.get()).collect();
        assert_eq!(ids, vec![1, 3]);
    }
}
