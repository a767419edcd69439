//! An in-process [`Transport`], connecting nodes with `tokio` duplex pipes.
//!
//! Every node joins a shared [`MemoryNetwork`]. Dialing a node hands one end of a fresh pipe to the remote protocol
//! handler, tagged with the dialer's identity, and returns the other end. Identities are trusted as given, so this
//! is meant for tests and local simulations, not for untrusted networks.

use crate::errors::TransportError;
use crate::identity::TransportIdentity;
use crate::transport::{BoxedStream, StreamHandler, Transport};
use async_trait::async_trait;
use libp2p::{Multiaddr, StreamProtocol};
use log::*;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct MemoryNode {
    handlers: RwLock<HashMap<StreamProtocol, StreamHandler>>,
    online: AtomicBool,
}

#[derive(Clone)]
pub struct MemoryNetwork {
    nodes: Arc<RwLock<HashMap<TransportIdentity, Arc<MemoryNode>>>>,
    buffer: usize,
}

impl MemoryNetwork {
    /// `buffer` is the capacity, in bytes, of each direction of every pipe.
    pub fn new(buffer: usize) -> Self {
        Self { nodes: Arc::new(RwLock::new(HashMap::new())), buffer }
    }

    /// Joins the network as `id`. Joining twice with the same identity replaces the previous node.
    pub fn transport(&self, id: TransportIdentity) -> Arc<MemoryTransport> {
        let node = Arc::new(MemoryNode { handlers: RwLock::new(HashMap::new()), online: AtomicBool::new(true) });
        self.nodes.write().insert(id, node.clone());
        Arc::new(MemoryTransport { id, network: self.clone(), node, address_book: RwLock::new(HashMap::new()) })
    }

    /// Takes a node off the network (or brings it back). An offline node can neither dial nor be dialed; streams
    /// that are already open are unaffected.
    pub fn set_online(&self, id: &TransportIdentity, online: bool) {
        if let Some(node) = self.nodes.read().get(id) {
            node.online.store(online, Ordering::SeqCst);
        }
    }

    fn node(&self, id: &TransportIdentity) -> Option<Arc<MemoryNode>> {
        self.nodes.read().get(id).cloned()
    }
}

pub struct MemoryTransport {
    id: TransportIdentity,
    network: MemoryNetwork,
    node: Arc<MemoryNode>,
    address_book: RwLock<HashMap<TransportIdentity, Vec<Multiaddr>>>,
}

impl MemoryTransport {
    pub fn peer_addresses(&self, peer: &TransportIdentity) -> Vec<Multiaddr> {
        self.address_book.read().get(peer).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_identity(&self) -> TransportIdentity {
        self.id
    }

    fn set_peer_addresses(&self, peer: &TransportIdentity, addrs: Vec<Multiaddr>) {
        self.address_book.write().insert(*peer, addrs);
    }

    fn clear_peer_addresses(&self, peer: &TransportIdentity) {
        self.address_book.write().remove(peer);
    }

    async fn dial(&self, peer: &TransportIdentity, protocol: StreamProtocol) -> Result<BoxedStream, TransportError> {
        if !self.node.online.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.address_book.read().get(peer).map_or(true, |addrs| addrs.is_empty()) {
            return Err(TransportError::NoAddresses(*peer));
        }
        let remote = self.network.node(peer).ok_or(TransportError::Unreachable(*peer))?;
        if !remote.online.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable(*peer));
        }
        let handler = remote
            .handlers
            .read()
            .get(&protocol)
            .cloned()
            .ok_or_else(|| TransportError::ProtocolNotSupported { peer: *peer, protocol: protocol.to_string() })?;
        let (local_end, remote_end) = tokio::io::duplex(self.network.buffer);
        trace!("{} opened a {protocol} stream to {peer}", self.id);
        handler(self.id, Box::new(remote_end));
        Ok(Box::new(local_end))
    }

    fn register_protocol_handler(&self, protocol: StreamProtocol, handler: StreamHandler) {
        self.node.handlers.write().insert(protocol, handler);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::{read_frame, write_frame};
    use crate::identity::NodeIdentity;
    use crate::transport::PEERING_PROTOCOL;
    use tokio::sync::mpsc;

    fn identity() -> TransportIdentity {
        NodeIdentity::random_with_name("n").public_key().unwrap().transport_identity()
    }

    #[tokio::test]
    async fn dial_reaches_registered_handler() {
        let network = MemoryNetwork::new(1024);
        let (a_id, b_id) = (identity(), identity());
        let a = network.transport(a_id);
        let b = network.transport(b_id);
        let (tx, mut rx) = mpsc::unbounded_channel();
        b.register_protocol_handler(
            PEERING_PROTOCOL,
            Arc::new(move |from: TransportIdentity, mut stream: BoxedStream| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let frame = read_frame(&mut stream, 1024).await.unwrap().unwrap();
                    tx.send((from, frame)).unwrap();
                });
            }),
        );
        assert!(matches!(a.dial(&b_id, PEERING_PROTOCOL).await, Err(TransportError::NoAddresses(_))));
        a.set_peer_addresses(&b_id, vec!["/memory/1".parse().unwrap()]);
        let mut stream = a.dial(&b_id, PEERING_PROTOCOL).await.unwrap();
        write_frame(&mut stream, b"hi").await.unwrap();
        let (from, frame) = rx.recv().await.unwrap();
        assert_eq!(from, a_id);
        assert_eq!(frame, b"hi");
    }

    #[tokio::test]
    async fn offline_and_unsupported() {
        let network = MemoryNetwork::new(1024);
        let (a_id, b_id) = (identity(), identity());
        let a = network.transport(a_id);
        let _b = network.transport(b_id);
        a.set_peer_addresses(&b_id, vec!["/memory/2".parse().unwrap()]);
        assert!(matches!(
            a.dial(&b_id, PEERING_PROTOCOL).await,
            Err(TransportError::ProtocolNotSupported { .. })
        ));
        network.set_online(&b_id, false);
        assert!(matches!(a.dial(&b_id, PEERING_PROTOCOL).await, Err(TransportError::Unreachable(_))));
    }
}
