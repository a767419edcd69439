use crate::errors::PeeringError;
use crate::identity::{PublicKey, TransportIdentity};
use crate::peer::{MaintenanceAction, Peer, PeerContext, PeerStatus};
use crate::transport::resolve_peering_url;
use crate::trust::TrustedPeer;
use log::*;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Live [`Peer`] entries, keyed by the transport identity derived from each peer's public key.
///
/// An entry exists for every trusted peer, and for distrusted peers until they are unused and idle. The local node
/// never has an entry.
pub(crate) struct PeerTable {
    ctx: PeerContext,
    peers: RwLock<HashMap<TransportIdentity, Arc<Peer>>>,
}

impl PeerTable {
    pub fn new(ctx: PeerContext) -> Self {
        Self { ctx, peers: RwLock::new(HashMap::new()) }
    }

    /// Creates the entry for `trusted`, or refreshes its URL and trust flag if it already exists. The URL is
    /// resolved before the table is touched, so a bad URL leaves everything as it was.
    pub fn add_or_update(&self, trusted: &TrustedPeer) -> Result<Arc<Peer>, PeeringError> {
        let addrs = resolve_peering_url(&trusted.peering_url)?;
        let id = trusted.pub_key.transport_identity();
        self.ctx.transport.set_peer_addresses(&id, addrs);
        let mut peers = self.peers.write();
        if let Some(peer) = peers.get(&id) {
            peer.set_peering_url(&trusted.peering_url);
            peer.set_trust(true);
            return Ok(peer.clone());
        }
        let peer =
            Peer::spawn(trusted.name.clone(), trusted.peering_url.clone(), trusted.pub_key.clone(), self.ctx.clone());
        info!("Added peer {peer}");
        peers.insert(id, peer.clone());
        Ok(peer)
    }

    /// Marks the entry for `pub_key` as untrusted. The entry stays until maintenance removes it.
    pub fn distrust(&self, pub_key: &PublicKey) -> bool {
        match self.peers.read().get(&pub_key.transport_identity()) {
            Some(peer) => {
                peer.set_trust(false);
                true
            }
            None => false,
        }
    }

    /// Returns the entry for `pub_key` with one more user registered on it. The caller must release it.
    pub fn lookup_or_use(&self, pub_key: &PublicKey) -> Option<Arc<Peer>> {
        let peers = self.peers.read();
        let peer = peers.get(&pub_key.transport_identity())?;
        peer.use_peer();
        Some(peer.clone())
    }

    pub fn get(&self, id: &TransportIdentity) -> Option<Arc<Peer>> {
        self.peers.read().get(id).cloned()
    }

    /// Removes and closes `peer` if it is still the table's entry and still eligible for removal.
    pub fn remove_if_idle(&self, peer: &Arc<Peer>) -> bool {
        let mut peers = self.peers.write();
        let id = peer.transport_identity();
        let current = match peers.get(id) {
            Some(current) if Arc::ptr_eq(current, peer) => current,
            _ => return false,
        };
        if current.maintenance_action(Instant::now()) != MaintenanceAction::Remove {
            return false;
        }
        peers.remove(id);
        drop(peers);
        self.ctx.transport.clear_peer_addresses(id);
        peer.close();
        info!("Removed idle untrusted peer {peer}");
        true
    }

    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.read().values().cloned().collect()
    }

    pub fn statuses(&self) -> Vec<PeerStatus> {
        let mut statuses: Vec<PeerStatus> = self.snapshot().iter().map(|p| p.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn close_all(&self) {
        let peers: Vec<Arc<Peer>> = self.peers.write().drain().map(|(_, peer)| peer).collect();
        for peer in peers {
            self.ctx.transport.clear_peer_addresses(peer.transport_identity());
            peer.close();
        }
    }
}
