use crate::dispatcher::{EventDispatcher, RecvCallback};
use crate::errors::PeeringError;
use crate::identity::PublicKey;
use crate::listeners::CancelHandle;
use crate::message_types::{PeerMessageData, PeerMessageIn, PeeringId};
use crate::sender::PeerSender;
use futures::future::join_all;
use log::*;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Permutation {
    order: Vec<PublicKey>,
    next: usize,
}

/// A set of remote nodes addressed by public key, for point-to-point messaging. The local node is never part of a
/// domain.
pub struct PeerDomain {
    peering_id: PeeringId,
    nodes: BTreeMap<PublicKey, PeerSender>,
    permutation: Mutex<Permutation>,
    dispatcher: Arc<EventDispatcher>,
    released: AtomicBool,
}

impl PeerDomain {
    pub(crate) fn new(peering_id: PeeringId, nodes: Vec<PeerSender>, dispatcher: Arc<EventDispatcher>) -> Self {
        let mut map = BTreeMap::new();
        for node in nodes {
            let key = node.pub_key().clone();
            // The same key listed twice holds two references; keep one.
            if let Some(duplicate) = map.insert(key, node) {
                duplicate.release();
            }
        }
        let mut order: Vec<PublicKey> = map.keys().cloned().collect();
        order.shuffle(&mut rand::rng());
        Self {
            peering_id,
            nodes: map,
            permutation: Mutex::new(Permutation { order, next: 0 }),
            dispatcher,
            released: AtomicBool::new(false),
        }
    }

    pub fn peering_id(&self) -> PeeringId {
        self.peering_id
    }

    pub fn peers(&self) -> Vec<PublicKey> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub async fn send_msg_by_pub_key(
        &self,
        pub_key: &PublicKey,
        receiver: u8,
        msg_type: u8,
        data: Vec<u8>,
    ) -> Result<(), PeeringError> {
        let node = self.nodes.get(pub_key).ok_or_else(|| PeeringError::PeerNotTrusted(pub_key.clone()))?;
        node.send_msg(PeerMessageData::new(self.peering_id, receiver, msg_type, data)).await;
        Ok(())
    }

    /// Sends the message to up to `up_to` peers, walking the current random permutation where the previous call left
    /// off. Returns the keys of the peers it was sent to.
    pub async fn send_msg_to_random_peers(
        &self,
        up_to: u16,
        receiver: u8,
        msg_type: u8,
        data: &[u8],
    ) -> Vec<PublicKey> {
        let targets = self.next_targets(usize::from(up_to));
        let sends = targets
            .iter()
            .filter_map(|pub_key| self.nodes.get(pub_key))
            .map(|node| node.send_msg(PeerMessageData::new(self.peering_id, receiver, msg_type, data.to_vec())));
        join_all(sends).await;
        targets
    }

    fn next_targets(&self, up_to: usize) -> Vec<PublicKey> {
        let mut perm = self.permutation.lock();
        let count = up_to.min(perm.order.len());
        let mut targets = Vec::with_capacity(count);
        for _ in 0..count {
            let i = perm.next % perm.order.len();
            targets.push(perm.order[i].clone());
            perm.next = (i + 1) % perm.order.len();
        }
        targets
    }

    /// Draws a fresh random permutation.
    pub fn reshuffle_peers(&self) {
        let mut perm = self.permutation.lock();
        perm.order.shuffle(&mut rand::rng());
        perm.next = 0;
    }

    /// Draws a permutation determined by `seed`, so that nodes sharing the seed agree on the order.
    pub fn reshuffle_peers_with_seed(&self, seed: [u8; 32]) {
        let mut perm = self.permutation.lock();
        perm.order = self.nodes.keys().cloned().collect();
        perm.order.shuffle(&mut StdRng::from_seed(seed));
        perm.next = 0;
    }

    /// Attaches `callback` to this domain's peering id. Messages from nodes outside the domain are ignored.
    pub fn attach(&self, receiver: u8, callback: RecvCallback) -> CancelHandle {
        let members: Vec<PublicKey> = self.peers();
        let filtered: RecvCallback = Arc::new(move |msg: &PeerMessageIn| {
            if members.contains(&msg.sender_pub_key) {
                callback(msg);
            } else {
                debug!("Ignoring message from {}: not a member of the domain", msg.sender_pub_key);
            }
        });
        self.dispatcher.attach(self.peering_id, receiver, filtered)
    }

    /// Gives back the references held on every peer. Only the first call has an effect.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.nodes.values().for_each(PeerSender::release);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::identity::NodeIdentity;
    use crate::sender::LocalPeer;

    fn local(name: &str) -> PeerSender {
        let pub_key = NodeIdentity::random_with_name(name).public_key().unwrap();
        PeerSender::Local(LocalPeer::new(name.into(), pub_key, "127.0.0.1:1".into(), Arc::new(EventDispatcher::new())))
    }

    fn domain(n: usize) -> PeerDomain {
        let nodes = (0..n).map(|i| local(&format!("n{i}"))).collect();
        PeerDomain::new(PeeringId::random(), nodes, Arc::new(EventDispatcher::new()))
    }

    #[test]
    fn random_targets_cycle_through_everyone() {
        let domain = domain(5);
        let first = domain.next_targets(3);
        let second = domain.next_targets(3);
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 3);
        let mut seen: Vec<PublicKey> = first.iter().chain(second.iter().take(2)).cloned().collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
        assert_eq!(domain.next_targets(10).len(), 5);
    }

    #[test]
    fn seeded_reshuffle_is_deterministic() {
        let domain = domain(8);
        domain.reshuffle_peers_with_seed([7; 32]);
        let a = domain.next_targets(8);
        domain.reshuffle_peers();
        domain.reshuffle_peers_with_seed([7; 32]);
        assert_eq!(a, domain.next_targets(8));
    }

    #[test]
    fn empty_domain_has_no_targets() {
        let domain = domain(0);
        assert!(domain.is_empty());
        assert!(domain.next_targets(3).is_empty());
    }
}
