use crate::dispatcher::{EventDispatcher, RecvCallback};
use crate::errors::PeeringError;
use crate::identity::PublicKey;
use crate::listeners::CancelHandle;
use crate::message_types::{PeerMessageData, PeerMessageIn, PeeringId};
use crate::sender::PeerSender;
use futures::future::join_all;
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A fixed, indexed set of nodes sharing one peering id, the local node among them. Used for quorum style fan-out;
/// collecting replies is left to the caller.
pub struct PeerGroup {
    peering_id: PeeringId,
    nodes: Vec<PeerSender>,
    self_index: u16,
    dispatcher: Arc<EventDispatcher>,
    released: AtomicBool,
}

impl PeerGroup {
    /// Takes ownership of one reference on each remote node. On error, those references are given back.
    pub(crate) fn new(
        peering_id: PeeringId,
        nodes: Vec<PeerSender>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Result<Self, PeeringError> {
        let release_all = |nodes: &[PeerSender]| nodes.iter().for_each(PeerSender::release);
        if nodes.len() > usize::from(u16::MAX) + 1 {
            release_all(&nodes[..]);
            return Err(PeeringError::IndexOutOfRange(u16::MAX));
        }
        let Some(self_index) = nodes.iter().position(PeerSender::is_self) else {
            release_all(&nodes[..]);
            return Err(PeeringError::SelfNotInGroup);
        };
        let self_index = self_index as u16;
        Ok(Self { peering_id, nodes, self_index, dispatcher, released: AtomicBool::new(false) })
    }

    pub fn peering_id(&self) -> PeeringId {
        self.peering_id
    }

    pub fn self_index(&self) -> u16 {
        self.self_index
    }

    pub fn peer_index(&self, pub_key: &PublicKey) -> Option<u16> {
        self.nodes.iter().position(|n| n.pub_key() == pub_key).map(|i| i as u16)
    }

    pub fn node(&self, index: u16) -> Result<&PeerSender, PeeringError> {
        self.nodes.get(usize::from(index)).ok_or(PeeringError::IndexOutOfRange(index))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn all_nodes(&self) -> Vec<(u16, &PeerSender)> {
        self.nodes.iter().enumerate().map(|(i, n)| (i as u16, n)).collect()
    }

    pub fn other_nodes(&self) -> Vec<(u16, &PeerSender)> {
        self.all_nodes().into_iter().filter(|(i, _)| *i != self.self_index).collect()
    }

    pub async fn send_msg_by_index(
        &self,
        index: u16,
        receiver: u8,
        msg_type: u8,
        data: Vec<u8>,
    ) -> Result<(), PeeringError> {
        let node = self.node(index)?;
        node.send_msg(PeerMessageData::new(self.peering_id, receiver, msg_type, data)).await;
        Ok(())
    }

    /// Sends the message to every other member, and to the local node too if `including_self` is set.
    pub async fn broadcast(&self, receiver: u8, msg_type: u8, data: &[u8], including_self: bool) {
        let self_index = usize::from(self.self_index);
        let sends = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| including_self || *i != self_index)
            .map(|(_, node)| node.send_msg(PeerMessageData::new(self.peering_id, receiver, msg_type, data.to_vec())));
        join_all(sends).await;
    }

    /// Attaches `callback` to this group's peering id. Messages from nodes outside the group are ignored.
    pub fn attach(&self, receiver: u8, callback: RecvCallback) -> CancelHandle {
        let members: Vec<PublicKey> = self.nodes.iter().map(|n| n.pub_key().clone()).collect();
        let filtered: RecvCallback = Arc::new(move |msg: &PeerMessageIn| {
            if members.contains(&msg.sender_pub_key) {
                callback(msg);
            } else {
                debug!("Ignoring message from {}: not a member of the group", msg.sender_pub_key);
            }
        });
        self.dispatcher.attach(self.peering_id, receiver, filtered)
    }

    /// Gives back the references held on the remote members. Only the first call has an effect.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.nodes.iter().for_each(PeerSender::release);
    }
}
