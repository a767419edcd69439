use crate::dispatcher::EventDispatcher;
use crate::errors::PeeringError;
use crate::identity::PublicKey;
use crate::message_types::{PeerMessageData, PeerMessageIn};
use crate::peer::{Peer, PeerStatus};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

/// The local node, seen as a peer. Messages sent to it go straight to the local dispatcher.
#[derive(Clone)]
pub struct LocalPeer {
    name: String,
    pub_key: PublicKey,
    peering_url: String,
    dispatcher: Arc<EventDispatcher>,
}

impl LocalPeer {
    pub(crate) fn new(name: String, pub_key: PublicKey, peering_url: String, dispatcher: Arc<EventDispatcher>) -> Self {
        Self { name, pub_key, peering_url, dispatcher }
    }

    pub fn send_msg(&self, msg: PeerMessageData) -> usize {
        self.dispatcher.dispatch(&PeerMessageIn::new(msg, self.pub_key.clone()))
    }
}

/// A handle to something messages can be sent to: either the local node or a remote peer from the peer table.
///
/// Handles to remote peers hold one reference on the peer; call [`PeerSender::release`] when done with it.
#[derive(Clone)]
pub enum PeerSender {
    Local(LocalPeer),
    Remote(Arc<Peer>),
}

impl PeerSender {
    pub fn name(&self) -> &str {
        match self {
            PeerSender::Local(local) => &local.name,
            PeerSender::Remote(peer) => peer.name(),
        }
    }

    pub fn pub_key(&self) -> &PublicKey {
        match self {
            PeerSender::Local(local) => &local.pub_key,
            PeerSender::Remote(peer) => peer.pub_key(),
        }
    }

    pub fn peering_url(&self) -> String {
        match self {
            PeerSender::Local(local) => local.peering_url.clone(),
            PeerSender::Remote(peer) => peer.peering_url(),
        }
    }

    pub fn is_self(&self) -> bool {
        matches!(self, PeerSender::Local(_))
    }

    pub fn is_alive(&self) -> bool {
        match self {
            PeerSender::Local(_) => true,
            PeerSender::Remote(peer) => peer.is_alive(),
        }
    }

    pub async fn await_alive(&self, timeout: Duration) -> Result<(), PeeringError> {
        match self {
            PeerSender::Local(_) => Ok(()),
            PeerSender::Remote(peer) => peer.await_alive(timeout).await,
        }
    }

    pub async fn send_msg(&self, msg: PeerMessageData) {
        match self {
            PeerSender::Local(local) => {
                local.send_msg(msg);
            }
            PeerSender::Remote(peer) => peer.send_msg(msg).await,
        }
    }

    pub fn status(&self) -> PeerStatus {
        match self {
            PeerSender::Local(local) => PeerStatus {
                name: local.name.clone(),
                peering_url: local.peering_url.clone(),
                pub_key: local.pub_key.clone(),
                trusted: true,
                alive: true,
                num_users: 0,
            },
            PeerSender::Remote(peer) => peer.status(),
        }
    }

    pub fn release(&self) {
        if let PeerSender::Remote(peer) = self {
            peer.release();
        }
    }
}

impl Display for PeerSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerSender::Local(local) => write!(f, "{}@{} (self)", local.name, local.peering_url),
            PeerSender::Remote(peer) => write!(f, "{peer}"),
        }
    }
}
