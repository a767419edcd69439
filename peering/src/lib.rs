//! Authenticated, trust-gated messaging between the nodes of a cluster.
//!
//! Every node runs a [`NetworkProvider`]. It keeps one [`Peer`] per trusted remote node, each with its own bounded
//! send and receive queues, and delivers inbound messages to callbacks attached by `(peering id, receiver)` through
//! the [`EventDispatcher`]. Authentication and encryption are the job of the [`Transport`]; this crate decides who is
//! trusted, keeps the byte streams framed, and checks liveness with heartbeats.

pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod frame;
pub mod group;
pub mod identity;
pub mod listeners;
mod maintenance;
pub mod memory_transport;
pub mod message_types;
pub mod peer;
mod peer_table;
pub mod provider;
pub mod sender;
pub mod transport;
pub mod trust;

pub use config::PeeringConfig;
pub use dispatcher::{EventDispatcher, RecvCallback};
pub use domain::PeerDomain;
pub use errors::{ConfigError, FrameError, PeeringError, TransportError, TrustError};
pub use group::PeerGroup;
pub use identity::{IdentityError, NodeIdentity, PublicKey, TransportIdentity};
pub use listeners::CancelHandle;
pub use memory_transport::{MemoryNetwork, MemoryTransport};
pub use message_types::{Heartbeat, PeerMessageData, PeerMessageIn, PeeringId};
pub use peer::{Peer, PeerStatus};
pub use provider::{NetworkProvider, SELF_PEER_NAME};
pub use sender::{LocalPeer, PeerSender};
pub use transport::{resolve_peering_url, BoxedStream, Transport, HEARTBEAT_PROTOCOL, PEERING_PROTOCOL};
pub use trust::{TrustedNetworkManager, TrustedPeer, TrustedPeerStore};
