//! The boundary to the secure stream transport.
//!
//! The peering layer never touches sockets or encryption. It asks a [`Transport`] to open a stream to an
//! authenticated remote identity for a given protocol, and receives inbound streams, tagged with the authenticated
//! remote identity, through per-protocol handlers.

use crate::errors::{PeeringError, TransportError};
use crate::identity::TransportIdentity;
use crate::trust::parse_peering_url;
use async_trait::async_trait;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, StreamProtocol};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Carries framed [`PeerMessageData`](crate::PeerMessageData) envelopes.
pub const PEERING_PROTOCOL: StreamProtocol = StreamProtocol::new("/trusted-peering/peering/1.0.0");
/// Carries single-byte heartbeat frames.
pub const HEARTBEAT_PROTOCOL: StreamProtocol = StreamProtocol::new("/trusted-peering/heartbeat/1.0.0");

/// A bidirectional byte stream to an authenticated remote node.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeerStream for T {}

pub type BoxedStream = Box<dyn PeerStream>;

/// Invoked by the transport for every inbound stream of a registered protocol. Handlers must not block; long-running
/// work is expected to be spawned.
pub type StreamHandler = Arc<dyn Fn(TransportIdentity, BoxedStream) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn local_identity(&self) -> TransportIdentity;

    /// Makes `addrs` the known addresses for `peer`, replacing any previous ones.
    fn set_peer_addresses(&self, peer: &TransportIdentity, addrs: Vec<Multiaddr>);

    fn clear_peer_addresses(&self, peer: &TransportIdentity);

    async fn dial(&self, peer: &TransportIdentity, protocol: StreamProtocol) -> Result<BoxedStream, TransportError>;

    fn register_protocol_handler(&self, protocol: StreamProtocol, handler: StreamHandler);
}

/// Turns a peering URL into dialable addresses.
///
/// A URL starting with `/` is taken as a literal multiaddr. Otherwise it must be `host:port`, and expands into a QUIC
/// and a TCP address, using `ip4`, `ip6` or `dns` depending on the host.
pub fn resolve_peering_url(peering_url: &str) -> Result<Vec<Multiaddr>, PeeringError> {
    if peering_url.starts_with('/') {
        let addr = peering_url.parse::<Multiaddr>().map_err(|e| PeeringError::resolution(peering_url, e))?;
        return Ok(vec![addr]);
    }
    let (host, port) = parse_peering_url(peering_url).map_err(|e| PeeringError::resolution(peering_url, e))?;
    let host_protocol = match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => Protocol::Ip4(ip),
        Ok(IpAddr::V6(ip)) => Protocol::Ip6(ip),
        Err(_) => Protocol::Dns(host.into()),
    };
    let quic = Multiaddr::empty().with(host_protocol.clone()).with(Protocol::Udp(port)).with(Protocol::QuicV1);
    let tcp = Multiaddr::empty().with(host_protocol).with(Protocol::Tcp(port));
    Ok(vec![quic, tcp])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_host_port() {
        let addrs = resolve_peering_url("127.0.0.1:4000").unwrap();
        assert_eq!(addrs[0].to_string(), "/ip4/127.0.0.1/udp/4000/quic-v1");
        assert_eq!(addrs[1].to_string(), "/ip4/127.0.0.1/tcp/4000");
        let addrs = resolve_peering_url("[::1]:4000").unwrap();
        assert_eq!(addrs[1].to_string(), "/ip6/::1/tcp/4000");
        let addrs = resolve_peering_url("node.example.com:4000").unwrap();
        assert_eq!(addrs[1].to_string(), "/dns/node.example.com/tcp/4000");
    }

    #[test]
    fn resolve_literal_multiaddr() {
        let addrs = resolve_peering_url("/ip4/10.0.0.1/tcp/9000").unwrap();
        assert_eq!(addrs.len(), 1);
        assert!(matches!(resolve_peering_url("/not/a/multiaddr"), Err(PeeringError::AddressResolutionFailed { .. })));
    }

    #[test]
    fn resolve_failures() {
        assert!(matches!(resolve_peering_url("no-port"), Err(PeeringError::AddressResolutionFailed { .. })));
        assert!(matches!(resolve_peering_url("host:abc"), Err(PeeringError::AddressResolutionFailed { .. })));
    }
}
