use crate::identity::{IdentityError, PublicKey, TransportIdentity};
use thiserror::Error;

/// Failures while reading or writing a single length-prefixed frame.
///
/// Every variant is fatal for the stream the frame was read from, and only for that stream.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame truncated. Expected {expected} bytes, but only {actual} were available.")]
    Truncated { expected: usize, actual: usize },
    #[error("Frame could not be parsed. {0}")]
    Malformed(String),
    #[error("Frame of {len} bytes exceeds the limit of {max} bytes.")]
    TooLarge { len: usize, max: usize },
    #[error("I/O error on the frame stream. {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        FrameError::Malformed(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No addresses are known for peer {0}.")]
    NoAddresses(TransportIdentity),
    #[error("Peer {0} is unreachable.")]
    Unreachable(TransportIdentity),
    #[error("Peer {peer} does not support protocol {protocol}.")]
    ProtocolNotSupported { peer: TransportIdentity, protocol: String },
    #[error("The transport has been closed.")]
    Closed,
    #[error("Transport I/O error. {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("Invalid trusted peer parameters. {0}")]
    InvalidParams(String),
    #[error("Could not read or write the trusted peer file. {0}")]
    Storage(#[from] std::io::Error),
    #[error("Could not de/encode the trusted peer file. {0}")]
    Serialization(#[from] serde_yml::Error),
    #[error("No trusted peer matches {0}.")]
    UnknownPeer(String),
}

impl TrustError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        TrustError::InvalidParams(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read or write the configuration file. {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration file. {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Invalid configuration. {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum PeeringError {
    #[error("Could not resolve peering URL {url}. {reason}")]
    AddressResolutionFailed { url: String, reason: String },
    #[error("Peer {0} is not trusted.")]
    PeerNotTrusted(PublicKey),
    #[error("The local node is not a member of the group.")]
    SelfNotInGroup,
    #[error("Peer index {0} is out of range for this group.")]
    IndexOutOfRange(u16),
    #[error("Timed out waiting for the peer.")]
    Timeout,
    #[error("The network provider is shutting down.")]
    ShuttingDown,
    #[error("Trust registry error. {0}")]
    Trust(#[from] TrustError),
    #[error("Transport error. {0}")]
    Transport(#[from] TransportError),
    #[error("Framing error. {0}")]
    Frame(#[from] FrameError),
    #[error("Node identity error. {0}")]
    Identity(#[from] IdentityError),
    #[error("Configuration error. {0}")]
    Config(#[from] ConfigError),
}

impl PeeringError {
    pub fn resolution(url: impl Into<String>, reason: impl ToString) -> Self {
        PeeringError::AddressResolutionFailed { url: url.into(), reason: reason.to_string() }
    }
}
