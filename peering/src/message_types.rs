use crate::errors::FrameError;
use crate::identity::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

pub const PEERING_ID_LENGTH: usize = 32;

/// Minimum size of a serialised [`PeerMessageData`]: the peering id, the receiver tag and the message type.
pub const MESSAGE_HEADER_LEN: usize = PEERING_ID_LENGTH + 2;

/// Relates the peers of different nodes taking part in one particular exchange, e.g. one consensus instance. It is used
/// purely for routing received messages to the right consumer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeeringId([u8; PEERING_ID_LENGTH]);

impl PeeringId {
    pub const fn new(bytes: [u8; PEERING_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; PEERING_ID_LENGTH] {
        &self.0
    }
}

impl Display for PeeringId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for PeeringId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeeringId({self})")
    }
}

/// The envelope for every message exchanged over the data protocol.
///
/// Delivery is routed on `(peering_id, msg_receiver)` only; `msg_type` and `msg_data` are opaque at this layer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessageData {
    pub peering_id: PeeringId,
    pub msg_receiver: u8,
    pub msg_type: u8,
    pub msg_data: Vec<u8>,
}

impl PeerMessageData {
    pub fn new(peering_id: PeeringId, msg_receiver: u8, msg_type: u8, msg_data: impl Into<Vec<u8>>) -> Self {
        Self { peering_id, msg_receiver, msg_type, msg_data: msg_data.into() }
    }

    /// Wire layout: peering id (32 bytes), receiver tag (1 byte), message type (1 byte), then the payload up to the
    /// end of the frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MESSAGE_HEADER_LEN + self.msg_data.len());
        buf.extend_from_slice(self.peering_id.as_bytes());
        buf.push(self.msg_receiver);
        buf.push(self.msg_type);
        buf.extend_from_slice(&self.msg_data);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, FrameError> {
        let Some((id, rest)) = buf.split_first_chunk::<PEERING_ID_LENGTH>() else {
            return Err(FrameError::malformed(format!("message of {} bytes has no peering id", buf.len())));
        };
        let [msg_receiver, msg_type, msg_data @ ..] = rest else {
            return Err(FrameError::malformed("message has no receiver tag or message type"));
        };
        Ok(Self {
            peering_id: PeeringId::new(*id),
            msg_receiver: *msg_receiver,
            msg_type: *msg_type,
            msg_data: msg_data.to_vec(),
        })
    }
}

impl Debug for PeerMessageData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PeerMessageData(peering_id: {}, receiver: {}, type: {}, {} bytes)",
            self.peering_id,
            self.msg_receiver,
            self.msg_type,
            self.msg_data.len()
        )
    }
}

/// A received message along with the public key of its (transport-authenticated) sender.
#[derive(Clone, Debug)]
pub struct PeerMessageIn {
    pub data: PeerMessageData,
    pub sender_pub_key: PublicKey,
}

impl PeerMessageIn {
    pub fn new(data: PeerMessageData, sender_pub_key: PublicKey) -> Self {
        Self { data, sender_pub_key }
    }
}

/// The single-byte payload of the heartbeat protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Heartbeat {
    Plain,
    AckRequested,
}

impl Heartbeat {
    pub fn to_byte(self) -> u8 {
        match self {
            Heartbeat::Plain => 0,
            Heartbeat::AckRequested => 1,
        }
    }

    /// Any non-zero byte asks for an acknowledgement.
    pub fn from_payload(payload: &[u8]) -> Result<Self, FrameError> {
        match payload {
            [0] => Ok(Heartbeat::Plain),
            [_] => Ok(Heartbeat::AckRequested),
            _ => Err(FrameError::malformed(format!("heartbeat payload of {} bytes", payload.len()))),
        }
    }
}
