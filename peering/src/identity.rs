use libp2p::identity::{ed25519, Keypair};
use libp2p::PeerId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const PUBLIC_KEY_LENGTH: usize = 32;

/// The ed25519 public key of a node. This is the primary identity of a peer; its address may change, its key never
/// does.
#[derive(Clone)]
pub struct PublicKey {
    inner: ed25519::PublicKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() != PUBLIC_KEY_LENGTH {
            return Err(IdentityError::InvalidKey(format!(
                "expected {PUBLIC_KEY_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let inner = ed25519::PublicKey::try_from_bytes(bytes).map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.inner.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// The transport-level identity of the node owning this key. The mapping is deterministic, so both ends of a
    /// connection compute the same value.
    pub fn transport_identity(&self) -> TransportIdentity {
        let public = libp2p::identity::PublicKey::from(self.inner.clone());
        TransportIdentity(public.to_peer_id())
    }
}

impl From<ed25519::PublicKey> for PublicKey {
    fn from(inner: ed25519::PublicKey) -> Self {
        Self { inner }
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state)
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        PublicKey::from_hex(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Opaque, serialisable handle the transport uses to address a node. Derived from the [`PublicKey`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportIdentity(PeerId);

impl TransportIdentity {
    pub fn peer_id(&self) -> &PeerId {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let peer_id = PeerId::from_bytes(bytes).map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        Ok(Self(peer_id))
    }
}

impl From<PeerId> for TransportIdentity {
    fn from(peer_id: PeerId) -> Self {
        Self(peer_id)
    }
}

impl Display for TransportIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for TransportIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransportIdentity({})", self.0)
    }
}

impl Serialize for TransportIdentity {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for TransportIdentity {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = hex::decode(encoded).map_err(serde::de::Error::custom)?;
        TransportIdentity::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// The key pair of the local node, along with a human-readable name.
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    name: String,
    #[serde(serialize_with = "serialize_key", deserialize_with = "deserialize_key")]
    keypair: Keypair,
}

impl NodeIdentity {
    pub fn random_with_name<S: Into<String>>(name: S) -> Self {
        NodeIdentity { name: name.into(), keypair: Keypair::generate_ed25519() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn public_key(&self) -> Result<PublicKey, IdentityError> {
        let public = self.keypair.public().try_into_ed25519().map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
        Ok(PublicKey::from(public))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), IdentityError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yml()?)?;
        Ok(())
    }

    pub fn to_yml(&self) -> Result<String, IdentityError> {
        let s = serde_yml::to_string(self)?;
        Ok(s)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, IdentityError> {
        let text = std::fs::read_to_string(path)?;
        let identity: NodeIdentity = serde_yml::from_str(&text)?;
        Ok(identity)
    }

    /// Consistency check: the key pair is an ed25519 pair.
    pub fn check(&self) -> bool {
        self.public_key().is_ok()
    }
}

impl Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.public_key() {
            Ok(key) => write!(f, "{}:{key}", self.name),
            Err(_) => write!(f, "{}:<invalid key>", self.name),
        }
    }
}

impl Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeIdentity({self})")
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Error reading/writing identity: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error de/encoding identity: {0}")]
    Serde(#[from] serde_yml::Error),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

fn serialize_key<S>(key: &Keypair, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let ed25519pair = key.clone().try_into_ed25519().map_err(serde::ser::Error::custom)?;
    let encoded = hex::encode(ed25519pair.to_bytes());
    serializer.serialize_str(&encoded)
}

fn deserialize_key<'de, D>(deserializer: D) -> Result<Keypair, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    let bytes = hex::decode(encoded).map_err(serde::de::Error::custom)?;
    if bytes.len() != 64 {
        return Err(serde::de::Error::custom("expected a 64 byte ed25519 key pair"));
    }
    let (secret, public) = bytes.split_at(32);
    let mut secret = secret.to_vec();
    let result = Keypair::ed25519_from_bytes(&mut secret).map_err(serde::de::Error::custom)?;
    let derived_pubkey = result.public().try_into_ed25519().map_err(serde::de::Error::custom)?.to_bytes();
    if derived_pubkey[..] != *public {
        return Err(serde::de::Error::custom("public key mismatch"));
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempPath;

    #[test]
    fn identity_save_load() {
        let identity = NodeIdentity::random_with_name("alpha");
        let tmp = TempPath::from_path("test_node_id.yml");
        identity.save(&tmp).expect("save identity");
        let loaded = NodeIdentity::load(&tmp).expect("load identity");
        assert_eq!(loaded.name(), "alpha");
        assert_eq!(identity.public_key().unwrap(), loaded.public_key().unwrap());
        assert!(loaded.check());
    }

    #[test]
    fn transport_identity_is_derived_from_key() {
        let identity = NodeIdentity::random_with_name("beta");
        let key = identity.public_key().unwrap();
        assert_eq!(key.transport_identity(), key.transport_identity());
        assert_eq!(*key.transport_identity().peer_id(), identity.keypair().public().to_peer_id());
        let other = NodeIdentity::random_with_name("gamma").public_key().unwrap();
        assert_ne!(key.transport_identity(), other.transport_identity());
    }

    #[test]
    fn public_key_hex() {
        let key = NodeIdentity::random_with_name("delta").public_key().unwrap();
        let parsed: PublicKey = key.to_hex().parse().unwrap();
        assert_eq!(key, parsed);
        assert!(PublicKey::from_hex("abcd").is_err());
        assert!(PublicKey::from_hex("not hex").is_err());
        let id = key.transport_identity();
        assert_eq!(TransportIdentity::from_bytes(&id.to_bytes()).unwrap(), id);
    }
}
