//! The registry of trusted peers.
//!
//! The registry is the reference for authentication: only peers whose public key is present here get a live entry in
//! the peer table. It is consumed by the network provider through the [`TrustedNetworkManager`] trait, so any
//! persistent store can back it. [`TrustedPeerStore`] is the bundled implementation, keeping records in memory and
//! optionally mirroring them to a YAML file.

use crate::errors::TrustError;
use crate::identity::PublicKey;
use crate::listeners::{CancelHandle, Listeners};
use log::*;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type TrustListener = Arc<dyn Fn(&Vec<TrustedPeer>) + Send + Sync>;

/// A peer we trust, and where to find it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedPeer {
    pub name: String,
    pub pub_key: PublicKey,
    /// Either `host:port`, or a literal multiaddr starting with `/`.
    pub peering_url: String,
}

impl TrustedPeer {
    pub fn new(name: impl Into<String>, pub_key: PublicKey, peering_url: impl Into<String>) -> Self {
        Self { name: name.into(), pub_key, peering_url: peering_url.into() }
    }
}

impl Display for TrustedPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) @ {}", self.name, self.pub_key, self.peering_url)
    }
}

/// Splits a `host:port` peering URL. IPv6 hosts may be given in brackets, e.g. `[::1]:4000`.
pub fn parse_peering_url(url: &str) -> Result<(String, u16), TrustError> {
    let (host, port) =
        url.rsplit_once(':').ok_or_else(|| TrustError::invalid(format!("peering URL {url} has no port")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(TrustError::invalid(format!("peering URL {url} has no host")));
    }
    let port = port.parse::<u16>().map_err(|e| TrustError::invalid(format!("invalid port in {url}: {e}")))?;
    Ok((host.to_string(), port))
}

pub fn validate_trusted_peer_params(name: &str, peering_url: &str) -> Result<(), TrustError> {
    if name.trim().is_empty() {
        return Err(TrustError::invalid("the peer name must not be empty"));
    }
    if peering_url.starts_with('/') {
        return Ok(());
    }
    parse_peering_url(peering_url).map(|_| ())
}

/// Maintains the set of peers this node trusts. Implementations must notify listeners, with the full updated list,
/// every time the set changes.
pub trait TrustedNetworkManager: Send + Sync {
    fn is_trusted_peer(&self, pub_key: &PublicKey) -> bool;

    /// Adds or updates the record for `pub_key`.
    fn trust_peer(&self, name: &str, pub_key: PublicKey, peering_url: &str) -> Result<TrustedPeer, TrustError>;

    /// Removes the record for `pub_key`, returning it if it was present.
    fn distrust_peer(&self, pub_key: &PublicKey) -> Result<Option<TrustedPeer>, TrustError>;

    fn trusted_peers(&self) -> Result<Vec<TrustedPeer>, TrustError>;

    /// Looks peers up by hex-encoded public key or by name. Every entry must match a record.
    fn trusted_peers_by_pub_key_or_name(&self, pub_keys_or_names: &[String]) -> Result<Vec<TrustedPeer>, TrustError> {
        let all = self.trusted_peers()?;
        pub_keys_or_names
            .iter()
            .map(|needle| {
                all.iter()
                    .find(|tp| tp.name == *needle || tp.pub_key.to_hex() == needle.trim_start_matches("0x"))
                    .cloned()
                    .ok_or_else(|| TrustError::UnknownPeer(needle.clone()))
            })
            .collect()
    }

    fn trusted_peers_listener(&self, callback: TrustListener) -> CancelHandle;
}

#[derive(Default, Serialize, Deserialize)]
struct TrustedPeerFile {
    peers: Vec<TrustedPeer>,
}

pub struct TrustedPeerStore {
    peers: RwLock<BTreeMap<PublicKey, TrustedPeer>>,
    path: Option<PathBuf>,
    listeners: Listeners<Vec<TrustedPeer>>,
}

impl TrustedPeerStore {
    pub fn in_memory() -> Self {
        Self { peers: RwLock::new(BTreeMap::new()), path: None, listeners: Listeners::new() }
    }

    /// Opens the store backed by the YAML file at `path`. A missing file is an empty store; it is created on the
    /// first change.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TrustError> {
        let path = path.as_ref().to_path_buf();
        let peers = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let file: TrustedPeerFile = serde_yml::from_str(&text)?;
                file.peers.into_iter().map(|tp| (tp.pub_key.clone(), tp)).collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No trusted peer file at {}. Starting empty.", path.display());
                BTreeMap::new()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self { peers: RwLock::new(peers), path: Some(path), listeners: Listeners::new() })
    }

    fn persist(&self, peers: &BTreeMap<PublicKey, TrustedPeer>) -> Result<(), TrustError> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = TrustedPeerFile { peers: peers.values().cloned().collect() };
        std::fs::write(path, serde_yml::to_string(&file)?)?;
        Ok(())
    }

    /// Applies `change` to a copy of the current records, persists the copy and only then makes it current. Listeners
    /// are notified after the lock is released.
    fn update<R>(&self, change: impl FnOnce(&mut BTreeMap<PublicKey, TrustedPeer>) -> R) -> Result<R, TrustError> {
        let (result, snapshot) = {
            let mut peers = self.peers.write();
            let mut next = peers.clone();
            let result = change(&mut next);
            if next == *peers {
                return Ok(result);
            }
            self.persist(&next)?;
            *peers = next;
            (result, peers.values().cloned().collect::<Vec<_>>())
        };
        self.listeners.notify(&snapshot);
        Ok(result)
    }
}

impl TrustedNetworkManager for TrustedPeerStore {
    fn is_trusted_peer(&self, pub_key: &PublicKey) -> bool {
        self.peers.read().contains_key(pub_key)
    }

    fn trust_peer(&self, name: &str, pub_key: PublicKey, peering_url: &str) -> Result<TrustedPeer, TrustError> {
        validate_trusted_peer_params(name, peering_url)?;
        let record = TrustedPeer::new(name, pub_key, peering_url);
        let inserted = record.clone();
        self.update(move |peers| {
            peers.insert(inserted.pub_key.clone(), inserted);
        })?;
        info!("Trusting peer {record}");
        Ok(record)
    }

    fn distrust_peer(&self, pub_key: &PublicKey) -> Result<Option<TrustedPeer>, TrustError> {
        let removed = self.update(|peers| peers.remove(pub_key))?;
        if let Some(tp) = &removed {
            info!("Distrusting peer {tp}");
        }
        Ok(removed)
    }

    fn trusted_peers(&self) -> Result<Vec<TrustedPeer>, TrustError> {
        Ok(self.peers.read().values().cloned().collect())
    }

    fn trusted_peers_listener(&self, callback: TrustListener) -> CancelHandle {
        self.listeners.add(callback)
    }
}
