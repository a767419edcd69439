use crate::error::CliError;
use std::path::{Path, PathBuf};
use trusted_peering::{NodeIdentity, PeeringConfig, TrustedPeerStore};

pub const IDENTITY_FILE: &str = "identity.yml";
pub const TRUSTED_PEERS_FILE: &str = "trusted_peers.yml";
pub const CONFIG_FILE: &str = "peering.yml";

pub fn default_data_dir() -> PathBuf {
    let mut home = std::env::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.push(".trusted-peering");
    home
}

/// The files making up one node's state, all under a single directory.
pub struct NodeFiles {
    dir: PathBuf,
}

impl NodeFiles {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir: dir.unwrap_or_else(default_data_dir) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn identity_path(&self) -> PathBuf {
        self.dir.join(IDENTITY_FILE)
    }

    pub fn trusted_peers_path(&self) -> PathBuf {
        self.dir.join(TRUSTED_PEERS_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn load_identity(&self) -> Result<NodeIdentity, CliError> {
        let path = self.identity_path();
        if !path.exists() {
            return Err(CliError::NoIdentity(path));
        }
        Ok(NodeIdentity::load(path)?)
    }

    pub fn create_identity(&self, name: &str, force: bool) -> Result<NodeIdentity, CliError> {
        let path = self.identity_path();
        if path.exists() && !force {
            return Err(CliError::IdentityExists(path));
        }
        let identity = NodeIdentity::random_with_name(name);
        identity.save(path)?;
        Ok(identity)
    }

    pub fn open_trust_store(&self) -> Result<TrustedPeerStore, CliError> {
        Ok(TrustedPeerStore::open(self.trusted_peers_path())?)
    }

    /// Reads the configuration file, falling back to the defaults if there is none.
    pub fn load_config(&self) -> Result<PeeringConfig, CliError> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(PeeringConfig::default());
        }
        Ok(PeeringConfig::load(path)?)
    }

    pub fn save_default_config(&self) -> Result<PathBuf, CliError> {
        let path = self.config_path();
        PeeringConfig::default().save(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use trusted_peering::TrustedNetworkManager;

    #[test]
    fn identity_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let files = NodeFiles::new(Some(dir.path().to_path_buf()));
        assert!(matches!(files.load_identity(), Err(CliError::NoIdentity(_))));
        let created = files.create_identity("alice", false).unwrap();
        assert!(matches!(files.create_identity("bob", false), Err(CliError::IdentityExists(_))));
        let loaded = files.load_identity().unwrap();
        assert_eq!(loaded.name(), "alice");
        assert_eq!(loaded.public_key().unwrap(), created.public_key().unwrap());
        let replaced = files.create_identity("bob", true).unwrap();
        assert_eq!(files.load_identity().unwrap().public_key().unwrap(), replaced.public_key().unwrap());
    }

    #[test]
    fn config_defaults_until_written() {
        let dir = tempfile::tempdir().unwrap();
        let files = NodeFiles::new(Some(dir.path().to_path_buf()));
        assert_eq!(files.load_config().unwrap(), PeeringConfig::default());
        let path = files.save_default_config().unwrap();
        assert!(path.exists());
        assert_eq!(files.load_config().unwrap(), PeeringConfig::default());
    }

    #[test]
    fn trust_store_lives_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let files = NodeFiles::new(Some(dir.path().to_path_buf()));
        let key = NodeIdentity::random_with_name("p").public_key().unwrap();
        files.open_trust_store().unwrap().trust_peer("p", key.clone(), "127.0.0.1:4000").unwrap();
        assert!(files.open_trust_store().unwrap().is_trusted_peer(&key));
    }
}
