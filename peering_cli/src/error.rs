use std::path::PathBuf;
use thiserror::Error;
use trusted_peering::{ConfigError, IdentityError, PeeringError, TrustError};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("No node identity at {0}. Use `peering id new` to create one.")]
    NoIdentity(PathBuf),
    #[error("A node identity already exists at {0}.")]
    IdentityExists(PathBuf),
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("Trust registry error: {0}")]
    Trust(#[from] TrustError),
    #[error("Invalid configuration file: {0}")]
    Config(#[from] ConfigError),
    #[error("Peering error: {0}")]
    Peering(#[from] PeeringError),
}
