use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for the peering layer. Durations are stored as milliseconds in the YAML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeeringConfig {
    /// How often the maintenance loop visits every peer.
    #[serde(with = "millis")]
    pub maintenance_period: Duration,
    /// A peer in use that has been silent for this long is sent an ack-requesting heartbeat.
    #[serde(with = "millis")]
    pub ping_after: Duration,
    /// A peer silent for this long is no longer alive, and becomes eligible for removal once unused and untrusted.
    #[serde(with = "millis")]
    pub inactivity_deadline: Duration,
    /// Capacity of each per-peer send and receive queue. A full queue blocks the producer.
    pub queue_capacity: usize,
    /// Frames declaring a larger payload are rejected and their stream closed.
    pub max_frame_len: usize,
    /// Buffer size of the in-memory transport pipes.
    pub stream_buffer: usize,
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            maintenance_period: Duration::from_secs(1),
            ping_after: Duration::from_secs(10),
            inactivity_deadline: Duration::from_secs(60),
            queue_capacity: 10_000,
            max_frame_len: 64 * 1024 * 1024,
            stream_buffer: 64 * 1024,
        }
    }
}

impl PeeringConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: PeeringConfig = serde_yml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yml::to_string(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maintenance_period.is_zero() {
            return Err(ConfigError::Invalid("maintenance_period must be non-zero".into()));
        }
        if self.ping_after >= self.inactivity_deadline {
            return Err(ConfigError::Invalid(format!(
                "ping_after ({:?}) must be shorter than inactivity_deadline ({:?})",
                self.ping_after, self.inactivity_deadline
            )));
        }
        if self.queue_capacity == 0 || self.stream_buffer == 0 || self.max_frame_len == 0 {
            return Err(ConfigError::Invalid("queue_capacity, stream_buffer and max_frame_len must be non-zero".into()));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempPath;

    #[test]
    fn defaults_are_valid() {
        PeeringConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_file_uses_defaults() {
        let config: PeeringConfig = serde_yml::from_str("ping_after: 2500\nqueue_capacity: 16\n").unwrap();
        assert_eq!(config.ping_after, Duration::from_millis(2500));
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.inactivity_deadline, Duration::from_secs(60));
    }

    #[test]
    fn save_and_load() {
        let tmp = TempPath::from_path("test_peering_config.yml");
        let config = PeeringConfig { queue_capacity: 5, ..Default::default() };
        config.save(&tmp).unwrap();
        assert_eq!(PeeringConfig::load(&tmp).unwrap(), config);
    }

    #[test]
    fn ping_must_precede_deadline() {
        let config = PeeringConfig {
            ping_after: Duration::from_secs(5),
            inactivity_deadline: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
