//! Configuration file support for the Cast simulator

use cast_sender::{AudioSenderConfig, VideoSenderConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Which sender to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Simulated network path between sender and receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Independent per-packet loss probability, in percent
    #[serde(default = "default_loss")]
    pub loss_percent: f64,
    /// One-way propagation delay in milliseconds
    #[serde(default = "default_delay")]
    pub one_way_delay_ms: u64,
    /// Bottleneck capacity in kbit/s; 0 means unlimited
    #[serde(default = "default_capacity")]
    pub capacity_kbps: u64,
    /// Maximum payload bytes per packet
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
    /// Seed for the loss process
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_loss() -> f64 {
    1.0
}

fn default_delay() -> u64 {
    20
}

fn default_capacity() -> u64 {
    10_000
}

fn default_packet_size() -> usize {
    1200
}

fn default_seed() -> u64 {
    1
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            loss_percent: default_loss(),
            one_way_delay_ms: default_delay(),
            capacity_kbps: default_capacity(),
            packet_size: default_packet_size(),
            seed: default_seed(),
        }
    }
}

impl LinkConfig {
    pub fn one_way_delay(&self) -> Duration {
        Duration::from_millis(self.one_way_delay_ms)
    }
}

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_media")]
    pub media: MediaKind,
    /// Simulated run time in seconds
    #[serde(default = "default_duration")]
    pub duration_secs: u64,
    /// Statistics interval in seconds of simulated time
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub audio: AudioSenderConfig,
    #[serde(default)]
    pub video: VideoSenderConfig,
}

fn default_media() -> MediaKind {
    MediaKind::Audio
}

fn default_duration() -> u64 {
    10
}

fn default_stats_interval() -> u64 {
    1
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            media: default_media(),
            duration_secs: default_duration(),
            stats_interval_secs: default_stats_interval(),
            link: LinkConfig::default(),
            audio: AudioSenderConfig::default(),
            video: VideoSenderConfig::default(),
        }
    }
}

impl SimConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: SimConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Example: 720p-class video over a lossy cellular-like link
    pub fn example() -> Self {
        let mut config = SimConfig {
            media: MediaKind::Video,
            duration_secs: 30,
            ..Default::default()
        };
        config.link.loss_percent = 2.0;
        config.link.one_way_delay_ms = 40;
        config.link.capacity_kbps = 4_000;
        config.video.transport.target_playout_delay_ms = 400;
        config
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Check the simulation settings; sender settings are checked by the
    /// senders themselves
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..100.0).contains(&self.link.loss_percent) {
            return Err(ConfigError::Invalid(format!(
                "loss_percent must be in [0, 100), got {}",
                self.link.loss_percent
            )));
        }
        if self.link.packet_size == 0 {
            return Err(ConfigError::Invalid("packet_size must be positive".into()));
        }
        if self.duration_secs == 0 {
            return Err(ConfigError::Invalid("duration_secs must be positive".into()));
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "stats_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config() {
        let config = SimConfig::example();
        assert_eq!(config.media, MediaKind::Video);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = SimConfig::example();
        let toml = toml::to_string(&config).unwrap();
        let parsed: SimConfig = toml::from_str(&toml).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_sparse_file_uses_defaults() {
        let parsed: SimConfig = toml::from_str(
            r#"
            media = "video"

            [link]
            loss_percent = 5.0

            [video]
            max_bitrate = 2000000
            "#,
        )
        .unwrap();

        assert_eq!(parsed.media, MediaKind::Video);
        assert_eq!(parsed.link.loss_percent, 5.0);
        assert_eq!(parsed.link.one_way_delay_ms, 20);
        assert_eq!(parsed.video.max_bitrate, 2_000_000);
        assert_eq!(parsed.video.min_bitrate, 300_000);
        assert_eq!(parsed.audio, AudioSenderConfig::default());
    }

    #[test]
    fn test_invalid_loss() {
        let mut config = SimConfig::default();
        config.link.loss_percent = 100.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
