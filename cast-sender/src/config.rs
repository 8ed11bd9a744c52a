//! Sender configuration
//!
//! All durations are integer milliseconds so the structs map directly onto
//! TOML files.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on frames awaiting acknowledgement
pub const MAX_UNACKED_FRAMES: usize = 120;

/// Frame rate of 10 ms audio quanta
pub const AUDIO_FRAME_RATE: f64 = 100.0;

/// Transport behavior shared by audio and video senders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// End-to-end latency budget in milliseconds
    #[serde(default = "default_target_playout_delay")]
    pub target_playout_delay_ms: u64,
    /// Sender report interval once RTT is known, in milliseconds
    #[serde(default = "default_rtcp_interval")]
    pub rtcp_interval_ms: u64,
    /// Reports sent with every frame before switching to the interval
    #[serde(default = "default_aggressive_report_count")]
    pub aggressive_report_count: u32,
    /// Override for the in-flight frame limit
    #[serde(default)]
    pub max_unacked_frames: Option<usize>,
    /// Duplicate ACKs before the first kickstart
    #[serde(default = "default_duplicate_ack_threshold")]
    pub duplicate_ack_threshold: u32,
    /// Duplicate ACKs between subsequent kickstarts
    #[serde(default = "default_duplicate_ack_period")]
    pub duplicate_ack_period: u32,
}

fn default_target_playout_delay() -> u64 {
    100
}

fn default_rtcp_interval() -> u64 {
    500
}

fn default_aggressive_report_count() -> u32 {
    100
}

fn default_duplicate_ack_threshold() -> u32 {
    2
}

fn default_duplicate_ack_period() -> u32 {
    3
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            target_playout_delay_ms: default_target_playout_delay(),
            rtcp_interval_ms: default_rtcp_interval(),
            aggressive_report_count: default_aggressive_report_count(),
            max_unacked_frames: None,
            duplicate_ack_threshold: default_duplicate_ack_threshold(),
            duplicate_ack_period: default_duplicate_ack_period(),
        }
    }
}

impl TransportConfig {
    pub fn target_playout_delay(&self) -> Duration {
        Duration::from_millis(self.target_playout_delay_ms)
    }

    pub fn rtcp_interval(&self) -> Duration {
        Duration::from_millis(self.rtcp_interval_ms)
    }

    /// In-flight frame limit for a stream of `max_frame_rate` frames per second
    ///
    /// Unless overridden this is one frame plus a playout delay's worth of
    /// frames, capped at [`MAX_UNACKED_FRAMES`].
    pub fn max_unacked_frames_for(&self, max_frame_rate: f64) -> usize {
        if let Some(limit) = self.max_unacked_frames {
            return limit;
        }
        let frames = 1 + (self.target_playout_delay().as_secs_f64() * max_frame_rate) as usize;
        frames.min(MAX_UNACKED_FRAMES)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_playout_delay_ms == 0 {
            return Err(ConfigError::ZeroPlayoutDelay);
        }
        if self.rtcp_interval_ms == 0 {
            return Err(ConfigError::ZeroRtcpInterval);
        }
        if let Some(value) = self.max_unacked_frames {
            if value == 0 || value > MAX_UNACKED_FRAMES {
                return Err(ConfigError::InvalidMaxUnackedFrames {
                    value,
                    max: MAX_UNACKED_FRAMES,
                });
            }
        }
        if self.duplicate_ack_threshold == 0 || self.duplicate_ack_period == 0 {
            return Err(ConfigError::InvalidDuplicateAckPolicy);
        }
        Ok(())
    }
}

/// Audio sender configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSenderConfig {
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u32,
    /// Constant encoder bitrate in bits per second
    #[serde(default = "default_audio_bitrate")]
    pub bitrate: u32,
    /// Capture gap, in frames, treated as an underrun
    #[serde(default = "default_underrun_threshold")]
    pub underrun_threshold_frames: u32,
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_sampling_rate() -> u32 {
    48_000
}

fn default_channels() -> u32 {
    2
}

fn default_audio_bitrate() -> u32 {
    64_000
}

fn default_underrun_threshold() -> u32 {
    3
}

impl Default for AudioSenderConfig {
    fn default() -> Self {
        AudioSenderConfig {
            sampling_rate: default_sampling_rate(),
            channels: default_channels(),
            bitrate: default_audio_bitrate(),
            underrun_threshold_frames: default_underrun_threshold(),
            transport: TransportConfig::default(),
        }
    }
}

impl AudioSenderConfig {
    /// Check transport and bitrate settings
    ///
    /// The sample format itself is checked by the frame quantizer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.validate()?;
        if self.bitrate == 0 {
            return Err(ConfigError::ZeroBitrate);
        }
        Ok(())
    }
}

/// Video sender configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSenderConfig {
    #[serde(default = "default_min_bitrate")]
    pub min_bitrate: u32,
    #[serde(default = "default_max_bitrate")]
    pub max_bitrate: u32,
    #[serde(default = "default_max_frame_rate")]
    pub max_frame_rate: f64,
    /// RTP clock rate in Hz
    #[serde(default = "default_rtp_timebase")]
    pub rtp_timebase: u32,
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_min_bitrate() -> u32 {
    300_000
}

fn default_max_bitrate() -> u32 {
    5_000_000
}

fn default_max_frame_rate() -> f64 {
    30.0
}

fn default_rtp_timebase() -> u32 {
    90_000
}

impl Default for VideoSenderConfig {
    fn default() -> Self {
        VideoSenderConfig {
            min_bitrate: default_min_bitrate(),
            max_bitrate: default_max_bitrate(),
            max_frame_rate: default_max_frame_rate(),
            rtp_timebase: default_rtp_timebase(),
            transport: TransportConfig::default(),
        }
    }
}

impl VideoSenderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.validate()?;
        if self.min_bitrate == 0 {
            return Err(ConfigError::ZeroBitrate);
        }
        if self.min_bitrate > self.max_bitrate {
            return Err(ConfigError::InvalidBitrateRange {
                min: self.min_bitrate,
                max: self.max_bitrate,
            });
        }
        if !(self.max_frame_rate.is_finite() && self.max_frame_rate > 0.0) {
            return Err(ConfigError::InvalidFrameRate(self.max_frame_rate));
        }
        if self.rtp_timebase == 0 {
            return Err(ConfigError::ZeroRtpTimebase);
        }
        Ok(())
    }
}
