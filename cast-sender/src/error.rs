//! Error types for sender construction and encoding

use cast_io::WorkerError;
use cast_protocol::CongestionError;
use std::fmt;
use thiserror::Error;

/// Invalid sender configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Channel count must be positive")]
    InvalidChannels,

    #[error("Sampling rate {0} Hz is not a positive multiple of 100")]
    InvalidSamplingRate(u32),

    #[error("Frame of {samples_per_frame} samples x {channels} channels exceeds the quantum buffer")]
    FrameTooLarge {
        samples_per_frame: usize,
        channels: usize,
    },

    #[error("Underrun threshold must be at least one frame")]
    InvalidUnderrunThreshold,

    #[error("Bitrate must be positive")]
    ZeroBitrate,

    #[error("Invalid bitrate range: min {min} > max {max}")]
    InvalidBitrateRange { min: u32, max: u32 },

    #[error("Maximum frame rate must be positive, got {0}")]
    InvalidFrameRate(f64),

    #[error("RTP timebase must be positive")]
    ZeroRtpTimebase,

    #[error("Target playout delay must be positive")]
    ZeroPlayoutDelay,

    #[error("RTCP report interval must be positive")]
    ZeroRtcpInterval,

    #[error("Maximum unacknowledged frames must be in 1..={max}, got {value}")]
    InvalidMaxUnackedFrames { value: usize, max: usize },

    #[error("Duplicate-ACK policy needs a positive threshold and period")]
    InvalidDuplicateAckPolicy,
}

/// Codec failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Codec initialization failed: {0}")]
    Initialization(String),

    #[error("Unsupported input: {0}")]
    Unsupported(String),

    #[error("Encode failed: {0}")]
    Encode(String),
}

/// Why a sender failed to come up
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InitError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Congestion control: {0}")]
    Congestion(#[from] CongestionError),

    #[error("Encoder worker unavailable: {0}")]
    Worker(String),
}

impl From<WorkerError> for InitError {
    fn from(err: WorkerError) -> Self {
        InitError::Worker(err.to_string())
    }
}

/// Outcome of sender construction
///
/// Construction never fails outright: a sender with a bad configuration is
/// still returned and reports the problem here.
#[derive(Debug, Clone, PartialEq)]
pub enum InitializationStatus {
    Initialized,
    Failed(InitError),
}

impl InitializationStatus {
    pub fn is_initialized(&self) -> bool {
        matches!(self, InitializationStatus::Initialized)
    }

    /// The construction error, if any
    pub fn error(&self) -> Option<&InitError> {
        match self {
            InitializationStatus::Initialized => None,
            InitializationStatus::Failed(err) => Some(err),
        }
    }
}

impl fmt::Display for InitializationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitializationStatus::Initialized => write!(f, "initialized"),
            InitializationStatus::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}
