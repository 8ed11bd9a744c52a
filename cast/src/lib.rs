//! Cast - real-time media streaming sender
//!
//! High-level Rust API over the Cast sender core.

pub use cast_io as io;
pub use cast_protocol as protocol;
pub use cast_sender as sender;

// Re-export commonly used types
pub use io::{Clock, ManualClock, SystemClock};
pub use protocol::{CastFeedback, EncodedFrame, FrameId, RtcpChannel, RtpTimestamp, TransportSender};
pub use sender::{
    AudioBus, AudioSender, AudioSenderConfig, InitializationStatus, SenderCollaborators,
    SenderEnvironment, SenderStats, VideoFrame, VideoSender, VideoSenderConfig,
};
