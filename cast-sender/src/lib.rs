//! Cast Sender
//!
//! Audio and video senders built on one media-independent transport
//! controller. Raw media goes in, encoded frames come out to a
//! [`TransportSender`](cast_protocol::TransportSender), and receiver feedback
//! drives retransmission and bitrate.
//!
//! Senders are sans-IO: the owner calls `poll()` whenever `next_deadline()`
//! passes and feeds incoming RTCP packets in.

pub mod audio_encoder;
pub mod audio_sender;
pub mod codec;
pub mod config;
pub mod encoder;
pub mod environment;
pub mod error;
pub mod media;
pub mod policy;
pub mod quantizer;
pub mod sender;
pub mod video_encoder;
pub mod video_sender;

pub use audio_sender::AudioSender;
pub use codec::{AudioCodec, Pcm16Codec, VideoCodec, VideoPayload};
pub use config::{AudioSenderConfig, TransportConfig, VideoSenderConfig};
pub use environment::{SenderCollaborators, SenderEnvironment};
pub use error::{CodecError, ConfigError, InitError, InitializationStatus};
pub use media::{AudioBus, VideoFrame};
pub use quantizer::FrameQuantizer;
pub use sender::{FrameTransportController, SenderStats, TransportWindowState};
pub use video_sender::VideoSender;
