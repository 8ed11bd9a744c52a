//! Cast Streaming Protocol Core
//!
//! This crate holds the sender-side protocol state that does not depend on
//! threads or clocks: wrapping frame IDs and RTP timestamps, encoded frames,
//! receiver feedback, the RTP timeline mapper, and congestion control.

pub mod congestion;
pub mod feedback;
pub mod frame;
pub mod frame_id;
pub mod timestamp;
pub mod transport;

pub use congestion::{
    new_congestion_control, AdaptiveCongestionControl, CongestionControl, CongestionError,
    CongestionStats, FixedCongestionControl,
};
pub use feedback::{
    CastFeedback, MissingFramesAndPackets, PacketId, PacketIdSet, RttStats, ALL_PACKETS_LOST,
    LAST_PACKET,
};
pub use frame::{Dependency, EncodedFrame};
pub use frame_id::{FrameId, RtpTimestamp};
pub use timestamp::RtpTimestampMapper;
pub use transport::{RtcpChannel, TransportSender};
