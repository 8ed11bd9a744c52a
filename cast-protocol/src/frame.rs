//! Encoded media frames
//!
//! An [`EncodedFrame`] is the unit handed from an encoder to the transport.

use crate::frame_id::{FrameId, RtpTimestamp};
use bytes::Bytes;
use std::time::Instant;

/// Decode dependency of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// Decodable on its own
    Key,
    /// Needs `referenced_frame_id` to decode
    Dependent,
}

/// A single unit of media ready for network transport
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Whether the frame can be decoded standalone
    pub dependency: Dependency,
    /// Frame identifier, assigned by the encoder
    pub frame_id: FrameId,
    /// Frame this one needs for decode (itself for key frames)
    pub referenced_frame_id: FrameId,
    /// Media timeline position of the first sample
    pub rtp_timestamp: RtpTimestamp,
    /// Capture time used by the receiver for lip-sync
    pub reference_time: Instant,
    /// Encoded payload
    pub data: Bytes,
}

impl EncodedFrame {
    /// Create a key frame, which references itself
    pub fn key(
        frame_id: FrameId,
        rtp_timestamp: RtpTimestamp,
        reference_time: Instant,
        data: Bytes,
    ) -> Self {
        EncodedFrame {
            dependency: Dependency::Key,
            frame_id,
            referenced_frame_id: frame_id,
            rtp_timestamp,
            reference_time,
            data,
        }
    }

    /// Create a frame that depends on `referenced_frame_id`
    pub fn dependent(
        frame_id: FrameId,
        referenced_frame_id: FrameId,
        rtp_timestamp: RtpTimestamp,
        reference_time: Instant,
        data: Bytes,
    ) -> Self {
        EncodedFrame {
            dependency: Dependency::Dependent,
            frame_id,
            referenced_frame_id,
            rtp_timestamp,
            reference_time,
            data,
        }
    }

    /// Check if this is a key frame
    #[inline]
    pub fn is_key_frame(&self) -> bool {
        self.dependency == Dependency::Key
    }

    /// Payload size in bits, as accounted by congestion control
    #[inline]
    pub fn size_bits(&self) -> u64 {
        self.data.len() as u64 * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_frame_references_itself() {
        let frame = EncodedFrame::key(
            FrameId::new(7),
            RtpTimestamp::new(3360),
            Instant::now(),
            Bytes::from_static(b"abc"),
        );
        assert!(frame.is_key_frame());
        assert_eq!(frame.referenced_frame_id, FrameId::new(7));
        assert_eq!(frame.size_bits(), 24);
    }

    #[test]
    fn test_dependent_frame() {
        let frame = EncodedFrame::dependent(
            FrameId::new(8),
            FrameId::new(6),
            RtpTimestamp::new(0),
            Instant::now(),
            Bytes::new(),
        );
        assert!(!frame.is_key_frame());
        assert_eq!(frame.referenced_frame_id, FrameId::new(6));
    }
}
