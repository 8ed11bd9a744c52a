//! Receiver feedback
//!
//! Models the ACK/NACK content of a receiver's cast feedback message and the
//! resend requests derived from it. The wire format is handled by the RTCP
//! channel; this module only describes the decoded contents.

use crate::frame_id::FrameId;
use std::collections::BTreeSet;
use std::time::Duration;

/// Packet index within a frame
pub type PacketId = u16;

/// Set of packet indices within one frame
pub type PacketIdSet = BTreeSet<PacketId>;

/// Reserved packet ID meaning "the last packet of the frame"
pub const LAST_PACKET: PacketId = 0xfffe;

/// Reserved packet ID meaning "every packet of the frame"
pub const ALL_PACKETS_LOST: PacketId = 0xffff;

/// Frames and the packets within them that a receiver is missing
///
/// Entries keep the order in which they were added. An empty packet set on an
/// entry is used when cancelling pending retransmissions of an acked frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingFramesAndPackets {
    entries: Vec<(FrameId, PacketIdSet)>,
}

impl MissingFramesAndPackets {
    pub fn new() -> Self {
        MissingFramesAndPackets {
            entries: Vec::new(),
        }
    }

    /// Request for a single packet that prompts the receiver to NACK precisely
    pub fn kickstart(frame_id: FrameId) -> Self {
        let mut missing = Self::new();
        missing.insert_packet(frame_id, LAST_PACKET);
        missing
    }

    /// Cancel requests for every frame in `(after, through]`
    pub fn cancellations(after: FrameId, through: FrameId) -> Self {
        let mut missing = Self::new();
        let mut frame_id = after;
        while through.is_newer_than(frame_id) {
            frame_id.increment();
            missing.insert_frame(frame_id);
        }
        missing
    }

    /// Add a frame with no specific packets
    pub fn insert_frame(&mut self, frame_id: FrameId) {
        if !self.entries.iter().any(|(id, _)| *id == frame_id) {
            self.entries.push((frame_id, PacketIdSet::new()));
        }
    }

    /// Add a packet of a frame
    pub fn insert_packet(&mut self, frame_id: FrameId, packet_id: PacketId) {
        match self.entries.iter_mut().find(|(id, _)| *id == frame_id) {
            Some((_, packets)) => {
                packets.insert(packet_id);
            }
            None => {
                let mut packets = PacketIdSet::new();
                packets.insert(packet_id);
                self.entries.push((frame_id, packets));
            }
        }
    }

    /// Packets requested for a frame, if the frame is present
    pub fn packets(&self, frame_id: FrameId) -> Option<&PacketIdSet> {
        self.entries
            .iter()
            .find(|(id, _)| *id == frame_id)
            .map(|(_, packets)| packets)
    }

    /// Iterate over frames and their packet sets
    pub fn iter(&self) -> impl Iterator<Item = (FrameId, &PacketIdSet)> {
        self.entries.iter().map(|(id, packets)| (*id, packets))
    }

    /// Frame IDs in insertion order
    pub fn frame_ids(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(FrameId, PacketIdSet)> for MissingFramesAndPackets {
    fn from_iter<I: IntoIterator<Item = (FrameId, PacketIdSet)>>(iter: I) -> Self {
        let mut missing = Self::new();
        for (frame_id, packets) in iter {
            missing.insert_frame(frame_id);
            for packet_id in packets {
                missing.insert_packet(frame_id, packet_id);
            }
        }
        missing
    }
}

/// Decoded cast feedback from the receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastFeedback {
    /// Latest frame the receiver has completely received, along with all
    /// frames before it
    pub ack_frame_id: FrameId,
    /// Losses the receiver wants retransmitted (NACK); empty for a pure ACK
    pub missing_frames_and_packets: MissingFramesAndPackets,
}

impl CastFeedback {
    /// Pure acknowledgement
    pub fn ack(ack_frame_id: FrameId) -> Self {
        CastFeedback {
            ack_frame_id,
            missing_frames_and_packets: MissingFramesAndPackets::new(),
        }
    }

    /// Acknowledgement plus a NACK for missing packets
    pub fn nack(ack_frame_id: FrameId, missing: MissingFramesAndPackets) -> Self {
        CastFeedback {
            ack_frame_id,
            missing_frames_and_packets: missing,
        }
    }

    /// Check if this feedback carries loss information
    pub fn has_nack(&self) -> bool {
        !self.missing_frames_and_packets.is_empty()
    }
}

/// Round-trip time measurements from the RTCP channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttStats {
    /// Most recent sample
    pub current: Duration,
    /// Average over the session
    pub avg: Duration,
    /// Smallest sample seen
    pub min: Duration,
    /// Largest sample seen
    pub max: Duration,
}

impl RttStats {
    /// Stats built from a single sample
    pub fn single(rtt: Duration) -> Self {
        RttStats {
            current: rtt,
            avg: rtt,
            min: rtt,
            max: rtt,
        }
    }
}
