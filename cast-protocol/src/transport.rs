//! Collaborator interfaces
//!
//! The sender core decides what to send and when; these traits are the seams
//! to the packetizer/socket layer and the RTCP session that actually do it.

use crate::feedback::{CastFeedback, MissingFramesAndPackets, RttStats};
use crate::frame::EncodedFrame;
use crate::frame_id::RtpTimestamp;
use std::time::{Duration, Instant};

/// Packetizes frames and puts them on the wire
pub trait TransportSender {
    /// Take ownership of an encoded frame for transmission
    fn insert_coded_frame(&mut self, frame: EncodedFrame);

    /// Retransmit, or cancel pending retransmissions of, the given packets
    ///
    /// With `cancel_pending` set, every listed frame is considered received
    /// and any queued retransmission for it is dropped.
    fn resend_packets(
        &mut self,
        is_audio: bool,
        missing: &MissingFramesAndPackets,
        cancel_pending: bool,
        rtt_hint: Duration,
    );
}

/// RTCP session for one media stream
pub trait RtcpChannel {
    /// Send a sender report stamped with `now` on the RTP timeline
    fn send_report(&mut self, now: Instant, rtp_timestamp: RtpTimestamp);

    /// Parse an incoming RTCP packet, yielding cast feedback if it carried any
    fn incoming_packet(&mut self, packet: &[u8]) -> Option<CastFeedback>;

    /// RTT measurements, once the receiver has reported back
    fn rtt(&self) -> Option<RttStats>;
}

impl<T: TransportSender + ?Sized> TransportSender for Box<T> {
    fn insert_coded_frame(&mut self, frame: EncodedFrame) {
        (**self).insert_coded_frame(frame)
    }

    fn resend_packets(
        &mut self,
        is_audio: bool,
        missing: &MissingFramesAndPackets,
        cancel_pending: bool,
        rtt_hint: Duration,
    ) {
        (**self).resend_packets(is_audio, missing, cancel_pending, rtt_hint)
    }
}

impl<T: RtcpChannel + ?Sized> RtcpChannel for Box<T> {
    fn send_report(&mut self, now: Instant, rtp_timestamp: RtpTimestamp) {
        (**self).send_report(now, rtp_timestamp)
    }

    fn incoming_packet(&mut self, packet: &[u8]) -> Option<CastFeedback> {
        (**self).incoming_packet(packet)
    }

    fn rtt(&self) -> Option<RttStats> {
        (**self).rtt()
    }
}
