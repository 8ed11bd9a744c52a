//! Simulated network link and receiver
//!
//! Frames handed to the link are split into packets, serialized through a
//! bottleneck of fixed capacity, randomly dropped, and delivered after a
//! constant one-way delay to a receiver that reassembles them. The receiver
//! answers with cumulative ACKs, NACKing packets missing below the newest
//! frame it has seen; that feedback travels back with the same delay.

use crate::config::LinkConfig;
use cast_io::Clock;
use cast_protocol::{
    CastFeedback, EncodedFrame, FrameId, MissingFramesAndPackets, PacketId, RtcpChannel,
    RtpTimestamp, RttStats, TransportSender, ALL_PACKETS_LOST, LAST_PACKET,
};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// How often a receiver with gaps repeats its feedback
const FEEDBACK_INTERVAL: Duration = Duration::from_millis(33);

/// Link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub packets_sent: u64,
    pub packets_lost: u64,
    pub packets_retransmitted: u64,
    pub frames_completed: u64,
    pub feedback_sent: u64,
    pub reports_received: u64,
}

#[derive(Debug, Clone, Copy)]
struct Packet {
    frame_id: FrameId,
    packet_id: PacketId,
    total: u16,
    arrival: Instant,
}

#[derive(Debug, Default)]
struct FrameAssembly {
    total: u16,
    received: BTreeSet<PacketId>,
}

impl FrameAssembly {
    fn is_complete(&self) -> bool {
        self.received.len() == self.total as usize
    }
}

/// Receiving end: reassembles frames and produces feedback
#[derive(Debug)]
struct ReceiverState {
    next_expected: FrameId,
    highest_seen: Option<FrameId>,
    frames: HashMap<FrameId, FrameAssembly>,
    last_feedback: Option<Instant>,
}

impl ReceiverState {
    fn new() -> Self {
        ReceiverState {
            next_expected: FrameId::FIRST,
            highest_seen: None,
            frames: HashMap::new(),
            last_feedback: None,
        }
    }

    /// Record a packet; returns the number of frames newly completed in order
    fn on_packet(&mut self, packet: &Packet) -> u64 {
        if packet.frame_id.is_older_than(self.next_expected) {
            return 0;
        }
        let assembly = self.frames.entry(packet.frame_id).or_default();
        assembly.total = packet.total;
        assembly.received.insert(packet.packet_id);
        if self
            .highest_seen
            .map_or(true, |seen| packet.frame_id.is_newer_than(seen))
        {
            self.highest_seen = Some(packet.frame_id);
        }

        let mut completed = 0;
        while self
            .frames
            .get(&self.next_expected)
            .map_or(false, FrameAssembly::is_complete)
        {
            self.frames.remove(&self.next_expected);
            self.next_expected.increment();
            completed += 1;
        }
        completed
    }

    fn has_gaps(&self) -> bool {
        self.highest_seen
            .map_or(false, |seen| seen.is_newer_or_equal(self.next_expected))
    }

    fn feedback(&self) -> CastFeedback {
        let ack_frame_id = self.next_expected.prev();
        let Some(highest_seen) = self.highest_seen else {
            return CastFeedback::ack(ack_frame_id);
        };

        let mut missing = MissingFramesAndPackets::new();
        let mut frame_id = self.next_expected;
        while highest_seen.is_newer_or_equal(frame_id) {
            match self.frames.get(&frame_id) {
                Some(assembly) if assembly.is_complete() => {}
                Some(assembly) => {
                    for packet_id in 0..assembly.total {
                        if !assembly.received.contains(&packet_id) {
                            missing.insert_packet(frame_id, packet_id);
                        }
                    }
                }
                None => missing.insert_packet(frame_id, ALL_PACKETS_LOST),
            }
            frame_id.increment();
        }

        if missing.is_empty() {
            CastFeedback::ack(ack_frame_id)
        } else {
            CastFeedback::nack(ack_frame_id, missing)
        }
    }
}

/// Lossy, delayed, rate-limited path plus the receiver behind it
pub struct SimulatedLink {
    clock: Arc<dyn Clock>,
    config: LinkConfig,
    rng: SmallRng,
    link_free_at: Instant,
    in_flight: VecDeque<Packet>,
    /// Packet counts of frames the sender may still retransmit
    sent_frames: HashMap<FrameId, u16>,
    receiver: ReceiverState,
    feedback: VecDeque<(Instant, CastFeedback)>,
    rtt: Option<RttStats>,
    stats: LinkStats,
}

impl SimulatedLink {
    pub fn new(clock: Arc<dyn Clock>, config: &LinkConfig) -> Self {
        let now = clock.now();
        SimulatedLink {
            clock,
            config: config.clone(),
            rng: SmallRng::seed_from_u64(config.seed),
            link_free_at: now,
            in_flight: VecDeque::new(),
            sent_frames: HashMap::new(),
            receiver: ReceiverState::new(),
            feedback: VecDeque::new(),
            rtt: None,
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    fn serialization_time(&self, bytes: usize) -> Duration {
        if self.config.capacity_kbps == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(bytes as u64 * 8 * 1000 / self.config.capacity_kbps)
    }

    fn enqueue(&mut self, frame_id: FrameId, packet_id: PacketId, total: u16, bytes: usize) {
        let now = self.clock.now();
        let start = self.link_free_at.max(now);
        self.link_free_at = start + self.serialization_time(bytes);
        self.stats.packets_sent += 1;

        if self.rng.gen_bool(self.config.loss_percent / 100.0) {
            trace!("Link dropped packet {} of frame {}", packet_id, frame_id);
            self.stats.packets_lost += 1;
            return;
        }
        self.in_flight.push_back(Packet {
            frame_id,
            packet_id,
            total,
            arrival: self.link_free_at + self.config.one_way_delay(),
        });
    }

    fn resend_frame_packets(&mut self, frame_id: FrameId, packets: &BTreeSet<PacketId>) {
        let Some(&total) = self.sent_frames.get(&frame_id) else {
            return;
        };
        let packet_ids: Vec<PacketId> = if packets.is_empty() || packets.contains(&ALL_PACKETS_LOST)
        {
            (0..total).collect()
        } else {
            packets
                .iter()
                .map(|&id| if id == LAST_PACKET { total - 1 } else { id })
                .filter(|&id| id < total)
                .collect()
        };
        for packet_id in packet_ids {
            self.stats.packets_retransmitted += 1;
            self.enqueue(frame_id, packet_id, total, self.config.packet_size);
        }
    }

    /// Deliver arrivals up to `now` and return feedback due at the sender
    pub fn step(&mut self, now: Instant) -> Vec<CastFeedback> {
        let mut completed = 0;
        while let Some(packet) = self.in_flight.front().copied() {
            if packet.arrival > now {
                break;
            }
            self.in_flight.pop_front();
            completed += self.receiver.on_packet(&packet);
        }
        self.stats.frames_completed += completed;

        let periodic_due = self.receiver.has_gaps()
            && self
                .receiver
                .last_feedback
                .map_or(true, |at| now.saturating_duration_since(at) >= FEEDBACK_INTERVAL);
        if completed > 0 || periodic_due {
            let feedback = self.receiver.feedback();
            self.feedback
                .push_back((now + self.config.one_way_delay(), feedback));
            self.receiver.last_feedback = Some(now);
            self.stats.feedback_sent += 1;
        }

        let mut due = Vec::new();
        while let Some((at, _)) = self.feedback.front() {
            if *at > now {
                break;
            }
            if let Some((_, feedback)) = self.feedback.pop_front() {
                due.push(feedback);
            }
        }
        if !due.is_empty() && self.rtt.is_none() {
            self.rtt = Some(RttStats::single(self.config.one_way_delay() * 2));
        }
        due
    }
}

/// Sender-facing transport half of a shared link
pub struct LinkTransport(pub Arc<Mutex<SimulatedLink>>);

impl TransportSender for LinkTransport {
    fn insert_coded_frame(&mut self, frame: EncodedFrame) {
        let mut link = self.0.lock();
        let packet_size = link.config.packet_size;
        let total = ((frame.data.len() + packet_size - 1) / packet_size).max(1) as u16;
        link.sent_frames.insert(frame.frame_id, total);
        for (packet_id, chunk) in frame.data.chunks(packet_size).enumerate() {
            link.enqueue(frame.frame_id, packet_id as PacketId, total, chunk.len());
        }
    }

    fn resend_packets(
        &mut self,
        _is_audio: bool,
        missing: &MissingFramesAndPackets,
        cancel_pending: bool,
        _rtt_hint: Duration,
    ) {
        let mut link = self.0.lock();
        for (frame_id, packets) in missing.iter() {
            if cancel_pending {
                link.sent_frames.remove(&frame_id);
            } else {
                link.resend_frame_packets(frame_id, packets);
            }
        }
    }
}

/// Sender-facing RTCP half of a shared link
pub struct LinkRtcp(pub Arc<Mutex<SimulatedLink>>);

impl RtcpChannel for LinkRtcp {
    fn send_report(&mut self, _now: Instant, _rtp_timestamp: RtpTimestamp) {
        self.0.lock().stats.reports_received += 1;
    }

    fn incoming_packet(&mut self, _packet: &[u8]) -> Option<CastFeedback> {
        // Feedback is handed over already decoded by `SimulatedLink::step`
        None
    }

    fn rtt(&self) -> Option<RttStats> {
        self.0.lock().rtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cast_io::ManualClock;

    fn lossless() -> LinkConfig {
        LinkConfig {
            loss_percent: 0.0,
            one_way_delay_ms: 10,
            capacity_kbps: 0,
            packet_size: 100,
            seed: 7,
        }
    }

    fn frame(id: u32, bytes: usize) -> EncodedFrame {
        EncodedFrame::key(
            FrameId::new(id),
            RtpTimestamp::new(id * 480),
            Instant::now(),
            Bytes::from(vec![0u8; bytes]),
        )
    }

    fn setup(config: LinkConfig) -> (Arc<ManualClock>, Arc<Mutex<SimulatedLink>>, LinkTransport) {
        let clock = Arc::new(ManualClock::new());
        let link = Arc::new(Mutex::new(SimulatedLink::new(clock.clone(), &config)));
        let transport = LinkTransport(link.clone());
        (clock, link, transport)
    }

    #[test]
    fn test_frame_acked_after_round_trip() {
        let (clock, link, mut transport) = setup(lossless());
        transport.insert_coded_frame(frame(0, 250));
        assert_eq!(link.lock().stats().packets_sent, 3);

        clock.advance(Duration::from_millis(10));
        assert!(link.lock().step(clock.now()).is_empty());

        clock.advance(Duration::from_millis(10));
        let feedback = link.lock().step(clock.now());
        assert_eq!(feedback, vec![CastFeedback::ack(FrameId::new(0))]);
        assert_eq!(link.lock().stats().frames_completed, 1);
        assert!(LinkRtcp(link.clone()).rtt().is_some());
    }

    #[test]
    fn test_missing_packets_nacked() {
        let (clock, link, mut transport) = setup(lossless());
        transport.insert_coded_frame(frame(0, 250));
        transport.insert_coded_frame(frame(1, 50));

        // Lose packet 1 of frame 0 in transit
        link.lock()
            .in_flight
            .retain(|p| !(p.frame_id == FrameId::new(0) && p.packet_id == 1));

        clock.advance(Duration::from_millis(10));
        link.lock().step(clock.now());
        clock.advance(Duration::from_millis(10));
        let feedback = link.lock().step(clock.now());

        let mut expected = MissingFramesAndPackets::new();
        expected.insert_packet(FrameId::new(0), 1);
        assert_eq!(
            feedback,
            vec![CastFeedback::nack(FrameId::new(u32::MAX), expected.clone())]
        );

        // The resend completes both frames
        transport.resend_packets(false, &expected, false, Duration::ZERO);
        assert_eq!(link.lock().stats().packets_retransmitted, 1);
        clock.advance(Duration::from_millis(10));
        link.lock().step(clock.now());
        assert_eq!(link.lock().stats().frames_completed, 2);
    }

    #[test]
    fn test_kickstart_resends_last_packet() {
        let (_clock, link, mut transport) = setup(lossless());
        transport.insert_coded_frame(frame(0, 250));

        transport.resend_packets(
            true,
            &MissingFramesAndPackets::kickstart(FrameId::new(0)),
            false,
            Duration::ZERO,
        );
        let link = link.lock();
        let last = link.in_flight.back().unwrap();
        assert_eq!((last.frame_id, last.packet_id), (FrameId::new(0), 2));
    }

    #[test]
    fn test_cancelled_frames_not_resent() {
        let (_clock, link, mut transport) = setup(lossless());
        transport.insert_coded_frame(frame(0, 50));
        transport.resend_packets(
            true,
            &MissingFramesAndPackets::cancellations(FrameId::new(u32::MAX), FrameId::new(0)),
            true,
            Duration::ZERO,
        );
        transport.resend_packets(
            true,
            &MissingFramesAndPackets::kickstart(FrameId::new(0)),
            false,
            Duration::ZERO,
        );
        assert_eq!(link.lock().stats().packets_retransmitted, 0);
    }

    #[test]
    fn test_capacity_spaces_packets() {
        let config = LinkConfig {
            capacity_kbps: 800,
            ..lossless()
        };
        let (_clock, link, mut transport) = setup(config);
        transport.insert_coded_frame(frame(0, 200));

        // 100 bytes at 800 kbit/s is 1 ms per packet
        let link = link.lock();
        let arrivals: Vec<Instant> = link.in_flight.iter().map(|p| p.arrival).collect();
        assert_eq!(arrivals[1] - arrivals[0], Duration::from_millis(1));
    }
}
