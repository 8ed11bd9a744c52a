//! Frame transport controller
//!
//! Media-independent sender logic shared by audio and video:
//!
//! - in-flight window: a submission is dropped when the frames it would
//!   complete, added to those unacknowledged or still encoding, exceed the
//!   limit
//! - bitrate: every encode request carries the congestion controller's target
//! - reliability: NACKs are forwarded to the transport, forward ACKs cancel
//!   pending retransmissions, and a stalled receiver is "kickstarted" by
//!   resending the last packet of the newest frame
//! - RTCP: sender reports go out with every frame until the RTT is known,
//!   then on a fixed interval
//!
//! The controller does no I/O and owns no threads. The driver calls
//! [`FrameTransportController::poll`] whenever
//! [`FrameTransportController::next_deadline`] passes; `poll` delivers
//! completed encodes in submission order and then runs due timers.

use crate::config::TransportConfig;
use crate::encoder::{BoxedEncoder, EncoderCommand, EncoderOutput};
use crate::environment::SenderCollaborators;
use crate::policy::MediaPolicy;
use cast_io::time::earliest;
use cast_io::{Clock, Lifeline, Timer, Worker};
use cast_protocol::congestion::DEFAULT_RTT;
use cast_protocol::{
    CastFeedback, CongestionControl, CongestionStats, EncodedFrame, FrameId,
    MissingFramesAndPackets, RtcpChannel, RtpTimestamp, RtpTimestampMapper, TransportSender,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Entries in the frame ID to RTP timestamp ring
const RTP_HISTORY_SIZE: usize = 256;

/// Acknowledgement bookkeeping for the sent frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportWindowState {
    pub last_sent_frame_id: FrameId,
    pub latest_acked_frame_id: FrameId,
    pub duplicate_ack_counter: u32,
    /// Whole frames the encoder still owes for input it has queued
    pub frames_in_encoder: u32,
    pub num_aggressive_reports_sent: u32,
}

/// Counters for one sender
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub frames_submitted: u64,
    /// Submissions refused because the in-flight window was full
    pub frames_dropped: u64,
    pub frames_encoded: u64,
    pub encode_failures: u64,
    pub bytes_sent: u64,
    pub kickstarts: u64,
    pub nack_resends: u64,
    pub reports_sent: u64,
    pub acks_received: u64,
    pub duplicate_acks: u64,
    pub out_of_order_acks: u64,
    /// Bitrate requested for the latest encode
    pub current_bitrate: u32,
}

/// Sender-side frame lifecycle for raw media of type `R`
pub struct FrameTransportController<R: Send + 'static> {
    clock: Arc<dyn Clock>,
    policy: Box<dyn MediaPolicy>,
    target_playout_delay: Duration,
    rtcp_interval: Duration,
    max_unacked_frames: usize,
    aggressive_report_count: u32,
    duplicate_ack_threshold: u32,
    duplicate_ack_period: u32,

    // Dropped before the worker so its pending outputs are discarded
    lifeline: Lifeline,
    encoder: Worker<BoxedEncoder<R>>,
    transport: Box<dyn TransportSender + Send>,
    rtcp: Box<dyn RtcpChannel + Send>,
    congestion: Box<dyn CongestionControl>,
    rtp_mapper: RtpTimestampMapper,

    window: TransportWindowState,
    /// Queued encoder input, in units of `policy.input_per_frame()`
    input_in_encoder: usize,
    /// Last time any frame was sent or resent; None until the first frame
    last_send_time: Option<Instant>,
    current_round_trip_time: Duration,
    resend_timer: Timer,
    report_timer: Timer,
    frame_id_to_rtp_timestamp: [RtpTimestamp; RTP_HISTORY_SIZE],
    stats: SenderStats,
}

impl<R: Send + 'static> FrameTransportController<R> {
    /// Create a controller; `config` must already be validated
    pub fn new(
        clock: Arc<dyn Clock>,
        config: &TransportConfig,
        policy: Box<dyn MediaPolicy>,
        encoder: Worker<BoxedEncoder<R>>,
        congestion: Box<dyn CongestionControl>,
        collaborators: SenderCollaborators,
        rtp_timebase: u32,
    ) -> Self {
        let max_unacked_frames = config.max_unacked_frames_for(policy.max_frame_rate());
        debug!(
            "Creating {} sender: playout delay {:?}, max {} unacked frames",
            policy.name(),
            config.target_playout_delay(),
            max_unacked_frames
        );

        FrameTransportController {
            clock,
            policy,
            target_playout_delay: config.target_playout_delay(),
            rtcp_interval: config.rtcp_interval(),
            max_unacked_frames,
            aggressive_report_count: config.aggressive_report_count,
            duplicate_ack_threshold: config.duplicate_ack_threshold,
            duplicate_ack_period: config.duplicate_ack_period,
            lifeline: Lifeline::new(),
            encoder,
            transport: collaborators.transport,
            rtcp: collaborators.rtcp,
            congestion,
            rtp_mapper: RtpTimestampMapper::new(rtp_timebase),
            window: TransportWindowState::default(),
            input_in_encoder: 0,
            last_send_time: None,
            current_round_trip_time: DEFAULT_RTT,
            resend_timer: Timer::new(),
            report_timer: Timer::new(),
            frame_id_to_rtp_timestamp: [RtpTimestamp::default(); RTP_HISTORY_SIZE],
            stats: SenderStats::default(),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.policy.is_audio()
    }

    pub fn max_unacked_frames(&self) -> usize {
        self.max_unacked_frames
    }

    pub fn target_playout_delay(&self) -> Duration {
        self.target_playout_delay
    }

    pub fn window(&self) -> TransportWindowState {
        self.window
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    pub fn congestion_stats(&self) -> CongestionStats {
        self.congestion.stats()
    }

    /// RTT used for retransmission hints
    pub fn current_round_trip_time(&self) -> Duration {
        self.current_round_trip_time
    }

    /// Frames sent but not yet acknowledged, plus those still encoding
    pub fn frames_in_flight(&self) -> i32 {
        self.frames_unacked() + self.window.frames_in_encoder as i32
    }

    fn frames_unacked(&self) -> i32 {
        if self.last_send_time.is_none() {
            return 0;
        }
        self.window
            .latest_acked_frame_id
            .distance_to(self.window.last_sent_frame_id)
    }

    fn frames_for_input(&self, input: usize) -> u32 {
        (input / self.policy.input_per_frame().max(1)) as u32
    }

    /// Whether `input` more units would push the window past its limit
    fn are_too_many_frames_in_flight(&self, input: usize) -> bool {
        let in_encoder = self.frames_for_input(self.input_in_encoder + input);
        let in_flight = self.frames_unacked() + in_encoder as i32;
        trace!(
            "{} frames in flight with submission; last sent: {}; latest acked: {}; in encoder: {}",
            in_flight,
            self.window.last_sent_frame_id,
            self.window.latest_acked_frame_id,
            in_encoder
        );
        in_flight > self.max_unacked_frames as i32
    }

    fn queue_input(&mut self, input: usize) {
        self.input_in_encoder += input;
        self.window.frames_in_encoder = self.frames_for_input(self.input_in_encoder);
    }

    fn release_input(&mut self, input: usize) {
        self.input_in_encoder = self.input_in_encoder.saturating_sub(input);
        self.window.frames_in_encoder = self.frames_for_input(self.input_in_encoder);
    }

    /// Request encoding of one frame's worth of `raw` captured at `capture_time`
    ///
    /// Returns false if the submission was dropped, either because the
    /// in-flight window is full or the encoder is gone.
    pub fn submit_frame(&mut self, raw: R, capture_time: Instant) -> bool {
        let input = self.policy.input_per_frame();
        self.submit_input(raw, capture_time, input)
    }

    /// Request encoding of `raw`, which holds `input` units of media
    ///
    /// Audio bursts may span several frames or only part of one; every frame
    /// the burst would complete counts against the in-flight window.
    pub fn submit_input(&mut self, raw: R, capture_time: Instant, input: usize) -> bool {
        self.stats.frames_submitted += 1;
        if self.are_too_many_frames_in_flight(input) {
            debug!(
                "Dropping {} frame due to too many frames currently in flight",
                self.policy.name()
            );
            self.stats.frames_dropped += 1;
            return false;
        }

        let now = self.clock.now();
        let target_bitrate = self.congestion.get_bitrate(
            now,
            capture_time + self.target_playout_delay,
            self.target_playout_delay,
        );
        self.stats.current_bitrate = target_bitrate;

        let command = EncoderCommand::Encode {
            raw,
            capture_time,
            target_bitrate,
        };
        // Count before handing off: an inline encoder reports back immediately
        self.queue_input(input);
        match self.encoder.submit(self.lifeline.token(), command) {
            Ok(()) => true,
            Err(err) => {
                warn!("Cannot submit {} frame to encoder: {}", self.policy.name(), err);
                self.release_input(input);
                false
            }
        }
    }

    pub(crate) fn send_encoder_command(&mut self, command: EncoderCommand<R>) {
        if let Err(err) = self.encoder.submit(self.lifeline.token(), command) {
            warn!("Cannot reach {} encoder: {}", self.policy.name(), err);
        }
    }

    /// Deliver completed encodes and run due timers
    pub fn poll(&mut self) {
        for output in self.encoder.drain() {
            match output {
                EncoderOutput::Frame(frame) => self.on_frame_encoded(frame),
                EncoderOutput::Failed => self.on_encode_failed(),
                EncoderOutput::Discarded(input) => {
                    debug!("{} encoder discarded {} units of input", self.policy.name(), input);
                    self.release_input(input);
                }
            }
        }

        let now = self.clock.now();
        if self.resend_timer.try_fire(now) {
            self.resend_check(now);
        }
        if self.report_timer.try_fire(now) {
            self.send_rtcp_report(now, true);
        }
    }

    /// When `poll` next has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.encoder.has_pending() {
            return Some(self.clock.now());
        }
        earliest([self.resend_timer.deadline(), self.report_timer.deadline()])
    }

    fn on_encode_failed(&mut self) {
        self.release_input(self.policy.input_per_frame());
        self.stats.encode_failures += 1;
    }

    fn on_frame_encoded(&mut self, frame: EncodedFrame) {
        self.release_input(self.policy.input_per_frame());

        let now = self.clock.now();
        let frame_id = frame.frame_id;
        let size_bits = frame.size_bits();
        let is_first_frame = self.last_send_time.is_none();

        self.last_send_time = Some(now);
        self.window.last_sent_frame_id = frame_id;
        if is_first_frame {
            // Treat the frame before the first one as acked
            self.window.latest_acked_frame_id = frame_id.prev();
            self.schedule_next_resend_check(now);
        }

        trace!(
            "Sending {} frame {} (rtp {}, {} bytes, key: {})",
            self.policy.name(),
            frame_id,
            frame.rtp_timestamp,
            frame.data.len(),
            frame.is_key_frame()
        );

        self.frame_id_to_rtp_timestamp[frame_id.as_raw() as usize % RTP_HISTORY_SIZE] =
            frame.rtp_timestamp;
        self.rtp_mapper
            .store_latest_time(frame.reference_time, frame.rtp_timestamp);

        self.stats.frames_encoded += 1;
        self.stats.bytes_sent += frame.data.len() as u64;
        self.transport.insert_coded_frame(frame);
        self.congestion.send_frame_to_transport(frame_id, size_bits, now);

        if self.window.num_aggressive_reports_sent < self.aggressive_report_count {
            self.window.num_aggressive_reports_sent += 1;
            let is_last_aggressive_report =
                self.window.num_aggressive_reports_sent == self.aggressive_report_count;
            if is_last_aggressive_report {
                debug!("Sending last aggressive report");
            }
            self.send_rtcp_report(now, is_last_aggressive_report);
        }
    }

    fn send_rtcp_report(&mut self, now: Instant, schedule_future_reports: bool) {
        match self.rtp_mapper.current_time_as_rtp_timestamp(now) {
            Some(rtp_timestamp) => {
                self.rtcp.send_report(now, rtp_timestamp);
                self.stats.reports_sent += 1;
            }
            None => debug!("No RTP timeline yet; skipping sender report"),
        }
        if schedule_future_reports {
            self.report_timer.arm_after(now, self.rtcp_interval);
        }
    }

    fn schedule_next_resend_check(&mut self, now: Instant) {
        let Some(last_send_time) = self.last_send_time else {
            return;
        };
        // With nothing unacked the check only has to outlast the next send
        let deadline = if self.window.latest_acked_frame_id == self.window.last_sent_frame_id {
            now + self.target_playout_delay
        } else {
            last_send_time + self.target_playout_delay
        };
        self.resend_timer.arm_at(now, deadline);
    }

    fn resend_check(&mut self, now: Instant) {
        if let Some(last_send_time) = self.last_send_time {
            if now.saturating_duration_since(last_send_time) > self.target_playout_delay {
                if self.window.latest_acked_frame_id == self.window.last_sent_frame_id {
                    trace!("All sent {} frames have been acked", self.policy.name());
                } else {
                    debug!(
                        "ACK timeout; last acked {} frame: {}",
                        self.policy.name(),
                        self.window.latest_acked_frame_id
                    );
                    self.resend_for_kickstart(now);
                }
            }
        }
        self.schedule_next_resend_check(now);
    }

    /// Resend the last packet of the newest frame to prompt a NACK
    fn resend_for_kickstart(&mut self, now: Instant) {
        let frame_id = self.window.last_sent_frame_id;
        debug!(
            "Resending last packet of {} frame {} to kick-start",
            self.policy.name(),
            frame_id
        );
        self.last_send_time = Some(now);
        self.stats.kickstarts += 1;
        self.transport.resend_packets(
            self.policy.is_audio(),
            &MissingFramesAndPackets::kickstart(frame_id),
            false,
            self.current_round_trip_time,
        );
    }

    /// Handle a raw RTCP packet from the receiver
    pub fn on_incoming_rtcp_packet(&mut self, packet: &[u8]) {
        if let Some(feedback) = self.rtcp.incoming_packet(packet) {
            self.on_cast_feedback(&feedback);
        }
    }

    /// Handle decoded receiver feedback
    pub fn on_cast_feedback(&mut self, feedback: &CastFeedback) {
        let now = self.clock.now();
        let min_rtt = match self.rtcp.rtt() {
            Some(rtt) => {
                self.congestion.update_rtt(rtt.current);
                self.current_round_trip_time = rtt.current.max(rtt.avg);

                if self.window.num_aggressive_reports_sent < self.aggressive_report_count {
                    info!(
                        "No longer a need to send {} reports aggressively (sent {})",
                        self.policy.name(),
                        self.window.num_aggressive_reports_sent
                    );
                    self.window.num_aggressive_reports_sent = self.aggressive_report_count;
                    self.report_timer.arm_after(now, self.rtcp_interval);
                }
                rtt.min
            }
            None => {
                self.current_round_trip_time = DEFAULT_RTT;
                DEFAULT_RTT
            }
        };

        // Nothing to acknowledge yet
        if self.last_send_time.is_none() {
            return;
        }
        self.stats.acks_received += 1;

        let ack_frame_id = feedback.ack_frame_id;
        if ack_frame_id.is_newer_than(self.window.last_sent_frame_id) {
            warn!(
                "Ignoring ACK of {} frame {}, newer than last sent frame {}",
                self.policy.name(),
                ack_frame_id,
                self.window.last_sent_frame_id
            );
            return;
        }

        if !feedback.has_nack() {
            if ack_frame_id == self.window.latest_acked_frame_id
                && self.window.latest_acked_frame_id != self.window.last_sent_frame_id
            {
                self.window.duplicate_ack_counter += 1;
                self.stats.duplicate_acks += 1;
            } else {
                self.window.duplicate_ack_counter = 0;
            }
            if self.is_kickstart_due() {
                self.resend_for_kickstart(now);
            }
        } else {
            self.window.duplicate_ack_counter = 0;
            self.stats.nack_resends += 1;
            self.transport.resend_packets(
                self.policy.is_audio(),
                &feedback.missing_frames_and_packets,
                false,
                min_rtt,
            );
        }

        if let Some(reference) = self.policy.reference_frame_hint(ack_frame_id) {
            self.send_encoder_command(EncoderCommand::LatestFrameIdToReference(reference));
        }

        self.congestion.ack_frame(ack_frame_id, now);

        trace!(
            "Received {} ACK for frame {} (rtp {})",
            self.policy.name(),
            ack_frame_id,
            self.frame_id_to_rtp_timestamp[ack_frame_id.as_raw() as usize % RTP_HISTORY_SIZE]
        );

        if ack_frame_id.is_older_than(self.window.latest_acked_frame_id) {
            debug!(
                "Received {} ACK out of order: frame {} after {}",
                self.policy.name(),
                ack_frame_id,
                self.window.latest_acked_frame_id
            );
            self.stats.out_of_order_acks += 1;
            return;
        }

        // Frames walked over are known received; stop retransmitting them
        let cancellations =
            MissingFramesAndPackets::cancellations(self.window.latest_acked_frame_id, ack_frame_id);
        if !cancellations.is_empty() {
            self.transport
                .resend_packets(self.policy.is_audio(), &cancellations, true, min_rtt);
        }
        self.window.latest_acked_frame_id = ack_frame_id;
    }

    /// Kickstart on the threshold-th duplicate ACK and every period after
    fn is_kickstart_due(&self) -> bool {
        let count = self.window.duplicate_ack_counter;
        count >= self.duplicate_ack_threshold
            && (count - self.duplicate_ack_threshold) % self.duplicate_ack_period == 0
    }
}
