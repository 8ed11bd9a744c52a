//! Property-based tests for the sender core
//!
//! These tests use proptest to drive senders and the frame quantizer with
//! random inputs and check the invariants that must hold for all of them.

use bytes::Bytes;
use cast::sender::codec::{VideoCodec, VideoPayload};
use cast::sender::error::CodecError;
use cast::{
    AudioBus, AudioSender, AudioSenderConfig, CastFeedback, Clock, EncodedFrame, FrameId,
    ManualClock, RtcpChannel, RtpTimestamp, SenderCollaborators, SenderEnvironment,
    TransportSender, VideoFrame, VideoSender, VideoSenderConfig,
};
use cast_protocol::{MissingFramesAndPackets, RtpTimestampMapper, RttStats};
use cast_sender::{FrameQuantizer, Pcm16Codec};
use proptest::prelude::*;
use std::time::{Duration, Instant};

struct NullTransport;

impl TransportSender for NullTransport {
    fn insert_coded_frame(&mut self, _frame: EncodedFrame) {}

    fn resend_packets(&mut self, _: bool, _: &MissingFramesAndPackets, _: bool, _: Duration) {}
}

struct FixedRtt(Option<RttStats>);

impl RtcpChannel for FixedRtt {
    fn send_report(&mut self, _now: Instant, _rtp_timestamp: RtpTimestamp) {}

    fn incoming_packet(&mut self, _packet: &[u8]) -> Option<CastFeedback> {
        None
    }

    fn rtt(&self) -> Option<RttStats> {
        self.0
    }
}

/// Step of a random sender session
#[derive(Debug, Clone)]
enum Step {
    /// Capture a burst of this many samples per channel
    Capture(usize),
    /// ACK this many frames behind the newest sent frame; may go past it
    Ack(i32),
    Nack(i32),
    Wait(u64),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (1usize..4800).prop_map(Step::Capture),
        3 => (-2i32..15).prop_map(Step::Ack),
        1 => (0i32..15).prop_map(Step::Nack),
        2 => (1u64..250).prop_map(Step::Wait),
    ]
}

fn feedback_for(last_sent: FrameId, behind: i32, nack: bool) -> CastFeedback {
    let ack_frame_id = FrameId::new(last_sent.as_raw().wrapping_sub(behind as u32));
    if nack {
        CastFeedback::nack(
            ack_frame_id,
            MissingFramesAndPackets::kickstart(ack_frame_id.next()),
        )
    } else {
        CastFeedback::ack(ack_frame_id)
    }
}

/// Codec that always produces a small payload
struct TinyCodec;

impl VideoCodec for TinyCodec {
    fn encode(
        &mut self,
        _frame: &VideoFrame,
        target_bitrate: u32,
        force_key_frame: bool,
    ) -> Result<VideoPayload, CodecError> {
        let data = Bytes::from(vec![0u8; (target_bitrate / 240).max(1) as usize]);
        Ok(if force_key_frame {
            VideoPayload::key(data)
        } else {
            VideoPayload::dependent(data)
        })
    }
}

proptest! {
    #[test]
    fn prop_audio_frames_in_flight_bounded(
        steps in prop::collection::vec(step_strategy(), 1..200),
        rtt_ms in prop::option::of(1u64..300),
    ) {
        let clock = std::sync::Arc::new(ManualClock::new());
        let mut sender = AudioSender::new(
            &SenderEnvironment::inline(clock.clone()),
            &AudioSenderConfig::default(),
            Pcm16Codec::new(),
            SenderCollaborators::new(
                NullTransport,
                FixedRtt(rtt_ms.map(|ms| RttStats::single(Duration::from_millis(ms)))),
            ),
        );
        let max_unacked = sender.controller().unwrap().max_unacked_frames() as i32;
        let mut capture_time = clock.now();

        for step in steps {
            match step {
                Step::Capture(samples) => {
                    sender.insert_audio(AudioBus::silent(2, samples), capture_time);
                    // 48 kHz: the burst covers samples / 48 ms of capture
                    capture_time += Duration::from_micros(samples as u64 * 1000 / 48);
                }
                Step::Ack(behind) | Step::Nack(behind) => {
                    let last_sent = sender.controller().unwrap().window().last_sent_frame_id;
                    let nack = matches!(step, Step::Nack(_));
                    sender.on_cast_feedback(&feedback_for(last_sent, behind, nack));
                }
                Step::Wait(ms) => {
                    clock.advance(Duration::from_millis(ms));
                    capture_time = capture_time.max(clock.now());
                }
            }
            sender.poll();

            let controller = sender.controller().unwrap();
            let in_flight = controller.frames_in_flight();
            prop_assert!(in_flight >= 0, "negative in-flight count {}", in_flight);
            prop_assert!(in_flight <= max_unacked, "{} frames in flight, limit {}", in_flight, max_unacked);
        }
    }

    #[test]
    fn prop_video_bitrate_within_range(
        steps in prop::collection::vec(step_strategy(), 1..200),
        min_kbps in 100u32..2000,
        span_kbps in 0u32..8000,
        rtt_ms in 1u64..500,
    ) {
        let config = VideoSenderConfig {
            min_bitrate: min_kbps * 1000,
            max_bitrate: (min_kbps + span_kbps) * 1000,
            ..Default::default()
        };
        let clock = std::sync::Arc::new(ManualClock::new());
        let mut sender = VideoSender::new(
            &SenderEnvironment::inline(clock.clone()),
            &config,
            TinyCodec,
            SenderCollaborators::new(
                NullTransport,
                FixedRtt(Some(RttStats::single(Duration::from_millis(rtt_ms)))),
            ),
        );
        prop_assert!(sender.initialization_status().is_initialized());

        for step in steps {
            match step {
                Step::Capture(_) => {
                    clock.advance(Duration::from_millis(33));
                    let frame = VideoFrame::new(2, 2, Bytes::from_static(&[0u8; 6]));
                    if sender.insert_video_frame(frame, clock.now()) {
                        let bitrate = sender.stats().current_bitrate;
                        prop_assert!(bitrate >= config.min_bitrate, "{} below min", bitrate);
                        prop_assert!(bitrate <= config.max_bitrate, "{} above max", bitrate);
                    }
                }
                Step::Ack(behind) | Step::Nack(behind) => {
                    let last_sent = sender.controller().unwrap().window().last_sent_frame_id;
                    let nack = matches!(step, Step::Nack(_));
                    sender.on_cast_feedback(&feedback_for(last_sent, behind, nack));
                }
                Step::Wait(ms) => clock.advance(Duration::from_millis(ms)),
            }
            sender.poll();
        }
    }

    #[test]
    fn prop_quantizer_rtp_monotonic_in_whole_frames(
        bursts in prop::collection::vec((1usize..2000, 0u64..120), 1..60),
        rate_index in 0usize..4,
    ) {
        let rate = [8_000u32, 16_000, 44_100, 48_000][rate_index];
        let mut quantizer = FrameQuantizer::new(1, rate, 3).unwrap();
        let spf = quantizer.samples_per_frame() as u32;
        let mut time = Instant::now();
        let mut last: Option<(u32, u32)> = None;

        for (frames, gap_ms) in bursts {
            time += Duration::from_millis(gap_ms);
            let bus = AudioBus::silent(1, frames);
            let mut failed = None;
            quantizer.push(&bus, time, |quantum| {
                let id = quantum.frame_id.as_raw();
                let rtp = quantum.rtp_timestamp.as_raw();
                if rtp % spf != 0 {
                    failed = Some(format!("rtp {} not a multiple of {}", rtp, spf));
                }
                if let Some((last_id, last_rtp)) = last {
                    if id != last_id + 1 {
                        failed = Some(format!("frame id {} after {}", id, last_id));
                    }
                    if rtp <= last_rtp {
                        failed = Some(format!("rtp {} after {}", rtp, last_rtp));
                    }
                }
                last = Some((id, rtp));
                true
            });
            prop_assert!(failed.is_none(), "{}", failed.unwrap_or_default());
        }
    }

    #[test]
    fn prop_mapper_tracks_elapsed_time(
        base in any::<u32>(),
        elapsed_ms in 0u64..100_000,
    ) {
        let mut mapper = RtpTimestampMapper::new(90_000);
        let capture = Instant::now();
        mapper.store_latest_time(capture, RtpTimestamp::new(base));

        let rtp = mapper
            .current_time_as_rtp_timestamp(capture + Duration::from_millis(elapsed_ms))
            .unwrap();
        prop_assert_eq!(rtp.as_raw(), base.wrapping_add((elapsed_ms * 90) as u32));
    }
}
