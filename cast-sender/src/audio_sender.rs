//! Audio sender

use crate::audio_encoder::AudioEncoder;
use crate::codec::AudioCodec;
use crate::config::{AudioSenderConfig, AUDIO_FRAME_RATE};
use crate::encoder::BoxedEncoder;
use crate::environment::{SenderCollaborators, SenderEnvironment};
use crate::error::{InitError, InitializationStatus};
use crate::media::AudioBus;
use crate::policy::AudioPolicy;
use crate::sender::{FrameTransportController, SenderStats};
use cast_io::{Clock, Worker};
use cast_protocol::{new_congestion_control, CastFeedback};
use std::time::Instant;
use tracing::{info, warn};

/// Sends audio at a constant bitrate in 10 ms frames
pub struct AudioSender {
    status: InitializationStatus,
    controller: Option<FrameTransportController<AudioBus>>,
}

impl AudioSender {
    /// Create a sender
    ///
    /// Never fails; check [`AudioSender::initialization_status`] before use.
    pub fn new<C: AudioCodec>(
        env: &SenderEnvironment,
        config: &AudioSenderConfig,
        codec: C,
        collaborators: SenderCollaborators,
    ) -> Self {
        match Self::build(env, config, codec, collaborators) {
            Ok(controller) => {
                info!(
                    "Audio sender ready: {} Hz, {} channels, {} bps",
                    config.sampling_rate, config.channels, config.bitrate
                );
                AudioSender {
                    status: InitializationStatus::Initialized,
                    controller: Some(controller),
                }
            }
            Err(err) => {
                warn!("Audio sender failed to initialize: {}", err);
                AudioSender {
                    status: InitializationStatus::Failed(err),
                    controller: None,
                }
            }
        }
    }

    fn build<C: AudioCodec>(
        env: &SenderEnvironment,
        config: &AudioSenderConfig,
        codec: C,
        collaborators: SenderCollaborators,
    ) -> Result<FrameTransportController<AudioBus>, InitError> {
        config.validate()?;
        let encoder = AudioEncoder::new(
            codec,
            config.channels,
            config.sampling_rate,
            config.underrun_threshold_frames,
        )?;
        let max_unacked_frames = config.transport.max_unacked_frames_for(AUDIO_FRAME_RATE);
        let congestion = new_congestion_control(
            config.bitrate,
            config.bitrate,
            max_unacked_frames,
            env.clock.now(),
        )?;
        let encoder: BoxedEncoder<AudioBus> = Box::new(encoder);
        let worker = Worker::spawn(encoder, env.worker_mode("cast-audio-encoder"))?;

        Ok(FrameTransportController::new(
            env.clock.clone(),
            &config.transport,
            Box::new(AudioPolicy::new(config.sampling_rate)),
            worker,
            congestion,
            collaborators,
            config.sampling_rate,
        ))
    }

    pub fn initialization_status(&self) -> &InitializationStatus {
        &self.status
    }

    /// Queue a capture burst for encoding
    ///
    /// Returns false if the burst was dropped because the 10 ms frames it
    /// would complete do not fit in the in-flight window.
    ///
    /// # Panics
    ///
    /// Panics if the sender failed to initialize.
    pub fn insert_audio(&mut self, bus: AudioBus, recorded_time: Instant) -> bool {
        let samples = bus.frames();
        self.controller_mut()
            .submit_input(bus, recorded_time, samples)
    }

    pub fn on_incoming_rtcp_packet(&mut self, packet: &[u8]) {
        if let Some(controller) = self.controller.as_mut() {
            controller.on_incoming_rtcp_packet(packet);
        }
    }

    pub fn on_cast_feedback(&mut self, feedback: &CastFeedback) {
        if let Some(controller) = self.controller.as_mut() {
            controller.on_cast_feedback(feedback);
        }
    }

    pub fn poll(&mut self) {
        if let Some(controller) = self.controller.as_mut() {
            controller.poll();
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.controller.as_ref().and_then(|c| c.next_deadline())
    }

    pub fn stats(&self) -> SenderStats {
        self.controller
            .as_ref()
            .map(|c| c.stats())
            .unwrap_or_default()
    }

    /// The transport controller, if initialized
    pub fn controller(&self) -> Option<&FrameTransportController<AudioBus>> {
        self.controller.as_ref()
    }

    fn controller_mut(&mut self) -> &mut FrameTransportController<AudioBus> {
        match self.controller.as_mut() {
            Some(controller) => controller,
            None => panic!("Audio sender used after failed initialization: {}", self.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Pcm16Codec;
    use crate::config::TransportConfig;
    use crate::error::ConfigError;
    use cast_io::ManualClock;
    use cast_protocol::{
        EncodedFrame, FrameId, MissingFramesAndPackets, RtcpChannel, RtpTimestamp, RttStats,
        TransportSender,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<EncodedFrame>>>);

    impl TransportSender for Sink {
        fn insert_coded_frame(&mut self, frame: EncodedFrame) {
            self.0.lock().push(frame);
        }

        fn resend_packets(&mut self, _: bool, _: &MissingFramesAndPackets, _: bool, _: Duration) {}
    }

    #[derive(Clone, Default)]
    struct Reports(Arc<Mutex<Vec<RtpTimestamp>>>);

    impl RtcpChannel for Reports {
        fn send_report(&mut self, _now: Instant, rtp_timestamp: RtpTimestamp) {
            self.0.lock().push(rtp_timestamp);
        }

        fn incoming_packet(&mut self, _packet: &[u8]) -> Option<CastFeedback> {
            None
        }

        fn rtt(&self) -> Option<RttStats> {
            None
        }
    }

    fn sender(config: &AudioSenderConfig) -> (AudioSender, Arc<ManualClock>, Sink, Reports) {
        let clock = Arc::new(ManualClock::new());
        let env = SenderEnvironment::inline(clock.clone());
        let sink = Sink::default();
        let reports = Reports::default();
        let sender = AudioSender::new(
            &env,
            config,
            Pcm16Codec::new(),
            SenderCollaborators::new(sink.clone(), reports.clone()),
        );
        (sender, clock, sink, reports)
    }

    #[test]
    fn test_bursts_become_frames() {
        let (mut sender, clock, sink, reports) = sender(&AudioSenderConfig::default());
        assert!(sender.initialization_status().is_initialized());
        let t0 = clock.now();

        for _ in 0..3 {
            assert!(sender.insert_audio(AudioBus::silent(2, 480), clock.now()));
            sender.poll();
            clock.advance(Duration::from_millis(10));
        }

        let frames = sink.0.lock();
        let rtps: Vec<u32> = frames.iter().map(|f| f.rtp_timestamp.as_raw()).collect();
        assert_eq!(rtps, vec![0, 480, 960]);
        assert_eq!(frames[2].reference_time, t0 + Duration::from_millis(20));
        assert_eq!(reports.0.lock().len(), 3);
        assert_eq!(sender.stats().frames_encoded, 3);
        assert_eq!(sender.stats().current_bitrate, 64_000);
    }

    fn in_flight(sender: &AudioSender) -> i32 {
        sender.controller().map_or(0, |c| c.frames_in_flight())
    }

    #[test]
    fn test_long_burst_counts_every_frame() {
        let (mut sender, clock, sink, _) = sender(&AudioSenderConfig::default());
        let max_unacked = sender.controller().unwrap().max_unacked_frames() as i32;
        assert_eq!(max_unacked, 11);

        for _ in 0..10 {
            assert!(sender.insert_audio(AudioBus::silent(2, 480), clock.now()));
            sender.poll();
            clock.advance(Duration::from_millis(10));
        }
        assert_eq!(in_flight(&sender), 10);

        // 100 ms in one burst is ten more frames than the window holds
        assert!(!sender.insert_audio(AudioBus::silent(2, 4800), clock.now()));
        sender.poll();
        assert_eq!(in_flight(&sender), 10);
        assert_eq!(sender.stats().frames_dropped, 1);

        sender.on_cast_feedback(&CastFeedback::ack(FrameId::new(4)));
        assert_eq!(in_flight(&sender), 5);

        // 60 ms fits exactly
        assert!(sender.insert_audio(AudioBus::silent(2, 2880), clock.now()));
        assert_eq!(sender.controller().unwrap().window().frames_in_encoder, 6);
        sender.poll();
        assert_eq!(in_flight(&sender), max_unacked);
        assert_eq!(sink.0.lock().len(), 16);

        // A partial frame completes nothing, but the next 10 ms would
        assert!(sender.insert_audio(AudioBus::silent(2, 200), clock.now()));
        assert!(!sender.insert_audio(AudioBus::silent(2, 480), clock.now()));
        assert!(in_flight(&sender) <= max_unacked);
    }

    #[test]
    fn test_underrun_releases_discarded_samples() {
        let config = AudioSenderConfig {
            transport: TransportConfig {
                max_unacked_frames: Some(2),
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut sender, clock, sink, _) = sender(&config);

        assert!(sender.insert_audio(AudioBus::silent(2, 720), clock.now()));
        sender.poll();
        assert_eq!(sink.0.lock().len(), 1);
        sender.on_cast_feedback(&CastFeedback::ack(FrameId::new(0)));

        // The half frame left in the encoder is dropped by the underrun, so
        // two full frames still fit afterwards
        clock.advance(Duration::from_millis(100));
        assert!(sender.insert_audio(AudioBus::silent(2, 960), clock.now()));
        sender.poll();
        assert_eq!(sink.0.lock().len(), 3);
        assert_eq!(sender.controller().unwrap().window().frames_in_encoder, 0);
        assert_eq!(in_flight(&sender), 2);
    }

    #[test]
    fn test_invalid_sample_format_reported() {
        let config = AudioSenderConfig {
            sampling_rate: 44_123,
            ..Default::default()
        };
        let (sender, ..) = sender(&config);
        assert_eq!(
            sender.initialization_status(),
            &InitializationStatus::Failed(InitError::Config(ConfigError::InvalidSamplingRate(44_123)))
        );
        assert!(sender.controller().is_none());
        assert_eq!(sender.next_deadline(), None);
    }

    #[test]
    fn test_invalid_transport_reported() {
        let config = AudioSenderConfig {
            transport: TransportConfig {
                rtcp_interval_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let (mut sender, ..) = sender(&config);
        assert!(!sender.initialization_status().is_initialized());
        // Feedback and polling on a failed sender are harmless
        sender.on_incoming_rtcp_packet(&[0, 0, 0, 1]);
        sender.poll();
    }

    #[test]
    #[should_panic(expected = "failed initialization")]
    fn test_insert_on_failed_sender_panics() {
        let config = AudioSenderConfig {
            channels: 0,
            ..Default::default()
        };
        let (mut sender, clock, ..) = sender(&config);
        sender.insert_audio(AudioBus::silent(1, 480), clock.now());
    }

    #[test]
    fn test_threaded_encoder() {
        let clock = Arc::new(ManualClock::new());
        let env = SenderEnvironment::threaded(clock.clone());
        let sink = Sink::default();
        let mut sender = AudioSender::new(
            &env,
            &AudioSenderConfig::default(),
            Pcm16Codec::new(),
            SenderCollaborators::new(sink.clone(), Reports::default()),
        );

        assert!(sender.insert_audio(AudioBus::silent(2, 480), clock.now()));
        // Wait for the encoder thread to finish the frame
        for _ in 0..1000 {
            sender.poll();
            if !sink.0.lock().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[test]
    fn test_threaded_encoder_backlog_is_bounded() {
        let clock = Arc::new(ManualClock::new());
        let env = SenderEnvironment::threaded(clock.clone());
        let sink = Sink::default();
        let mut sender = AudioSender::new(
            &env,
            &AudioSenderConfig::default(),
            Pcm16Codec::new(),
            SenderCollaborators::new(sink.clone(), Reports::default()),
        );
        let max_unacked = sender.controller().unwrap().max_unacked_frames();

        // Nothing is polled, so every accepted burst is still owed by the encoder
        let accepted = (0..20)
            .filter(|_| sender.insert_audio(AudioBus::silent(2, 480), clock.now()))
            .count();
        assert_eq!(accepted, max_unacked);
        assert!(!sender.insert_audio(AudioBus::silent(2, 4800), clock.now()));

        for _ in 0..1000 {
            sender.poll();
            if sink.0.lock().len() == max_unacked {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sink.0.lock().len(), max_unacked);
        assert_eq!(in_flight(&sender), max_unacked as i32);
    }
}
