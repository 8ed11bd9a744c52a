//! Video sender

use crate::codec::VideoCodec;
use crate::config::VideoSenderConfig;
use crate::encoder::{BoxedEncoder, EncoderCommand};
use crate::environment::{SenderCollaborators, SenderEnvironment};
use crate::error::{InitError, InitializationStatus};
use crate::media::VideoFrame;
use crate::policy::VideoPolicy;
use crate::sender::{FrameTransportController, SenderStats};
use crate::video_encoder::VideoEncoder;
use cast_io::{Clock, Worker};
use cast_protocol::{new_congestion_control, CastFeedback};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Sends video with an adaptive bitrate
pub struct VideoSender {
    status: InitializationStatus,
    controller: Option<FrameTransportController<VideoFrame>>,
}

impl VideoSender {
    /// Create a sender
    ///
    /// Never fails; check [`VideoSender::initialization_status`] before use.
    pub fn new<C: VideoCodec>(
        env: &SenderEnvironment,
        config: &VideoSenderConfig,
        codec: C,
        collaborators: SenderCollaborators,
    ) -> Self {
        match Self::build(env, config, codec, collaborators) {
            Ok(controller) => {
                info!(
                    "Video sender ready: {}-{} bps, up to {} fps",
                    config.min_bitrate, config.max_bitrate, config.max_frame_rate
                );
                VideoSender {
                    status: InitializationStatus::Initialized,
                    controller: Some(controller),
                }
            }
            Err(err) => {
                warn!("Video sender failed to initialize: {}", err);
                VideoSender {
                    status: InitializationStatus::Failed(err),
                    controller: None,
                }
            }
        }
    }

    fn build<C: VideoCodec>(
        env: &SenderEnvironment,
        config: &VideoSenderConfig,
        codec: C,
        collaborators: SenderCollaborators,
    ) -> Result<FrameTransportController<VideoFrame>, InitError> {
        config.validate()?;
        let encoder = VideoEncoder::new(codec, config.rtp_timebase)?;
        let policy = VideoPolicy::new(config.max_frame_rate);
        let max_unacked_frames = config
            .transport
            .max_unacked_frames_for(config.max_frame_rate);
        let congestion = new_congestion_control(
            config.min_bitrate,
            config.max_bitrate,
            max_unacked_frames,
            env.clock.now(),
        )?;
        let encoder: BoxedEncoder<VideoFrame> = Box::new(encoder);
        let worker = Worker::spawn(encoder, env.worker_mode("cast-video-encoder"))?;

        Ok(FrameTransportController::new(
            env.clock.clone(),
            &config.transport,
            Box::new(policy),
            worker,
            congestion,
            collaborators,
            config.rtp_timebase,
        ))
    }

    pub fn initialization_status(&self) -> &InitializationStatus {
        &self.status
    }

    /// Queue a captured frame for encoding
    ///
    /// Returns false if the frame was dropped because too many frames are in
    /// flight.
    ///
    /// # Panics
    ///
    /// Panics if the sender failed to initialize.
    pub fn insert_video_frame(&mut self, frame: VideoFrame, capture_time: Instant) -> bool {
        self.controller_mut().submit_frame(frame, capture_time)
    }

    /// Make the next encoded frame a key frame
    pub fn request_key_frame(&mut self) {
        debug!("Key frame requested");
        self.controller_mut()
            .send_encoder_command(EncoderCommand::GenerateKeyFrame);
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
    pub fn controller(&self) -> Option<&FrameTransportController<VideoFrame>> {
        self.controller.as_ref()
    }

    fn controller_mut(&mut self) -> &mut FrameTransportController<VideoFrame> {
        match self.controller.as_mut() {
            Some(controller) => controller,
            None => panic!("Video sender used after failed initialization: {}", self.status),
        }
    }
}
