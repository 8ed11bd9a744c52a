//! Per-media behavior plugged into the transport controller

use crate::config::AUDIO_FRAME_RATE;
use crate::quantizer::FRAMES_PER_SECOND;
use cast_protocol::FrameId;

/// What distinguishes an audio stream from a video stream
pub trait MediaPolicy: Send {
    fn is_audio(&self) -> bool;

    /// Highest frame rate the stream can produce
    fn max_frame_rate(&self) -> f64;

    /// Encoder input that makes up one frame: samples per channel for
    /// audio, one picture for video
    fn input_per_frame(&self) -> usize;

    /// Reference hint for the encoder after `ack_frame_id` was acknowledged
    fn reference_frame_hint(&self, _ack_frame_id: FrameId) -> Option<FrameId> {
        None
    }

    fn name(&self) -> &'static str {
        if self.is_audio() {
            "audio"
        } else {
            "video"
        }
    }
}

/// Audio: fixed 10 ms frames cut from bursts of any length
#[derive(Debug, Clone, Copy)]
pub struct AudioPolicy {
    samples_per_frame: usize,
}

impl AudioPolicy {
    pub fn new(sampling_rate: u32) -> Self {
        AudioPolicy {
            samples_per_frame: (sampling_rate / FRAMES_PER_SECOND).max(1) as usize,
        }
    }
}

impl MediaPolicy for AudioPolicy {
    fn is_audio(&self) -> bool {
        true
    }

    fn max_frame_rate(&self) -> f64 {
        AUDIO_FRAME_RATE
    }

    fn input_per_frame(&self) -> usize {
        self.samples_per_frame
    }
}

/// Video: variable frame rate, acked frames become encoder references
#[derive(Debug, Clone, Copy)]
pub struct VideoPolicy {
    max_frame_rate: f64,
}

impl VideoPolicy {
    pub fn new(max_frame_rate: f64) -> Self {
        VideoPolicy { max_frame_rate }
    }
}

impl MediaPolicy for VideoPolicy {
    fn is_audio(&self) -> bool {
        false
    }

    fn max_frame_rate(&self) -> f64 {
        self.max_frame_rate
    }

    fn input_per_frame(&self) -> usize {
        1
    }

    fn reference_frame_hint(&self, ack_frame_id: FrameId) -> Option<FrameId> {
        Some(ack_frame_id)
    }
}
