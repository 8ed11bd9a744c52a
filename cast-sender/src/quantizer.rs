//! Audio frame quantization
//!
//! Capture callbacks deliver bursts of arbitrary length at irregular times.
//! The quantizer slices them into 10 ms frames, assigning each one a frame
//! ID, an RTP timestamp, and the capture time of its first sample.
//!
//! When capture falls behind by more than the underrun threshold, the partial
//! buffer is discarded and the RTP timeline skips forward by the number of
//! frames that were missed, so the receiver sees the gap. Capture running
//! ahead (overrun) is never corrected.

use crate::error::ConfigError;
use crate::media::AudioBus;
use cast_protocol::{FrameId, RtpTimestamp};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Audio frames per second (10 ms quanta)
pub const FRAMES_PER_SECOND: u32 = 100;

/// Ceiling on interleaved samples held for one frame (48 kHz stereo, 100 ms)
pub const MAX_SAMPLES_PER_FRAME_BUFFER: usize = 48 * 2 * 100;

/// A full frame's worth of interleaved samples plus its metadata
#[derive(Debug)]
pub struct Quantum<'a> {
    pub frame_id: FrameId,
    pub rtp_timestamp: RtpTimestamp,
    /// Capture time of the first sample
    pub reference_time: Instant,
    /// Interleaved samples, `samples_per_frame * channels` long
    pub samples: &'a [f32],
}

/// Slices capture bursts into fixed-duration frames
#[derive(Debug)]
pub struct FrameQuantizer {
    channels: usize,
    samples_per_frame: usize,
    frame_duration: Duration,
    underrun_threshold: u32,

    buffer: Vec<f32>,
    /// Frames (samples per channel) currently buffered
    buffer_fill_end: usize,

    frame_id: FrameId,
    frame_rtp_timestamp: RtpTimestamp,
    /// Capture time of the first sample in the buffer
    frame_capture_time: Option<Instant>,
}

impl FrameQuantizer {
    /// Create a quantizer, rejecting unusable sample formats
    pub fn new(channels: u32, sampling_rate: u32, underrun_threshold: u32) -> Result<Self, ConfigError> {
        let channels = channels as usize;
        if channels == 0 {
            return Err(ConfigError::InvalidChannels);
        }
        let samples_per_frame = (sampling_rate / FRAMES_PER_SECOND) as usize;
        if samples_per_frame == 0 || sampling_rate % FRAMES_PER_SECOND != 0 {
            return Err(ConfigError::InvalidSamplingRate(sampling_rate));
        }
        if samples_per_frame * channels > MAX_SAMPLES_PER_FRAME_BUFFER {
            return Err(ConfigError::FrameTooLarge {
                samples_per_frame,
                channels,
            });
        }
        if underrun_threshold == 0 {
            return Err(ConfigError::InvalidUnderrunThreshold);
        }

        Ok(FrameQuantizer {
            channels,
            samples_per_frame,
            frame_duration: Duration::from_secs(1) / FRAMES_PER_SECOND,
            underrun_threshold,
            buffer: vec![0.0; samples_per_frame * channels],
            buffer_fill_end: 0,
            frame_id: FrameId::FIRST,
            frame_rtp_timestamp: RtpTimestamp::new(0),
            frame_capture_time: None,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// ID the next committed frame will carry
    pub fn next_frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// RTP timestamp the next committed frame will carry
    pub fn next_rtp_timestamp(&self) -> RtpTimestamp {
        self.frame_rtp_timestamp
    }

    /// Samples per channel waiting for the rest of their frame
    pub fn buffered_samples(&self) -> usize {
        self.buffer_fill_end
    }

    fn buffer_fill_duration(&self) -> Duration {
        self.frame_duration * self.buffer_fill_end as u32 / self.samples_per_frame as u32
    }

    /// Feed one capture burst recorded at `recorded_time`
    ///
    /// `encode` is called once per completed frame and returns whether the
    /// frame was encoded. Only encoded frames consume a frame ID and an RTP
    /// timestamp; the samples of a failed frame are dropped either way.
    /// Returns the number of frames encoded.
    pub fn push<F>(&mut self, bus: &AudioBus, recorded_time: Instant, mut encode: F) -> usize
    where
        F: FnMut(Quantum<'_>) -> bool,
    {
        if bus.channels() != self.channels {
            warn!(
                "Dropping audio burst with {} channels, expected {}",
                bus.channels(),
                self.channels
            );
            return 0;
        }

        let mut fill_duration = self.buffer_fill_duration();
        if let Some(capture_time) = self.frame_capture_time {
            let expected_time = capture_time + fill_duration;
            let amount_ahead_by = recorded_time.saturating_duration_since(expected_time);
            if amount_ahead_by > self.frame_duration * self.underrun_threshold {
                self.buffer_fill_end = 0;
                fill_duration = Duration::ZERO;
                let missed_frames = (amount_ahead_by.as_nanos() / self.frame_duration.as_nanos()) as i64;
                let skipped_ticks = missed_frames * self.samples_per_frame as i64;
                self.frame_rtp_timestamp = self.frame_rtp_timestamp.offset(skipped_ticks);
                debug!(
                    "Skipping RTP timestamp ahead to account for {} samples' worth of underrun",
                    skipped_ticks
                );
            }
        }
        self.frame_capture_time = Some(
            recorded_time
                .checked_sub(fill_duration)
                .unwrap_or(recorded_time),
        );

        let mut encoded = 0;
        let mut src_pos = 0;
        while src_pos < bus.frames() {
            let num_to_copy = (bus.frames() - src_pos).min(self.samples_per_frame - self.buffer_fill_end);
            for channel in 0..self.channels {
                let src = &bus.channel(channel)[src_pos..src_pos + num_to_copy];
                for (i, &sample) in src.iter().enumerate() {
                    self.buffer[(self.buffer_fill_end + i) * self.channels + channel] = sample;
                }
            }
            src_pos += num_to_copy;
            self.buffer_fill_end += num_to_copy;

            if self.buffer_fill_end < self.samples_per_frame {
                break;
            }

            let reference_time = self.frame_capture_time.unwrap_or(recorded_time);
            let quantum = Quantum {
                frame_id: self.frame_id,
                rtp_timestamp: self.frame_rtp_timestamp,
                reference_time,
                samples: &self.buffer,
            };
            if encode(quantum) {
                self.frame_id.increment();
                self.frame_rtp_timestamp += self.samples_per_frame as u32;
                encoded += 1;
            }

            self.buffer_fill_end = 0;
            self.frame_capture_time = Some(reference_time + self.frame_duration);
        }
        encoded
    }
}
