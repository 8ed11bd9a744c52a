//! Synthetic media sources for the simulator

use bytes::Bytes;
use cast_protocol::FrameId;
use cast_sender::codec::{VideoCodec, VideoPayload};
use cast_sender::error::CodecError;
use cast_sender::{AudioBus, VideoFrame};
use std::f32::consts::TAU;

/// Sine tone captured in 10 ms bursts
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    channels: usize,
    sampling_rate: u32,
    frequency: f32,
    phase: f32,
}

impl ToneGenerator {
    pub fn new(channels: usize, sampling_rate: u32, frequency: f32) -> Self {
        ToneGenerator {
            channels,
            sampling_rate,
            frequency,
            phase: 0.0,
        }
    }

    /// Samples per channel in one capture burst
    pub fn burst_frames(&self) -> usize {
        (self.sampling_rate / 100) as usize
    }

    /// Produce the next burst
    pub fn next_burst(&mut self) -> AudioBus {
        let frames = self.burst_frames();
        let mut bus = AudioBus::silent(self.channels, frames);
        let step = TAU * self.frequency / self.sampling_rate as f32;
        for i in 0..frames {
            let sample = 0.5 * (self.phase + step * i as f32).sin();
            for channel in 0..self.channels {
                bus.channel_mut(channel)[i] = sample;
            }
        }
        self.phase = (self.phase + step * frames as f32) % TAU;
        bus
    }
}

/// Blank picture of the given size, in I420 layout
pub fn blank_picture(width: u32, height: u32) -> VideoFrame {
    let len = (width * height * 3 / 2) as usize;
    VideoFrame::new(width, height, Bytes::from(vec![0x80u8; len]))
}

/// Key frame size relative to a dependent frame
const KEY_FRAME_SCALE: u32 = 3;

/// Codec that emits payloads sized to hit the target bitrate
///
/// Key frames are larger, as with a real encoder. Frames reference the latest
/// frame the receiver is known to have.
#[derive(Debug, Clone)]
pub struct SyntheticVideoCodec {
    frame_rate: f64,
    reference: Option<FrameId>,
}

impl SyntheticVideoCodec {
    pub fn new(frame_rate: f64) -> Self {
        SyntheticVideoCodec {
            frame_rate,
            reference: None,
        }
    }
}

impl VideoCodec for SyntheticVideoCodec {
    fn encode(
        &mut self,
        _frame: &VideoFrame,
        target_bitrate: u32,
        force_key_frame: bool,
    ) -> Result<VideoPayload, CodecError> {
        let bytes_per_frame = (target_bitrate as f64 / 8.0 / self.frame_rate).max(1.0) as usize;
        if force_key_frame {
            let data = Bytes::from(vec![0u8; bytes_per_frame * KEY_FRAME_SCALE as usize]);
            return Ok(VideoPayload::key(data));
        }
        let mut payload = VideoPayload::dependent(Bytes::from(vec![0u8; bytes_per_frame]));
        payload.referenced_frame_id = self.reference;
        Ok(payload)
    }

    fn latest_frame_id_to_reference(&mut self, frame_id: FrameId) {
        self.reference = Some(frame_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_burst_shape() {
        let mut tone = ToneGenerator::new(2, 48_000, 440.0);
        let bus = tone.next_burst();
        assert_eq!(bus.channels(), 2);
        assert_eq!(bus.frames(), 480);
        assert_eq!(bus.channel(0), bus.channel(1));
        assert!(bus.channel(0).iter().all(|s| s.abs() <= 0.5));
    }

    #[test]
    fn test_tone_is_continuous() {
        let mut tone = ToneGenerator::new(1, 48_000, 1000.0);
        let first = tone.next_burst();
        let second = tone.next_burst();
        let step = TAU * 1000.0 / 48_000.0;
        let last = *first.channel(0).last().unwrap();
        let next = second.channel(0)[0];
        assert!((next - last).abs() < step);
    }

    #[test]
    fn test_payload_tracks_bitrate() {
        let mut codec = SyntheticVideoCodec::new(30.0);
        let picture = blank_picture(64, 48);

        let key = codec.encode(&picture, 2_400_000, true).unwrap();
        assert_eq!(key.data.len(), 30_000);

        codec.latest_frame_id_to_reference(FrameId::new(4));
        let delta = codec.encode(&picture, 2_400_000, false).unwrap();
        assert_eq!(delta.data.len(), 10_000);
        assert_eq!(delta.referenced_frame_id, Some(FrameId::new(4)));
    }
}
