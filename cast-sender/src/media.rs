//! Raw media handed to the senders

use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioBusError {
    #[error("Audio bus needs at least one channel")]
    NoChannels,

    #[error("Channel {channel} has {len} samples, expected {expected}")]
    RaggedChannels {
        channel: usize,
        len: usize,
        expected: usize,
    },
}

/// Planar block of audio samples, one `f32` slice per channel
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBus {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl AudioBus {
    /// Silent bus of `frames` samples per channel
    pub fn silent(channels: usize, frames: usize) -> Self {
        AudioBus {
            channels: vec![vec![0.0; frames]; channels],
            frames,
        }
    }

    /// Wrap planar channel data, which must all be the same length
    pub fn from_planar(channels: Vec<Vec<f32>>) -> Result<Self, AudioBusError> {
        let expected = channels.first().ok_or(AudioBusError::NoChannels)?.len();
        if let Some((channel, data)) = channels
            .iter()
            .enumerate()
            .find(|(_, data)| data.len() != expected)
        {
            return Err(AudioBusError::RaggedChannels {
                channel,
                len: data.len(),
                expected,
            });
        }
        Ok(AudioBus {
            channels,
            frames: expected,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }
}

/// Raw video frame; pixel data is opaque to the sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Bytes) -> Self {
        VideoFrame {
            width,
            height,
            data,
        }
    }
}
