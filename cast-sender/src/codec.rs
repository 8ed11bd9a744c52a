//! Codec seam
//!
//! Codecs are opaque to the sender. They turn raw media into payload bytes
//! and take bitrate and reference hints; frame IDs, RTP timestamps and
//! reference times are assigned by the encoder adapters around them.

use crate::error::CodecError;
use crate::media::VideoFrame;
use bytes::{BufMut, Bytes, BytesMut};
use cast_protocol::{Dependency, FrameId};

/// Audio codec operating on 10 ms interleaved frames
pub trait AudioCodec: Send + 'static {
    /// Prepare for `channels` channels at `sampling_rate` Hz
    fn initialize(&mut self, _channels: usize, _sampling_rate: u32) -> Result<(), CodecError> {
        Ok(())
    }

    /// Encode one frame of interleaved samples in `[-1.0, 1.0]`
    fn encode(&mut self, interleaved: &[f32], target_bitrate: u32) -> Result<Bytes, CodecError>;

    fn set_bit_rate(&mut self, _bits_per_second: u32) {}
}

impl<C: AudioCodec + ?Sized> AudioCodec for Box<C> {
    fn initialize(&mut self, channels: usize, sampling_rate: u32) -> Result<(), CodecError> {
        (**self).initialize(channels, sampling_rate)
    }

    fn encode(&mut self, interleaved: &[f32], target_bitrate: u32) -> Result<Bytes, CodecError> {
        (**self).encode(interleaved, target_bitrate)
    }

    fn set_bit_rate(&mut self, bits_per_second: u32) {
        (**self).set_bit_rate(bits_per_second)
    }
}

/// Output of a video encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPayload {
    pub dependency: Dependency,
    /// Reference chosen by the codec for dependent frames; the previous
    /// frame when unset
    pub referenced_frame_id: Option<FrameId>,
    pub data: Bytes,
}

impl VideoPayload {
    pub fn key(data: Bytes) -> Self {
        VideoPayload {
            dependency: Dependency::Key,
            referenced_frame_id: None,
            data,
        }
    }

    pub fn dependent(data: Bytes) -> Self {
        VideoPayload {
            dependency: Dependency::Dependent,
            referenced_frame_id: None,
            data,
        }
    }
}

/// Video codec
pub trait VideoCodec: Send + 'static {
    fn initialize(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    /// Encode one frame; `force_key_frame` demands a standalone frame
    fn encode(
        &mut self,
        frame: &VideoFrame,
        target_bitrate: u32,
        force_key_frame: bool,
    ) -> Result<VideoPayload, CodecError>;

    fn set_bit_rate(&mut self, _bits_per_second: u32) {}

    /// Newest frame known to have reached the receiver
    fn latest_frame_id_to_reference(&mut self, _frame_id: FrameId) {}
}

impl<C: VideoCodec + ?Sized> VideoCodec for Box<C> {
    fn initialize(&mut self) -> Result<(), CodecError> {
        (**self).initialize()
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        target_bitrate: u32,
        force_key_frame: bool,
    ) -> Result<VideoPayload, CodecError> {
        (**self).encode(frame, target_bitrate, force_key_frame)
    }

    fn set_bit_rate(&mut self, bits_per_second: u32) {
        (**self).set_bit_rate(bits_per_second)
    }

    fn latest_frame_id_to_reference(&mut self, frame_id: FrameId) {
        (**self).latest_frame_id_to_reference(frame_id)
    }
}

/// Uncompressed 16-bit big-endian PCM
#[derive(Debug, Clone, Default)]
pub struct Pcm16Codec {
    channels: usize,
}

impl Pcm16Codec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioCodec for Pcm16Codec {
    fn initialize(&mut self, channels: usize, _sampling_rate: u32) -> Result<(), CodecError> {
        self.channels = channels;
        Ok(())
    }

    fn encode(&mut self, interleaved: &[f32], _target_bitrate: u32) -> Result<Bytes, CodecError> {
        if self.channels != 0 && interleaved.len() % self.channels != 0 {
            return Err(CodecError::Unsupported(format!(
                "{} samples do not divide into {} channels",
                interleaved.len(),
                self.channels
            )));
        }
        let mut buf = BytesMut::with_capacity(interleaved.len() * 2);
        for &sample in interleaved {
            buf.put_i16((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
        }
        Ok(buf.freeze())
    }
}
