//! Audio encoder adapter
//!
//! Runs on the encoder worker: quantizes capture bursts into 10 ms frames and
//! hands each one to the codec.

use crate::codec::AudioCodec;
use crate::encoder::{EncoderCommand, EncoderOutput};
use crate::error::InitError;
use crate::media::AudioBus;
use crate::quantizer::FrameQuantizer;
use cast_io::Processor;
use cast_protocol::EncodedFrame;
use std::time::Instant;
use tracing::warn;

pub struct AudioEncoder<C> {
    codec: C,
    quantizer: FrameQuantizer,
    bitrate: u32,
}

impl<C: AudioCodec> AudioEncoder<C> {
    pub fn new(
        mut codec: C,
        channels: u32,
        sampling_rate: u32,
        underrun_threshold: u32,
    ) -> Result<Self, InitError> {
        let quantizer = FrameQuantizer::new(channels, sampling_rate, underrun_threshold)?;
        codec.initialize(quantizer.channels(), sampling_rate)?;
        Ok(AudioEncoder {
            codec,
            quantizer,
            bitrate: 0,
        })
    }

    pub fn quantizer(&self) -> &FrameQuantizer {
        &self.quantizer
    }

    fn encode_audio(
        &mut self,
        bus: AudioBus,
        capture_time: Instant,
        target_bitrate: u32,
        emit: &mut dyn FnMut(EncoderOutput),
    ) {
        if target_bitrate != self.bitrate {
            self.codec.set_bit_rate(target_bitrate);
            self.bitrate = target_bitrate;
        }

        let buffered = self.quantizer.buffered_samples();
        let mut quanta = 0;
        let codec = &mut self.codec;
        self.quantizer.push(&bus, capture_time, |quantum| {
            quanta += 1;
            match codec.encode(quantum.samples, target_bitrate) {
                Ok(data) if !data.is_empty() => {
                    emit(EncoderOutput::Frame(EncodedFrame::key(
                        quantum.frame_id,
                        quantum.rtp_timestamp,
                        quantum.reference_time,
                        data,
                    )));
                    true
                }
                Ok(_) => {
                    warn!("Audio codec produced an empty frame; dropping it");
                    emit(EncoderOutput::Failed);
                    false
                }
                Err(err) => {
                    warn!("Audio encode failed: {}", err);
                    emit(EncoderOutput::Failed);
                    false
                }
            }
        });

        // Whatever neither became a quantum nor stayed buffered was dropped,
        // either a mismatched burst or a partial frame lost to underrun
        let consumed = quanta * self.quantizer.samples_per_frame() + self.quantizer.buffered_samples();
        let discarded = (buffered + bus.frames()).saturating_sub(consumed);
        if discarded > 0 {
            emit(EncoderOutput::Discarded(discarded));
        }
    }
}

impl<C: AudioCodec> Processor for AudioEncoder<C> {
    type Command = EncoderCommand<AudioBus>;
    type Output = EncoderOutput;

    fn process(&mut self, command: Self::Command, emit: &mut dyn FnMut(Self::Output)) {
        match command {
            EncoderCommand::Encode {
                raw,
                capture_time,
                target_bitrate,
            } => self.encode_audio(raw, capture_time, target_bitrate, emit),
            // Every audio frame is a key frame and references nothing
            EncoderCommand::GenerateKeyFrame | EncoderCommand::LatestFrameIdToReference(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Pcm16Codec;
    use crate::error::{CodecError, ConfigError};
    use bytes::Bytes;
    use cast_protocol::FrameId;
    use std::time::Duration;

    /// Fails every other frame
    struct Flaky {
        calls: usize,
    }

    impl AudioCodec for Flaky {
        fn encode(&mut self, _interleaved: &[f32], _target_bitrate: u32) -> Result<Bytes, CodecError> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                Err(CodecError::Encode("flaky".into()))
            } else {
                Ok(Bytes::from_static(&[1, 2, 3]))
            }
        }
    }

    fn run<C: AudioCodec>(encoder: &mut AudioEncoder<C>, bus: AudioBus, at: Instant) -> Vec<EncoderOutput> {
        let mut outputs = Vec::new();
        encoder.process(
            EncoderCommand::Encode {
                raw: bus,
                capture_time: at,
                target_bitrate: 64_000,
            },
            &mut |output| outputs.push(output),
        );
        outputs
    }

    #[test]
    fn test_rejects_invalid_format() {
        let err = AudioEncoder::new(Pcm16Codec::new(), 2, 44_123, 3).err();
        assert_eq!(
            err,
            Some(InitError::Config(ConfigError::InvalidSamplingRate(44_123)))
        );
    }

    #[test]
    fn test_frames_are_key_frames() {
        let mut encoder = AudioEncoder::new(Pcm16Codec::new(), 2, 48_000, 3).unwrap();
        let t0 = Instant::now();

        let outputs = run(&mut encoder, AudioBus::silent(2, 960), t0);
        assert_eq!(outputs.len(), 2);
        match &outputs[1] {
            EncoderOutput::Frame(frame) => {
                assert!(frame.is_key_frame());
                assert_eq!(frame.frame_id, FrameId::new(1));
                assert_eq!(frame.referenced_frame_id, FrameId::new(1));
                assert_eq!(frame.rtp_timestamp.as_raw(), 480);
                assert_eq!(frame.reference_time, t0 + Duration::from_millis(10));
                assert_eq!(frame.data.len(), 480 * 2 * 2);
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    fn discarded(outputs: &[EncoderOutput]) -> usize {
        outputs
            .iter()
            .map(|output| match output {
                EncoderOutput::Discarded(samples) => *samples,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_reports_underrun_discards() {
        let mut encoder = AudioEncoder::new(Pcm16Codec::new(), 1, 48_000, 3).unwrap();
        let t0 = Instant::now();

        let outputs = run(&mut encoder, AudioBus::silent(1, 300), t0);
        assert!(outputs.is_empty());

        // 50ms late: the 300 buffered samples are dropped
        let outputs = run(&mut encoder, AudioBus::silent(1, 480), t0 + Duration::from_millis(50));
        assert_eq!(outputs.len(), 2);
        assert_eq!(discarded(&outputs), 300);
        assert_eq!(encoder.quantizer().buffered_samples(), 0);
    }

    #[test]
    fn test_reports_mismatched_burst_as_discarded() {
        let mut encoder = AudioEncoder::new(Pcm16Codec::new(), 2, 48_000, 3).unwrap();
        let outputs = run(&mut encoder, AudioBus::silent(1, 700), Instant::now());
        assert_eq!(discarded(&outputs), 700);
        assert!(!outputs.iter().any(|o| matches!(o, EncoderOutput::Frame(_))));
    }

    #[test]
    fn test_failures_do_not_consume_ids() {
        let mut encoder = AudioEncoder::new(Flaky { calls: 0 }, 1, 48_000, 3).unwrap();
        let outputs = run(&mut encoder, AudioBus::silent(1, 480 * 3), Instant::now());

        let ids: Vec<Option<u32>> = outputs
            .iter()
            .map(|output| match output {
                EncoderOutput::Frame(frame) => Some(frame.frame_id.as_raw()),
                EncoderOutput::Failed | EncoderOutput::Discarded(_) => None,
            })
            .collect();
        assert_eq!(ids, vec![Some(0), None, Some(1)]);
        assert_eq!(encoder.quantizer().next_frame_id(), FrameId::new(2));
    }
}
