//! Video encoder adapter
//!
//! Assigns frame IDs and RTP timestamps around a [`VideoCodec`]. Every encode
//! request yields exactly one [`EncoderOutput`], so the sender can count
//! frames still inside the encoder.

use crate::codec::VideoCodec;
use crate::encoder::{EncoderCommand, EncoderOutput};
use crate::error::InitError;
use crate::media::VideoFrame;
use cast_io::Processor;
use cast_protocol::{Dependency, EncodedFrame, FrameId, RtpTimestamp};
use std::time::Instant;
use tracing::{debug, warn};

pub struct VideoEncoder<C> {
    codec: C,
    rtp_timebase: u32,
    bitrate: u32,
    next_frame_id: FrameId,
    first_capture_time: Option<Instant>,
    last_rtp_timestamp: Option<RtpTimestamp>,
    key_frame_requested: bool,
}

impl<C: VideoCodec> VideoEncoder<C> {
    pub fn new(mut codec: C, rtp_timebase: u32) -> Result<Self, InitError> {
        codec.initialize()?;
        Ok(VideoEncoder {
            codec,
            rtp_timebase,
            bitrate: 0,
            next_frame_id: FrameId::FIRST,
            first_capture_time: None,
            last_rtp_timestamp: None,
            // The stream must open with a key frame
            key_frame_requested: true,
        })
    }

    /// RTP position of `capture_time` relative to the first captured frame
    fn rtp_timestamp_for(&mut self, capture_time: Instant) -> RtpTimestamp {
        let first = *self.first_capture_time.get_or_insert(capture_time);
        let ticks = if capture_time >= first {
            ((capture_time - first).as_secs_f64() * self.rtp_timebase as f64).round() as i64
        } else {
            -(((first - capture_time).as_secs_f64() * self.rtp_timebase as f64).round() as i64)
        };
        RtpTimestamp::new(0).offset(ticks)
    }

    fn encode_video(
        &mut self,
        frame: VideoFrame,
        capture_time: Instant,
        target_bitrate: u32,
        emit: &mut dyn FnMut(EncoderOutput),
    ) {
        let rtp_timestamp = self.rtp_timestamp_for(capture_time);
        if let Some(last) = self.last_rtp_timestamp {
            if !rtp_timestamp.is_newer_than(last) {
                debug!(
                    "Dropping video frame: RTP timestamp {} does not advance past {}",
                    rtp_timestamp, last
                );
                emit(EncoderOutput::Failed);
                return;
            }
        }

        if target_bitrate != self.bitrate {
            self.codec.set_bit_rate(target_bitrate);
            self.bitrate = target_bitrate;
        }

        let payload = match self.codec.encode(&frame, target_bitrate, self.key_frame_requested) {
            Ok(payload) if !payload.data.is_empty() => payload,
            Ok(_) => {
                warn!("Video codec produced an empty frame; dropping it");
                emit(EncoderOutput::Failed);
                return;
            }
            Err(err) => {
                warn!("Video encode failed: {}", err);
                emit(EncoderOutput::Failed);
                return;
            }
        };

        let frame_id = self.next_frame_id;
        let encoded = match payload.dependency {
            Dependency::Key => {
                self.key_frame_requested = false;
                EncodedFrame::key(frame_id, rtp_timestamp, capture_time, payload.data)
            }
            Dependency::Dependent => {
                if self.key_frame_requested {
                    warn!("Codec ignored key frame request for frame {}", frame_id);
                }
                let referenced = payload.referenced_frame_id.unwrap_or_else(|| frame_id.prev());
                EncodedFrame::dependent(frame_id, referenced, rtp_timestamp, capture_time, payload.data)
            }
        };

        self.next_frame_id.increment();
        self.last_rtp_timestamp = Some(rtp_timestamp);
        emit(EncoderOutput::Frame(encoded));
    }
}

impl<C: VideoCodec> Processor for VideoEncoder<C> {
    type Command = EncoderCommand<VideoFrame>;
    type Output = EncoderOutput;

    fn process(&mut self, command: Self::Command, emit: &mut dyn FnMut(Self::Output)) {
        match command {
            EncoderCommand::Encode {
                raw,
                capture_time,
                target_bitrate,
            } => self.encode_video(raw, capture_time, target_bitrate, emit),
            EncoderCommand::GenerateKeyFrame => self.key_frame_requested = true,
            EncoderCommand::LatestFrameIdToReference(frame_id) => {
                self.codec.latest_frame_id_to_reference(frame_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VideoPayload;
    use crate::error::CodecError;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    /// Emits key frames only when forced, and records hints
    #[derive(Default)]
    struct ScriptedCodec {
        fail_next: bool,
        bitrates: Arc<Mutex<Vec<u32>>>,
        references: Arc<Mutex<Vec<FrameId>>>,
    }

    impl VideoCodec for ScriptedCodec {
        fn encode(
            &mut self,
            frame: &VideoFrame,
            _target_bitrate: u32,
            force_key_frame: bool,
        ) -> Result<VideoPayload, CodecError> {
            if std::mem::take(&mut self.fail_next) {
                return Err(CodecError::Encode("scripted".into()));
            }
            if force_key_frame {
                Ok(VideoPayload::key(frame.data.clone()))
            } else {
                Ok(VideoPayload::dependent(frame.data.clone()))
            }
        }

        fn set_bit_rate(&mut self, bits_per_second: u32) {
            self.bitrates.lock().push(bits_per_second);
        }

        fn latest_frame_id_to_reference(&mut self, frame_id: FrameId) {
            self.references.lock().push(frame_id);
        }
    }

    fn picture() -> VideoFrame {
        VideoFrame::new(2, 2, Bytes::from_static(&[0u8; 6]))
    }

    fn encode(encoder: &mut VideoEncoder<ScriptedCodec>, at: Instant) -> EncoderOutput {
        let mut outputs = Vec::new();
        encoder.process(
            EncoderCommand::Encode {
                raw: picture(),
                capture_time: at,
                target_bitrate: 1_000_000,
            },
            &mut |output| outputs.push(output),
        );
        assert_eq!(outputs.len(), 1);
        outputs.pop().unwrap()
    }

    fn expect_frame(output: EncoderOutput) -> EncodedFrame {
        match output {
            EncoderOutput::Frame(frame) => frame,
            other => panic!("expected an encoded frame, got {:?}", other),
        }
    }

    #[test]
    fn test_first_frame_is_key() {
        let mut encoder = VideoEncoder::new(ScriptedCodec::default(), 90_000).unwrap();
        let t0 = Instant::now();

        let first = expect_frame(encode(&mut encoder, t0));
        assert!(first.is_key_frame());
        assert_eq!(first.frame_id, FrameId::FIRST);
        assert_eq!(first.rtp_timestamp.as_raw(), 0);

        let second = expect_frame(encode(&mut encoder, t0 + Duration::from_millis(33)));
        assert!(!second.is_key_frame());
        assert_eq!(second.frame_id, FrameId::new(1));
        assert_eq!(second.referenced_frame_id, FrameId::new(0));
        assert_eq!(second.rtp_timestamp.as_raw(), 2970);
    }

    #[test]
    fn test_key_frame_request() {
        let mut encoder = VideoEncoder::new(ScriptedCodec::default(), 90_000).unwrap();
        let t0 = Instant::now();

        encode(&mut encoder, t0);
        encoder.process(EncoderCommand::GenerateKeyFrame, &mut |_| {});
        let frame = expect_frame(encode(&mut encoder, t0 + Duration::from_millis(10)));
        assert!(frame.is_key_frame());
        let frame = expect_frame(encode(&mut encoder, t0 + Duration::from_millis(20)));
        assert!(!frame.is_key_frame());
    }

    #[test]
    fn test_non_advancing_timestamp_rejected() {
        let mut encoder = VideoEncoder::new(ScriptedCodec::default(), 90_000).unwrap();
        let t0 = Instant::now() + Duration::from_secs(1);

        expect_frame(encode(&mut encoder, t0));
        assert!(matches!(encode(&mut encoder, t0), EncoderOutput::Failed));
        assert!(matches!(
            encode(&mut encoder, t0 - Duration::from_millis(5)),
            EncoderOutput::Failed
        ));

        let next = expect_frame(encode(&mut encoder, t0 + Duration::from_millis(40)));
        assert_eq!(next.frame_id, FrameId::new(1));
    }

    #[test]
    fn test_failure_keeps_frame_id() {
        let codec = ScriptedCodec {
            fail_next: true,
            ..Default::default()
        };
        let mut encoder = VideoEncoder::new(codec, 90_000).unwrap();
        let t0 = Instant::now();

        assert!(matches!(encode(&mut encoder, t0), EncoderOutput::Failed));
        let frame = expect_frame(encode(&mut encoder, t0 + Duration::from_millis(33)));
        assert_eq!(frame.frame_id, FrameId::FIRST);
        // Key frame request survives the failure
        assert!(frame.is_key_frame());
    }

    #[test]
    fn test_hints_reach_codec() {
        let codec = ScriptedCodec::default();
        let bitrates = codec.bitrates.clone();
        let references = codec.references.clone();
        let mut encoder = VideoEncoder::new(codec, 90_000).unwrap();

        encoder.process(EncoderCommand::LatestFrameIdToReference(FrameId::new(4)), &mut |_| {});
        encode(&mut encoder, Instant::now());

        assert_eq!(*references.lock(), vec![FrameId::new(4)]);
        assert_eq!(*bitrates.lock(), vec![1_000_000]);
    }
}
