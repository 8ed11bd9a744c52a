//! Messages exchanged with encoder workers

use cast_io::Processor;
use cast_protocol::{EncodedFrame, FrameId};
use std::time::Instant;

/// Request sent to an encoder worker
#[derive(Debug)]
pub enum EncoderCommand<R> {
    /// Encode raw media captured at `capture_time`
    Encode {
        raw: R,
        capture_time: Instant,
        target_bitrate: u32,
    },
    /// Make the next encoded frame a key frame
    GenerateKeyFrame,
    /// The receiver has acknowledged this frame
    LatestFrameIdToReference(FrameId),
}

/// Result of one encode attempt
#[derive(Debug)]
pub enum EncoderOutput {
    Frame(EncodedFrame),
    /// The attempt produced nothing; no frame ID was consumed
    Failed,
    /// Input dropped without reaching the codec, in the units of
    /// `MediaPolicy::input_per_frame`
    Discarded(usize),
}

/// Type-erased encoder run by a worker
pub type BoxedEncoder<R> = Box<dyn Processor<Command = EncoderCommand<R>, Output = EncoderOutput>>;
