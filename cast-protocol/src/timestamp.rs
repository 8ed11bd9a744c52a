//! Wall-clock to RTP timeline mapping
//!
//! Sender reports carry "now" expressed on the stream's RTP timeline so the
//! receiver can line up audio and video. The mapping is extrapolated from the
//! most recently sent frame.

use crate::frame_id::RtpTimestamp;
use std::time::Instant;

/// Maps capture time to RTP timestamps by linear extrapolation
#[derive(Debug, Clone)]
pub struct RtpTimestampMapper {
    /// Timebase units per second
    frequency: u32,
    last: Option<(Instant, RtpTimestamp)>,
}

impl RtpTimestampMapper {
    /// Create a mapper for a timebase of `frequency` units per second
    pub fn new(frequency: u32) -> Self {
        RtpTimestampMapper {
            frequency,
            last: None,
        }
    }

    /// Timebase units per second
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Record the most recent capture time / RTP timestamp pair
    pub fn store_latest_time(&mut self, capture_time: Instant, rtp_timestamp: RtpTimestamp) {
        self.last = Some((capture_time, rtp_timestamp));
    }

    /// Express `now` on the RTP timeline
    ///
    /// Returns `None` until a pair has been stored.
    pub fn current_time_as_rtp_timestamp(&self, now: Instant) -> Option<RtpTimestamp> {
        let (last_time, last_rtp) = self.last?;
        let ticks = if now >= last_time {
            self.to_ticks((now - last_time).as_secs_f64())
        } else {
            -self.to_ticks((last_time - now).as_secs_f64())
        };
        Some(last_rtp.offset(ticks))
    }

    fn to_ticks(&self, seconds: f64) -> i64 {
        (seconds * self.frequency as f64).round() as i64
    }
}
