//! Congestion Control
//!
//! The adaptive controller never measures throughput directly. It infers the
//! available capacity from how quickly already-sent frames were acknowledged,
//! then picks a bitrate that keeps a virtual transmit buffer (encoder, network
//! and retransmissions seen as one queue) mostly empty.

use crate::frame_id::FrameId;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Extra frames of history kept beyond the unacked window
pub const HISTORY_MARGIN: usize = 100;

/// Fraction of the virtual buffer we try to keep empty
pub const TARGET_EMPTY_BUFFER_FRACTION: f64 = 0.9;

/// RTT assumed until the first measurement arrives
pub const DEFAULT_RTT: Duration = Duration::from_millis(20);

/// Congestion control configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CongestionError {
    #[error("Minimum bitrate must be greater than zero")]
    ZeroMinimumBitrate,

    #[error("Minimum bitrate {min} exceeds maximum bitrate {max}")]
    InvalidBitrateRange { min: u32, max: u32 },
}

/// Bitrate controller interface shared by the adaptive and fixed variants
pub trait CongestionControl: Send {
    /// Feed a new RTT sample
    fn update_rtt(&mut self, rtt: Duration);

    /// Record that a frame of `size_bits` was handed to the transport
    fn send_frame_to_transport(&mut self, frame_id: FrameId, size_bits: u64, when: Instant);

    /// Record that every frame up to and including `frame_id` was acknowledged
    fn ack_frame(&mut self, frame_id: FrameId, when: Instant);

    /// Target bitrate for a frame that must be played out at `playout_time`
    fn get_bitrate(&self, now: Instant, playout_time: Instant, playout_delay: Duration) -> u32;

    /// Snapshot of the controller state
    fn stats(&self) -> CongestionStats;
}

/// Congestion control statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionStats {
    /// Bitrate inferred from acknowledged history (bits per second)
    pub safe_bitrate_bps: f64,
    /// Smoothed round-trip time
    pub rtt: Duration,
    /// Frames currently tracked
    pub history_len: usize,
    /// Bits acknowledged within the tracked history
    pub acked_bits_in_history: u64,
    /// Idle time between acks and subsequent sends within the history
    pub dead_time_in_history: Duration,
}

/// Create the controller matching a bitrate range
///
/// A degenerate range (`min == max`) yields a [`FixedCongestionControl`].
pub fn new_congestion_control(
    min_bitrate: u32,
    max_bitrate: u32,
    max_unacked_frames: usize,
    now: Instant,
) -> Result<Box<dyn CongestionControl>, CongestionError> {
    if min_bitrate == max_bitrate && min_bitrate > 0 {
        return Ok(Box::new(FixedCongestionControl::new(min_bitrate)));
    }
    Ok(Box::new(AdaptiveCongestionControl::new(
        min_bitrate,
        max_bitrate,
        max_unacked_frames,
        now,
    )?))
}

#[derive(Debug, Clone, Default)]
struct FrameStats {
    sent_time: Option<Instant>,
    ack_time: Option<Instant>,
    frame_size: u64,
}

/// Adaptive congestion controller
///
/// Keeps a bounded window of per-frame send/ack times spanning
/// `[oldest relevant frame, last enqueued frame]`.
#[derive(Debug, Clone)]
pub struct AdaptiveCongestionControl {
    min_bitrate: u32,
    max_bitrate: u32,
    history_size: usize,
    rtt: Duration,
    frame_stats: VecDeque<FrameStats>,
    /// ID of the newest entry in `frame_stats`
    last_frame_stats: FrameId,
    last_acked_frame: FrameId,
    last_enqueued_frame: FrameId,
    acked_bits_in_history: u64,
    dead_time_in_history: Duration,
}

impl AdaptiveCongestionControl {
    /// Create a new adaptive controller
    ///
    /// # Arguments
    /// * `min_bitrate` - Lower bound of the output, bits per second
    /// * `max_bitrate` - Upper bound of the output, bits per second
    /// * `max_unacked_frames` - Size of the sender's in-flight window
    /// * `now` - Creation time, used to seed the history
    pub fn new(
        min_bitrate: u32,
        max_bitrate: u32,
        max_unacked_frames: usize,
        now: Instant,
    ) -> Result<Self, CongestionError> {
        Self::with_first_frame(min_bitrate, max_bitrate, max_unacked_frames, FrameId::FIRST, now)
    }

    /// Create a controller for a stream whose first frame is `first_frame`
    pub fn with_first_frame(
        min_bitrate: u32,
        max_bitrate: u32,
        max_unacked_frames: usize,
        first_frame: FrameId,
        now: Instant,
    ) -> Result<Self, CongestionError> {
        if min_bitrate == 0 {
            return Err(CongestionError::ZeroMinimumBitrate);
        }
        if min_bitrate > max_bitrate {
            return Err(CongestionError::InvalidBitrateRange {
                min: min_bitrate,
                max: max_bitrate,
            });
        }

        // Seed with an acknowledged entry for the frame before the first one,
        // so the first frame always has a predecessor to estimate from.
        let start = first_frame.prev();
        let mut frame_stats = VecDeque::with_capacity(max_unacked_frames + HISTORY_MARGIN + 1);
        frame_stats.push_back(FrameStats {
            sent_time: Some(now),
            ack_time: Some(now),
            frame_size: 0,
        });

        Ok(AdaptiveCongestionControl {
            min_bitrate,
            max_bitrate,
            history_size: max_unacked_frames + HISTORY_MARGIN,
            rtt: DEFAULT_RTT,
            frame_stats,
            last_frame_stats: start,
            last_acked_frame: start,
            last_enqueued_frame: start,
            acked_bits_in_history: 0,
            dead_time_in_history: Duration::ZERO,
        })
    }

    /// Latest frame acknowledged
    pub fn last_acked_frame(&self) -> FrameId {
        self.last_acked_frame
    }

    /// Latest frame handed to the transport
    pub fn last_enqueued_frame(&self) -> FrameId {
        self.last_enqueued_frame
    }

    fn index_of(&self, frame_id: FrameId) -> Option<usize> {
        let offset = self.last_frame_stats.distance_to(frame_id) as i64;
        let index = self.frame_stats.len() as i64 - 1 + offset;
        if offset > 0 || index < 0 {
            None
        } else {
            Some(index as usize)
        }
    }

    fn stats_for(&self, frame_id: FrameId) -> Option<&FrameStats> {
        self.index_of(frame_id).map(|index| &self.frame_stats[index])
    }

    /// Index for `frame_id`, growing the window when the ID is new
    fn slot_for(&mut self, frame_id: FrameId) -> Option<usize> {
        let offset = self.last_frame_stats.distance_to(frame_id);
        if offset > 0 {
            if offset as usize > self.history_size {
                tracing::warn!(
                    "Frame {} is {} frames past the tracked history; ignoring",
                    frame_id,
                    offset
                );
                return None;
            }
            for _ in 0..offset {
                self.frame_stats.push_back(FrameStats::default());
            }
            self.last_frame_stats = frame_id;
            self.prune();
        }
        self.index_of(frame_id)
    }

    /// Evict the oldest entries beyond the history bound
    fn prune(&mut self) {
        while self.frame_stats.len() > self.history_size {
            let Some(oldest) = self.frame_stats.pop_front() else {
                break;
            };
            match oldest.ack_time {
                Some(oldest_ack) => {
                    self.acked_bits_in_history =
                        self.acked_bits_in_history.saturating_sub(oldest.frame_size);
                    if let Some(next) = self.frame_stats.front() {
                        if let (Some(next_sent), Some(_)) = (next.sent_time, next.ack_time) {
                            self.dead_time_in_history = self
                                .dead_time_in_history
                                .saturating_sub(next_sent.saturating_duration_since(oldest_ack));
                        }
                    }
                }
                None => {
                    tracing::warn!("Evicting unacknowledged frame from congestion history");
                }
            }
            tracing::trace!(
                "Dead time in history: {:.3}s",
                self.dead_time_in_history.as_secs_f64()
            );
        }
    }

    /// Bitrate implied by the acknowledged history
    fn calculate_safe_bitrate(&self) -> f64 {
        let last_ack = self.stats_for(self.last_acked_frame).and_then(|s| s.ack_time);
        let first_sent = self.frame_stats.front().and_then(|s| s.sent_time);

        let (Some(last_ack), Some(first_sent)) = (last_ack, first_sent) else {
            return self.min_bitrate as f64;
        };
        let transmit_time = last_ack
            .saturating_duration_since(first_sent)
            .saturating_sub(self.dead_time_in_history);

        if self.acked_bits_in_history == 0 || transmit_time.is_zero() {
            return self.min_bitrate as f64;
        }
        self.acked_bits_in_history as f64 / transmit_time.as_secs_f64().max(1e-3)
    }

    /// When `frame_id` is expected to be acknowledged
    fn estimated_ack_time(&self, frame_id: FrameId, bitrate: f64, now: Instant) -> Instant {
        let mut current = self.last_acked_frame;
        let mut ack_time = self
            .stats_for(current)
            .and_then(|s| s.ack_time)
            .unwrap_or(now);

        if !frame_id.is_newer_than(current) {
            return self
                .stats_for(frame_id)
                .and_then(|s| s.ack_time)
                .unwrap_or(ack_time);
        }

        while frame_id.is_newer_than(current) {
            current.increment();
            let stats = self.stats_for(current).cloned().unwrap_or_default();
            ack_time = match stats.ack_time {
                Some(acked) => acked,
                None => {
                    let sending = self.sending_time_after(ack_time, stats.sent_time, now);
                    let estimate = sending + transmit_time(stats.frame_size, bitrate) + self.rtt;
                    if estimate < now {
                        // The ack is overdue: guess it arrives half the overrun
                        // from now. Over-estimating late acks is intended.
                        now + (now - estimate) / 2
                    } else {
                        estimate
                    }
                }
            };
        }
        ack_time
    }

    /// When `frame_id` could start sending
    fn estimated_sending_time(&self, frame_id: FrameId, bitrate: f64, now: Instant) -> Instant {
        let previous_ack = self.estimated_ack_time(frame_id.prev(), bitrate, now);
        let sent_time = self.stats_for(frame_id).and_then(|s| s.sent_time);
        self.sending_time_after(previous_ack, sent_time, now)
    }

    fn sending_time_after(
        &self,
        previous_ack: Instant,
        sent_time: Option<Instant>,
        now: Instant,
    ) -> Instant {
        let earliest = sent_time.unwrap_or(now);
        match previous_ack.checked_sub(self.rtt) {
            Some(after_previous) => after_previous.max(earliest),
            None => earliest,
        }
    }
}

fn transmit_time(size_bits: u64, bitrate: f64) -> Duration {
    if bitrate <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(size_bits as f64 / bitrate)
}

impl CongestionControl for AdaptiveCongestionControl {
    fn update_rtt(&mut self, rtt: Duration) {
        self.rtt = (self.rtt * 7 + rtt) / 8;
    }

    fn send_frame_to_transport(&mut self, frame_id: FrameId, size_bits: u64, when: Instant) {
        self.last_enqueued_frame = frame_id;
        if let Some(index) = self.slot_for(frame_id) {
            let stats = &mut self.frame_stats[index];
            stats.frame_size = size_bits;
            stats.sent_time = Some(when);
        }
    }

    fn ack_frame(&mut self, frame_id: FrameId, when: Instant) {
        let mut previous_ack = self
            .stats_for(self.last_acked_frame)
            .and_then(|s| s.ack_time)
            .unwrap_or(when);

        while frame_id.is_newer_than(self.last_acked_frame) {
            let next = self.last_acked_frame.next();
            let Some(index) = self.index_of(next) else {
                return;
            };
            let stats = &mut self.frame_stats[index];
            let Some(sent_time) = stats.sent_time else {
                // Can't ack a frame that hasn't been sent yet
                return;
            };

            self.last_acked_frame = next;
            let ack_time = when.max(sent_time);
            stats.ack_time = Some(ack_time);
            self.acked_bits_in_history += stats.frame_size;
            self.dead_time_in_history += sent_time.saturating_duration_since(previous_ack);
            previous_ack = ack_time;
        }
        self.prune();
    }

    fn get_bitrate(&self, now: Instant, playout_time: Instant, playout_delay: Duration) -> u32 {
        let safe_bitrate = self.calculate_safe_bitrate();

        // Estimate when we might start sending the next frame
        let next_send =
            self.estimated_sending_time(self.last_enqueued_frame.next(), safe_bitrate, now);
        let time_to_catch_up = playout_time.saturating_duration_since(next_send);

        let empty_buffer_fraction = if playout_delay.is_zero() {
            0.0
        } else {
            (time_to_catch_up.as_secs_f64() / playout_delay.as_secs_f64()).clamp(0.0, 1.0)
        };

        let bits_per_second = safe_bitrate * empty_buffer_fraction / TARGET_EMPTY_BUFFER_FRACTION;
        let bits_per_second = (bits_per_second.min(u32::MAX as f64) as u32)
            .clamp(self.min_bitrate, self.max_bitrate);

        tracing::trace!(
            "Safe bitrate {:.0} bps, empty buffer fraction {:.3}, rtt {:?} -> {} bps",
            safe_bitrate,
            empty_buffer_fraction,
            self.rtt,
            bits_per_second
        );
        bits_per_second
    }

    fn stats(&self) -> CongestionStats {
        CongestionStats {
            safe_bitrate_bps: self.calculate_safe_bitrate(),
            rtt: self.rtt,
            history_len: self.frame_stats.len(),
            acked_bits_in_history: self.acked_bits_in_history,
            dead_time_in_history: self.dead_time_in_history,
        }
    }
}

/// Constant-bitrate controller
///
/// Used when the configured range leaves no room for adaptation.
#[derive(Debug, Clone)]
pub struct FixedCongestionControl {
    bitrate: u32,
    rtt: Duration,
}

impl FixedCongestionControl {
    pub fn new(bitrate: u32) -> Self {
        FixedCongestionControl {
            bitrate,
            rtt: DEFAULT_RTT,
        }
    }
}

impl CongestionControl for FixedCongestionControl {
    fn update_rtt(&mut self, rtt: Duration) {
        self.rtt = rtt;
    }

    fn send_frame_to_transport(&mut self, _frame_id: FrameId, _size_bits: u64, _when: Instant) {}

    fn ack_frame(&mut self, _frame_id: FrameId, _when: Instant) {}

    fn get_bitrate(&self, _now: Instant, _playout_time: Instant, _playout_delay: Duration) -> u32 {
        self.bitrate
    }

    fn stats(&self) -> CongestionStats {
        CongestionStats {
            safe_bitrate_bps: self.bitrate as f64,
            rtt: self.rtt,
            history_len: 0,
            acked_bits_in_history: 0,
            dead_time_in_history: Duration::ZERO,
        }
    }
}
