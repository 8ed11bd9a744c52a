//! Frame ID and RTP Timestamp Handling
//!
//! Frame IDs and RTP timestamps are 32-bit counters that wrap around. Ordering
//! is defined by the signed difference between two values, so a value just
//! past the wrap point is still "newer" than one just before it. Neither type
//! implements `Ord`: use `is_newer_than` / `is_older_than` instead.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Frame identifier with 32-bit wraparound semantics
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct FrameId(u32);

impl FrameId {
    /// The ID assigned to the first frame of a stream
    pub const FIRST: FrameId = FrameId(0);

    /// Create a new frame ID
    #[inline]
    pub const fn new(value: u32) -> Self {
        FrameId(value)
    }

    /// Get the raw value
    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Advance to the next frame ID
    #[inline]
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Get the next frame ID
    #[inline]
    pub fn next(self) -> Self {
        FrameId(self.0.wrapping_add(1))
    }

    /// Get the previous frame ID
    #[inline]
    pub fn prev(self) -> Self {
        FrameId(self.0.wrapping_sub(1))
    }

    /// Signed distance from this frame ID to another
    ///
    /// Positive values mean `other` is newer than `self`.
    #[inline]
    pub fn distance_to(self, other: FrameId) -> i32 {
        other.0.wrapping_sub(self.0) as i32
    }

    /// Check if this frame ID is newer than another
    #[inline]
    pub fn is_newer_than(self, other: FrameId) -> bool {
        other.distance_to(self) > 0
    }

    /// Check if this frame ID is newer than or equal to another
    #[inline]
    pub fn is_newer_or_equal(self, other: FrameId) -> bool {
        other.distance_to(self) >= 0
    }

    /// Check if this frame ID is older than another
    #[inline]
    pub fn is_older_than(self, other: FrameId) -> bool {
        other.distance_to(self) < 0
    }
}

impl fmt::Debug for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameId({})", self.0)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FrameId {
    fn from(value: u32) -> Self {
        FrameId(value)
    }
}

impl From<FrameId> for u32 {
    fn from(id: FrameId) -> u32 {
        id.0
    }
}

impl Add<u32> for FrameId {
    type Output = FrameId;

    fn add(self, rhs: u32) -> FrameId {
        FrameId(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for FrameId {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub<u32> for FrameId {
    type Output = FrameId;

    fn sub(self, rhs: u32) -> FrameId {
        FrameId(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u32> for FrameId {
    fn sub_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_sub(rhs);
    }
}

impl Sub for FrameId {
    type Output = i32;

    /// Signed distance between two frame IDs
    fn sub(self, rhs: FrameId) -> i32 {
        rhs.distance_to(self)
    }
}

/// RTP timestamp with 32-bit wraparound semantics
///
/// The unit depends on the stream: audio streams use the sampling rate,
/// video streams use a 90 kHz timebase.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct RtpTimestamp(u32);

impl RtpTimestamp {
    #[inline]
    pub const fn new(value: u32) -> Self {
        RtpTimestamp(value)
    }

    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Signed distance from this timestamp to another
    #[inline]
    pub fn distance_to(self, other: RtpTimestamp) -> i32 {
        other.0.wrapping_sub(self.0) as i32
    }

    #[inline]
    pub fn is_newer_than(self, other: RtpTimestamp) -> bool {
        other.distance_to(self) > 0
    }

    #[inline]
    pub fn is_older_than(self, other: RtpTimestamp) -> bool {
        other.distance_to(self) < 0
    }

    /// Offset by a signed number of timebase ticks
    #[inline]
    pub fn offset(self, ticks: i64) -> Self {
        RtpTimestamp(self.0.wrapping_add(ticks as u32))
    }
}

impl fmt::Debug for RtpTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RtpTimestamp({})", self.0)
    }
}

impl fmt::Display for RtpTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RtpTimestamp {
    fn from(value: u32) -> Self {
        RtpTimestamp(value)
    }
}

impl Add<u32> for RtpTimestamp {
    type Output = RtpTimestamp;

    fn add(self, rhs: u32) -> RtpTimestamp {
        RtpTimestamp(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for RtpTimestamp {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub for RtpTimestamp {
    type Output = i32;

    fn sub(self, rhs: RtpTimestamp) -> i32 {
        rhs.distance_to(self)
    }
}
