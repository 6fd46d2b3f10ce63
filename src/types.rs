//! Core identifiers and records shared by every module.
//!
//! Frame numbers are signed 64-bit so that the "nothing received yet"
//! cumulative ack (`first_frame - 1`) stays representable even when the
//! agreed first frame is zero. Frames on the wire are always
//! non-negative; the codec rejects anything else.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a participating host, assigned during enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct HostId(pub u32);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host{}", self.0)
    }
}

impl From<u32> for HostId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Monotonically increasing frame counter, identical across all hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FrameNumber(pub i64);

impl FrameNumber {
    /// The following frame.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for FrameNumber {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// One host's command for one frame. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInput<C> {
    /// The frame this command belongs to.
    pub number: FrameNumber,
    /// Opaque application payload.
    pub command: C,
}

impl<C> FrameInput<C> {
    /// Pairs a command with its frame number.
    #[must_use]
    pub const fn new(number: FrameNumber, command: C) -> Self {
        Self { number, command }
    }
}

/// Snapshot of a receive queue's acknowledgement state.
///
/// `cumulative` is the highest frame such that every frame up to and
/// including it has been received; `selective` lists received frames
/// beyond that, in ascending order. A queue that has received nothing
/// reports `cumulative == first_frame - 1` and an empty selective list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameAck {
    /// Highest frame of the contiguous received prefix.
    pub cumulative: FrameNumber,
    /// Received frames above `cumulative`, ascending.
    pub selective: Vec<FrameNumber>,
}

impl FrameAck {
    /// Builds a snapshot from raw parts.
    #[must_use]
    pub fn new(cumulative: FrameNumber, selective: Vec<FrameNumber>) -> Self {
        Self {
            cumulative,
            selective,
        }
    }
}
