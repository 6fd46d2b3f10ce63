//! Session tunables.
//!
//! All intervals come from the monotonic clock. Rough sizing guidance:
//!
//! - `receive_capacity` must exceed the deepest plausible in-flight
//!   backlog, i.e. frames produced per retransmit interval times the
//!   number of retransmit cycles a frame can need. Oversizing is cheap.
//! - `retransmit_interval` should sit at 2 to 5 times the expected RTT;
//!   shorter wastes bandwidth on spurious repeats, longer stretches every
//!   recovery into a visible stall.
//! - `transmit_interval` must be well below `interframe` so freshly
//!   collected commands reach the wire within the same tick.

use std::time::Duration;

/// Tunable parameters of a lockstep session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Receive window slots per remote sender.
    pub receive_capacity: usize,
    /// Time between simulation ticks.
    pub interframe: Duration,
    /// Transmitter pacing period.
    pub transmit_interval: Duration,
    /// Age after which an unacked frame is sent again.
    pub retransmit_interval: Duration,
    /// Requested kernel send/receive buffer size.
    pub socket_buffer_bytes: usize,
}

impl SessionConfig {
    /// Creates a configuration, validating the relations between fields.
    ///
    /// # Panics
    ///
    /// Panics if `receive_capacity` is zero, any interval is zero, or
    /// `transmit_interval` is not shorter than `interframe`.
    #[must_use]
    pub fn new_validated(
        receive_capacity: usize,
        interframe: Duration,
        transmit_interval: Duration,
        retransmit_interval: Duration,
        socket_buffer_bytes: usize,
    ) -> Self {
        assert!(receive_capacity > 0, "receive_capacity must be > 0");
        assert!(!interframe.is_zero(), "interframe must be > 0");
        assert!(!transmit_interval.is_zero(), "transmit_interval must be > 0");
        assert!(
            !retransmit_interval.is_zero(),
            "retransmit_interval must be > 0"
        );
        assert!(
            transmit_interval < interframe,
            "transmit_interval must be shorter than interframe"
        );

        Self {
            receive_capacity,
            interframe,
            transmit_interval,
            retransmit_interval,
            socket_buffer_bytes,
        }
    }

    /// Configuration for LAN play: 50 ticks per second, aggressive
    /// retransmission.
    #[must_use]
    pub fn lan() -> Self {
        Self::default()
    }

    /// Configuration for WAN play: slower ticks and patient
    /// retransmission to ride out loss spikes.
    #[must_use]
    pub fn wan() -> Self {
        Self::new_validated(
            1024,
            Duration::from_millis(50),
            Duration::from_millis(10),
            Duration::from_millis(400),
            1 << 20,
        )
    }

    /// Builder-style setter for the receive window size.
    #[must_use]
    pub const fn with_receive_capacity(mut self, capacity: usize) -> Self {
        self.receive_capacity = capacity;
        self
    }

    /// Builder-style setter for the tick period.
    #[must_use]
    pub const fn with_interframe(mut self, interframe: Duration) -> Self {
        self.interframe = interframe;
        self
    }

    /// Builder-style setter for the transmitter pacing period.
    #[must_use]
    pub const fn with_transmit_interval(mut self, interval: Duration) -> Self {
        self.transmit_interval = interval;
        self
    }

    /// Builder-style setter for the retransmission age threshold.
    #[must_use]
    pub const fn with_retransmit_interval(mut self, interval: Duration) -> Self {
        self.retransmit_interval = interval;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new_validated(
            1024,
            Duration::from_millis(20),
            Duration::from_millis(5),
            Duration::from_millis(100),
            1 << 20,
        )
    }
}
