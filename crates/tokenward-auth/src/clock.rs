//! Time source used for claim timestamps and expiration checks.

use std::fmt;

use time::OffsetDateTime;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> OffsetDateTime;

    /// Returns the current instant as a Unix timestamp (seconds).
    fn unix_timestamp(&self) -> i64 {
        self.now().unix_timestamp()
    }
}

/// Wall clock backed by [`OffsetDateTime::now_utc`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock frozen at a given instant.
#[derive(Clone, Copy)]
pub struct FixedClock(OffsetDateTime);

impl FixedClock {
    /// Creates a clock that always returns `instant`.
    #[must_use]
    pub fn new(instant: OffsetDateTime) -> Self {
        Self(instant)
    }

    /// Creates a clock from a Unix timestamp.
    ///
    /// Out-of-range timestamps fall back to the Unix epoch.
    #[must_use]
    pub fn at_unix(timestamp: i64) -> Self {
        Self(OffsetDateTime::from_unix_timestamp(timestamp).unwrap_or(OffsetDateTime::UNIX_EPOCH))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

impl fmt::Debug for FixedClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FixedClock")
            .field(&self.0.unix_timestamp())
            .finish()
    }
}
