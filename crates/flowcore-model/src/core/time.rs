// crates/flowcore-model/src/core/time.rs
// ============================================================================
// Module: Flowcore Time Model
// Description: Canonical timestamp representation and the host clock seam.
// Purpose: Keep run execution deterministic and replayable under test.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Flowcore's core logic never reads the wall clock directly. Every
//! component that needs "now" (the Run Queue claiming leases, the Runner
//! stamping event timestamps, the Scheduler ticking heartbeats) receives a
//! [`Clock`] implementation instead. Only the host binary binds
//! [`SystemClock`] at startup; tests bind a deterministic fake.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Unix epoch milliseconds.
///
/// # Invariants
/// - Values are supplied by a [`Clock`]; no validation is performed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from raw unix milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the raw unix millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns a timestamp `delta_ms` after this one (may be negative).
    #[must_use]
    pub const fn add_millis(self, delta_ms: i64) -> Self {
        Self(self.0 + delta_ms)
    }
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Seam for reading the current time.
///
/// # Invariants
/// - Implementations must be monotonic enough for lease comparisons; they
///   are not required to be monotonic across process restarts.
pub trait Clock: Send + Sync {
    /// Returns the current time as unix milliseconds.
    fn now_millis(&self) -> i64;

    /// Returns the current time as a [`Timestamp`].
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now_millis())
    }
}

/// [`Clock`] backed by [`std::time::SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        use std::time::SystemTime;
        use std::time::UNIX_EPOCH;

        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

// ============================================================================
// SECTION: Test support
// ============================================================================

/// A deterministic [`Clock`] for tests, shared across crates so integration
/// tests can control run timing without sleeping real time.
pub mod test_support {
    use std::sync::atomic::AtomicI64;
    use std::sync::atomic::Ordering;

    use super::Clock;

    /// Clock that starts at a fixed value and only advances when told to.
    #[derive(Debug)]
    pub struct FakeClock(AtomicI64);

    impl FakeClock {
        /// Creates a fake clock starting at `start_millis`.
        #[must_use]
        pub fn new(start_millis: i64) -> Self {
            Self(AtomicI64::new(start_millis))
        }

        /// Advances the clock by `delta_ms` (may be negative).
        pub fn advance(&self, delta_ms: i64) {
            self.0.fetch_add(delta_ms, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}
