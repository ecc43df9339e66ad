// crates/flowcore-model/src/runtime/retry.rs
// ============================================================================
// Module: Flowcore Retry Backoff
// Description: Backoff interval computation and retry eligibility checks.
// Purpose: Turn a RetryPolicy and attempt number into a concrete delay.
// Dependencies: crate::core::{errors, policy}
// ============================================================================

//! ## Overview
//! Backoff math is pure and deterministic given `(policy, attempt, jitter
//! source)`; the runner supplies the jitter source so the computation stays
//! testable without patching `rand` globally.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::errors::ErrorCode;
use crate::core::policy::Backoff;
use crate::core::policy::Jitter;
use crate::core::policy::RetryPolicy;

// ============================================================================
// SECTION: Eligibility
// ============================================================================

/// Returns true if `policy` permits another attempt after `attempt` has
/// failed with `code`.
///
/// `attempt` is 1-based: after the first attempt fails, `attempt == 1`.
#[must_use]
pub fn should_retry(policy: &RetryPolicy, attempt: u32, code: ErrorCode) -> bool {
    if attempt >= policy.retries {
        return false;
    }
    match &policy.retry_on {
        None => true,
        Some(codes) => codes.contains(&code),
    }
}

// ============================================================================
// SECTION: Backoff computation
// ============================================================================

/// Computes the delay in milliseconds before retry attempt `next_attempt`
/// (1-based: the delay before the *second* attempt uses `next_attempt == 2`).
///
/// `jitter_unit` is a caller-supplied value in `[0.0, 1.0)` used only when
/// `policy.jitter == Jitter::Full`; production callers pass a random
/// sample, tests pass a fixed value for determinism.
#[must_use]
pub fn compute_delay_ms(policy: &RetryPolicy, next_attempt: u32, jitter_unit: f64) -> u64 {
    let base = match policy.backoff {
        Backoff::None => policy.interval_ms,
        Backoff::Linear => policy.interval_ms.saturating_mul(u64::from(next_attempt.saturating_sub(1).max(1))),
        Backoff::Exp => {
            let exponent = next_attempt.saturating_sub(1).max(1) - 1;
            policy.interval_ms.saturating_mul(1u64.saturating_shl(exponent.min(62)))
        }
    };

    let capped = match policy.max_interval_ms {
        Some(max) => base.min(max),
        None => base,
    };

    match policy.jitter {
        Jitter::None => capped,
        Jitter::Full => {
            let unit = jitter_unit.clamp(0.0, 1.0);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let jittered = (capped as f64 * unit) as u64;
            jittered
        }
    }
}
