// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Amount and delay jitter for scheduled withdrawals.
//!
//! The amount window is deliberately narrow (parts-per-million): it disrupts
//! naive exact-amount joins across the deposit/withdrawal event streams, not
//! more. All arithmetic is integer-only; truncation is toward zero.

use std::time::Duration;

use rand::Rng;

/// Lower bound of the amount jitter, in parts-per-million.
pub const PPM_MIN: i64 = -30;

/// Upper bound of the amount jitter, in parts-per-million.
pub const PPM_MAX: i64 = 40;

/// Apply a ppm offset to an expected amount.
///
/// Returns `None` when the jittered amount would fall below one smallest
/// unit; the caller must fail the session rather than dispatch dust.
pub fn normalized_amount(expected: u128, ppm: i64) -> Option<u128> {
    debug_assert!((PPM_MIN..=PPM_MAX).contains(&ppm));

    let magnitude = ppm.unsigned_abs() as u128;
    // Multiply-then-divide keeps sub-ppm precision; fall back to
    // divide-then-multiply only when the product would overflow.
    let adjustment = expected
        .checked_mul(magnitude)
        .map(|v| v / 1_000_000)
        .unwrap_or_else(|| (expected / 1_000_000) * magnitude);

    let normalized = if ppm >= 0 {
        expected.checked_add(adjustment)?
    } else {
        expected - adjustment
    };

    (normalized >= 1).then_some(normalized)
}

/// Sample a uniform ppm offset from the jitter window.
pub fn sample_ppm() -> i64 {
    rand::thread_rng().gen_range(PPM_MIN..=PPM_MAX)
}

/// Sample a uniform execution delay from `[1, max_secs]` seconds.
pub fn sample_delay(max_secs: u64) -> Duration {
    let max_secs = max_secs.max(1);
    Duration::from_secs(rand::thread_rng().gen_range(1..=max_secs))
}

/// Sample the retry backoff applied after a failed submission.
pub fn retry_backoff() -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(30..=120))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_amount_stays_in_window() {
        let expected: u128 = 2_000_000;
        for ppm in PPM_MIN..=PPM_MAX {
            let n = normalized_amount(expected, ppm).unwrap();
            assert!(n >= 1_999_940, "ppm {ppm} gave {n}");
            assert!(n <= 2_000_080, "ppm {ppm} gave {n}");
        }
    }

    #[test]
    fn truncation_is_toward_zero() {
        // 999 * 40 / 1e6 = 0.03996 -> truncates to 0
        assert_eq!(normalized_amount(999, 40), Some(999));
        // 999 * -30 / 1e6 truncates to 0 as well
        assert_eq!(normalized_amount(999, -30), Some(999));
        // 1e6 * -30 / 1e6 = 30 exactly
        assert_eq!(normalized_amount(1_000_000, -30), Some(999_970));
    }

    #[test]
    fn one_unit_never_rounds_to_zero() {
        for ppm in PPM_MIN..=PPM_MAX {
            assert_eq!(normalized_amount(1, ppm), Some(1));
        }
    }

    #[test]
    fn zero_expected_is_rejected() {
        assert_eq!(normalized_amount(0, 40), None);
        assert_eq!(normalized_amount(0, -30), None);
    }

    #[test]
    fn huge_amounts_do_not_overflow() {
        let expected = u128::MAX / 2;
        let n = normalized_amount(expected, PPM_MAX).unwrap();
        assert!(n > expected);
        let n = normalized_amount(expected, PPM_MIN).unwrap();
        assert!(n < expected);
    }

    #[test]
    fn sampled_values_respect_bounds() {
        for _ in 0..200 {
            let ppm = sample_ppm();
            assert!((PPM_MIN..=PPM_MAX).contains(&ppm));

            let delay = sample_delay(10);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_secs(10));

            let backoff = retry_backoff();
            assert!(backoff >= Duration::from_secs(30));
            assert!(backoff <= Duration::from_secs(120));
        }
    }
}
