//! Shared helpers for the simulated banking providers.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Deterministic seed in 0..1000 for a document number.
///
/// SHA-256 rather than the standard library hasher: the seed must be stable
/// across processes and releases so repeated lookups for the same applicant
/// return the same simulated report.
pub(crate) fn stable_seed(document_number: &str) -> u64 {
    let digest = Sha256::digest(document_number.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % 1000
}

pub(crate) fn dec(n: u64) -> Decimal {
    Decimal::from(n)
}

/// Lossy float view of a ratio for storage under `risk_factors`.
pub(crate) fn ratio_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Truncating integer view of `value * scale`, mirroring the weight tables
/// which are defined over truncated products.
pub(crate) fn scaled_trunc(value: Decimal, scale: f64) -> i32 {
    let f = ratio_f64(value) * scale;
    if f >= i32::MAX as f64 {
        i32::MAX
    } else {
        f as i32
    }
}

pub(crate) fn clamp_score(score: i32) -> i32 {
    score.clamp(0, 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_stable_and_bounded() {
        let a = stable_seed("12345678Z");
        let b = stable_seed("12345678Z");
        assert_eq!(a, b);
        assert!(a < 1000);
        assert_ne!(stable_seed("12345678Z"), stable_seed("87654321X"));
    }

    #[test]
    fn scaled_trunc_truncates_toward_zero() {
        assert_eq!(scaled_trunc(Decimal::new(35, 1), 10.0), 35); // 3.5 * 10
        assert_eq!(scaled_trunc(Decimal::new(19, 1), 50.0), 95); // 1.9 * 50
    }
}
