// Filter sizing and offset derivation
// Pure functions, no store access

use kvguard_common::{KvGuardError, Result};

/// Largest bit array a filter may use; a single store value cannot address more
pub const MAX_BIT_ARRAY_SIZE: u64 = i32::MAX as u64 * 2;

/// Optimal number of bits for `expected_insertions` elements at `error_rate`
///
/// m = ceil(-n * ln(p) / ln(2)^2)
pub fn optimal_bit_array_size(expected_insertions: u64, error_rate: f64) -> Result<u64> {
    if error_rate.is_nan() || error_rate <= 0.0 || error_rate > 1.0 {
        return Err(KvGuardError::configuration(format!(
            "error rate must be within (0, 1], got {}",
            error_rate
        )));
    }

    let ln2 = std::f64::consts::LN_2;
    let bits = (-(expected_insertions as f64) * error_rate.ln() / (ln2 * ln2)).ceil();
    if bits <= 0.0 {
        return Err(KvGuardError::configuration(format!(
            "bit array size is zero for {} expected insertions at error rate {}",
            expected_insertions, error_rate
        )));
    }
    if bits > MAX_BIT_ARRAY_SIZE as f64 {
        return Err(KvGuardError::configuration(format!(
            "bit array size {} exceeds the maximum of {}",
            bits, MAX_BIT_ARRAY_SIZE
        )));
    }
    Ok(bits as u64)
}

/// Optimal number of hash iterations for a bit array of `bit_array_size` bits
///
/// k = max(1, round(m / n * ln(2)))
pub fn optimal_hash_iterations(expected_insertions: u64, bit_array_size: u64) -> u32 {
    if expected_insertions == 0 {
        return 1;
    }
    let k = (bit_array_size as f64 / expected_insertions as f64 * std::f64::consts::LN_2).round();
    (k as u32).max(1)
}

/// Bit offsets of `element`, one per hash iteration
///
/// Iteration `i` (1-based) hashes `element` followed by the decimal `i` with
/// 128-bit murmur3; the low 64 bits, read as a signed integer, are reduced
/// modulo the array size.
pub fn bit_offsets(element: &str, hash_iterations: u32, bit_array_size: u64) -> Vec<u64> {
    let modulus = bit_array_size as i64;
    let mut salted = String::with_capacity(element.len() + 10);
    (1..=hash_iterations)
        .map(|i| {
            salted.clear();
            salted.push_str(element);
            salted.push_str(&i.to_string());
            let hash = fastmurmur3::hash(salted.as_bytes()) as u64 as i64;
            (hash % modulus).unsigned_abs()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reference_sizing() {
        let m = optimal_bit_array_size(100, 0.03).unwrap();
        assert_eq!(m, 730);
        assert_eq!(optimal_hash_iterations(100, m), 5);
    }

    #[test]
    fn test_invalid_error_rates() {
        assert!(optimal_bit_array_size(100, 0.0).unwrap_err().is_configuration());
        assert!(optimal_bit_array_size(100, -0.1).is_err());
        assert!(optimal_bit_array_size(100, 1.5).is_err());
        assert!(optimal_bit_array_size(100, f64::NAN).is_err());
    }

    #[test]
    fn test_zero_size_rejected() {
        // p = 1 and n = 0 both collapse the array to nothing
        assert!(optimal_bit_array_size(100, 1.0).is_err());
        assert!(optimal_bit_array_size(0, 0.03).is_err());
    }

    #[test]
    fn test_ceiling() {
        assert!(optimal_bit_array_size(1_000_000_000, 0.01).is_err());
        assert!(optimal_bit_array_size(100_000_000, 0.01).is_ok());
    }

    #[test]
    fn test_offsets_are_stable() {
        let first = bit_offsets("user:42", 5, 730);
        assert_eq!(first.len(), 5);
        assert_eq!(first, bit_offsets("user:42", 5, 730));
        assert_ne!(first, bit_offsets("user:43", 5, 730));
    }

    proptest! {
        #[test]
        fn prop_offsets_in_range(element in ".{0,40}", k in 1u32..12, m in 1u64..MAX_BIT_ARRAY_SIZE) {
            let offsets = bit_offsets(&element, k, m);
            prop_assert_eq!(offsets.len(), k as usize);
            prop_assert!(offsets.iter().all(|&offset| offset < m));
        }

        #[test]
        fn prop_hash_iterations_at_least_one(n in 1u64..1_000_000, p in 0.0001f64..1.0) {
            if let Ok(m) = optimal_bit_array_size(n, p) {
                prop_assert!(optimal_hash_iterations(n, m) >= 1);
            }
        }
    }
}
