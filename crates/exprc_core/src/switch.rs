//! Bucket hashing for switch dispatch.
//!
//! The emitter groups case test values into buckets at compile time; the generated code recomputes the bucket of the
//! switch value at runtime (`hash_bucket` instruction) and jumps into that bucket's chain of equality checks. Both
//! sides call [`bucket_of`], so they agree by construction.

/// A switch test value reduced to its hashable form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchKey<'a> {
    Int(i64),
    Bool(bool),
    Str(&'a str),
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// 64-bit FNV-1a over `bytes`.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}

/// Table size for `cases` distinct test values: the smallest prime at least `cases` (minimum 2).
pub fn bucket_count(cases: usize) -> u32 {
    let mut n = cases.max(2) as u32;
    while !is_prime(n) {
        n += 1;
    }
    n
}

fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

/// Bucket index of `key` in a table of `size` buckets. `size` must be non-zero.
pub fn bucket_of(key: SwitchKey<'_>, size: u32) -> u32 {
    debug_assert!(size > 0);
    match key {
        SwitchKey::Int(v) => v.rem_euclid(size as i64) as u32,
        SwitchKey::Bool(b) => (b as u32) % size,
        SwitchKey::Str(s) => (fnv1a(s.as_bytes()) % size as u64) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_count_is_prime_and_large_enough() {
        assert_eq!(bucket_count(0), 2);
        assert_eq!(bucket_count(9), 11);
        assert_eq!(bucket_count(13), 13);
        for n in 0..64 {
            let size = bucket_count(n);
            assert!(size as usize >= n);
            assert!(is_prime(size));
        }
    }

    #[test]
    fn test_negative_ints_land_in_range() {
        for v in -50i64..50 {
            assert!(bucket_of(SwitchKey::Int(v), 7) < 7);
        }
        assert_eq!(bucket_of(SwitchKey::Int(-1), 7), 6);
    }

    #[test]
    fn test_string_hash_is_stable() {
        assert_eq!(fnv1a(b""), FNV_OFFSET);
        assert_eq!(
            bucket_of(SwitchKey::Str("alpha"), 11),
            bucket_of(SwitchKey::Str("alpha"), 11)
        );
    }
}
