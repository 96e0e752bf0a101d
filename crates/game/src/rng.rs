//! Cheap randomness without pulling in an RNG crate.
//!
//! Only used for spawn points, salts and NPC decisions. The shared
//! simulation never touches this; it has to stay deterministic.

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64,
    );
    hasher.finish()
}

/// Uniform-ish value in `[0, 1)`.
pub fn rand_percent() -> f32 {
    (rand_u64() % 10000) as f32 / 10000.0
}

/// Uniform-ish integer in `[0, n)`.
pub fn rand_range(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    (rand_u64() % n as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_percent_in_range() {
        for _ in 0..100 {
            let v = rand_percent();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn rand_range_bounded() {
        for _ in 0..100 {
            assert!(rand_range(7) < 7);
        }
        assert_eq!(rand_range(0), 0);
    }
}
