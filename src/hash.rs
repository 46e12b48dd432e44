use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Fixed-width hex digest of `value` under `seed`.
///
/// `DefaultHasher::new()` uses fixed keys, so digests agree between processes
/// built from the same toolchain. Used to name files after arbitrary paths.
pub fn hex_digest(seed: u64, value: &str) -> String {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    value.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_fixed_width_and_seed_sensitive() {
        let a = hex_digest(0, "input/com/a.csv");
        assert_eq!(a.len(), 16);
        assert_eq!(a, hex_digest(0, "input/com/a.csv"));
        assert_ne!(a, hex_digest(1, "input/com/a.csv"));
        assert_ne!(a, hex_digest(0, "input/com/b.csv"));
    }
}
