//! Small helpers without a better home.
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

/// Mixes the hash of `value` into `seed`.
#[inline]
pub fn hash_combine_seed<T: Hash + ?Sized>(seed: &mut u64, value: &T) {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    let h = hasher.finish();
    *seed ^= h
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(*seed << 6)
        .wrapping_add(*seed >> 2);
}

/// Combines the hashes of all arguments, starting from a zero seed.
#[macro_export]
macro_rules! hash_combine {
    ($($value:expr),+ $(,)?) => {{
        let mut seed = 0u64;
        $($crate::util::hash_combine_seed(&mut seed, &$value);)+
        seed
    }};
}

/// `text` in bold red.
pub fn to_red_string(text: &str) -> String {
    format!("\x1b[1;31m{text}\x1b[0m")
}

/// `text` in bold yellow.
pub fn to_yellow_string(text: &str) -> String {
    format!("\x1b[1;33m{text}\x1b[0m")
}

/// `text` in bold blue.
pub fn to_blue_string(text: &str) -> String {
    format!("\x1b[1;34m{text}\x1b[0m")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors() {
        assert_eq!(to_red_string("x"), "\x1b[1;31mx\x1b[0m");
        assert_eq!(to_yellow_string("x"), "\x1b[1;33mx\x1b[0m");
        assert_eq!(to_blue_string("x"), "\x1b[1;34mx\x1b[0m");
    }

    #[test]
    fn hash_combine_depends_on_order() {
        let a = crate::hash_combine!(1u32, 2u32);
        let b = crate::hash_combine!(2u32, 1u32);
        assert_ne!(a, b);
        assert_eq!(a, crate::hash_combine!(1u32, 2u32));
    }

    #[test]
    fn seed_changes() {
        let mut seed = 0;
        hash_combine_seed(&mut seed, "abc");
        assert_ne!(seed, 0);
    }
}
