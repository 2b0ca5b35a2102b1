//! Client peer-id generation.
//!
//! A single 20-byte identity generated once per process at startup and
//! shared by value with the tracker client and every peer session —
//! immutable, `Copy`, no need for a shared-ownership wrapper.

use rand::Rng;

const PREFIX: &[u8; 8] = b"-PC0001-";

/// Generates a fresh client peer-id: the fixed prefix `-PC0001-` followed by
/// 12 random bytes.
pub fn generate() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..PREFIX.len()].copy_from_slice(PREFIX);
    rand::rng().fill(&mut id[PREFIX.len()..]);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_fixed_prefix() {
        let id = generate();
        assert_eq!(&id[..8], PREFIX);
        assert_eq!(id.len(), 20);
    }

    #[test]
    fn randomizes_the_suffix() {
        let a = generate();
        let b = generate();
        assert_ne!(&a[8..], &b[8..], "vanishingly unlikely to collide");
    }
}
