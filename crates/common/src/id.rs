//! Random container identifiers.
//!
//! Ids are short lowercase hex strings, picked the same way the tool this runtime
//! replaces picked them: draw random bytes, hex-encode, check whether a directory
//! of that name already exists under the containers path, and retry on collision,
//! with no bound on the number of attempts. The one deliberate change is that the
//! RNG is passed in rather than pulled from a process-global generator, so callers
//! (and tests) control determinism.

use rand::RngCore;
use std::fmt;
use std::path::Path;

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// A validated container id: lowercase hex, non-empty.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<Path> for ContainerId {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

/// Generates container ids against a caller-supplied RNG and a caller-supplied
/// collision check.
pub struct IdAllocator {
    length: usize,
}

impl IdAllocator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    /// Draws random hex ids of `self.length` characters, calling `taken` to check
    /// each candidate against whatever already exists (normally: is there already a
    /// directory by this name in the containers path). Retries with no bound until
    /// `taken` reports a candidate free.
    pub fn allocate(&self, rng: &mut dyn RngCore, taken: impl Fn(&str) -> bool) -> ContainerId {
        loop {
            let candidate = self.random_hex(rng);
            if !taken(&candidate) {
                return ContainerId(candidate);
            }
        }
    }

    fn random_hex(&self, rng: &mut dyn RngCore) -> String {
        let mut bytes = vec![0u8; self.length];
        rng.fill_bytes(&mut bytes);
        bytes
            .iter()
            .map(|b| HEX_CHARS[(b & 0x0f) as usize] as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn allocate_produces_requested_length() {
        let allocator = IdAllocator::new(10);
        let mut rng = StdRng::seed_from_u64(1);
        let id = allocator.allocate(&mut rng, |_| false);
        assert_eq!(id.as_str().len(), 10);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn allocate_retries_on_collision() {
        let allocator = IdAllocator::new(10);
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = 0;
        let id = allocator.allocate(&mut rng, |_| {
            seen += 1;
            seen <= 2
        });
        assert_eq!(seen, 3);
        assert_eq!(id.as_str().len(), 10);
    }

    #[test]
    fn allocate_keeps_retrying_past_what_a_bounded_allocator_would_allow() {
        let allocator = IdAllocator::new(10);
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = 0;
        let id = allocator.allocate(&mut rng, |_| {
            seen += 1;
            seen <= 100
        });
        assert_eq!(seen, 101);
        assert_eq!(id.as_str().len(), 10);
    }

    #[test]
    fn same_seed_is_deterministic() {
        let allocator = IdAllocator::new(10);
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = allocator.allocate(&mut rng_a, |_| false);
        let b = allocator.allocate(&mut rng_b, |_| false);
        assert_eq!(a, b);
    }
}
