//! Id generation.
//!
//! [`IdGenerator`] hands out unique, UUID-formatted ids cheaply: it draws a
//! random 128-bit seed once and adds a counter to it for each id. Each client
//! connection owns one, created the first time the connection needs an id.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Counter-based generator of UUID-formatted ids.
pub struct IdGenerator {
    seed: [u8; 16],
    counter: AtomicU64,
}

impl IdGenerator {
    /// Create a generator with a fresh random seed.
    pub fn new() -> Self {
        Self {
            seed: rand::random(),
            counter: AtomicU64::new(0),
        }
    }

    /// Next id. Never repeats for the lifetime of the generator.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut bytes = self.seed;
        let mut low = [0u8; 8];
        low.copy_from_slice(&bytes[..8]);
        let mixed = u64::from_le_bytes(low).wrapping_add(n);
        bytes[..8].copy_from_slice(&mixed.to_le_bytes());
        Uuid::from_bytes(bytes).to_string()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// New random conversation id: 8 random bytes as 16 lowercase hex chars.
///
/// Requests and replies on one connection share a conversation id in the
/// audit log.
pub fn new_conversation_id() -> String {
    let bytes: [u8; 8] = rand::random();
    let mut out = String::with_capacity(16);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let generator = IdGenerator::new();
        let ids: HashSet<String> = (0..1000).map(|_| generator.next_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn ids_parse_as_uuid() {
        let generator = IdGenerator::new();
        let id = generator.next_id();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn separate_generators_differ() {
        let a = IdGenerator::new();
        let b = IdGenerator::new();
        assert_ne!(a.next_id(), b.next_id());
    }

    #[test]
    fn conversation_id_is_16_hex_chars() {
        let id = new_conversation_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
