//! Code generation, normalisation and hashing.

use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Characters a generated code may contain. No `0/O` or `1/I`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Longest input accepted after normalisation
const MAX_INPUT_LEN: usize = 32;

/// Produces plaintext link codes
pub trait CodeSource: Send + Sync {
    fn next_code(&self, length: usize) -> String;
}

/// Uniformly random codes over [`CODE_ALPHABET`]
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn next_code(&self, length: usize) -> String {
        let mut rng = rand::rng();
        (0..length)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

/// Hands out predetermined codes, then falls back to random ones
#[derive(Debug, Default)]
pub struct FixedCodes {
    queue: Mutex<VecDeque<String>>,
}

impl FixedCodes {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(codes.into_iter().map(Into::into).collect()),
        }
    }

    /// Queue another code
    pub fn push(&self, code: impl Into<String>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(code.into());
    }
}

impl CodeSource for FixedCodes {
    fn next_code(&self, length: usize) -> String {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| RandomCodes.next_code(length))
    }
}

/// Canonical form of user input: trimmed, spaces and dashes removed,
/// uppercased. `None` for input that cannot be a code.
pub fn normalize_code(input: &str) -> Option<String> {
    let normalized: String = input
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if normalized.is_empty()
        || normalized.len() > MAX_INPUT_LEN
        || !normalized.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(normalized)
}

/// Hex SHA-256 of a normalised code
pub fn hash_code(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_strips_separators_and_case() {
        assert_eq!(normalize_code(" abc-123 "), Some("ABC123".to_string()));
        assert_eq!(normalize_code("ab c1 23"), Some("ABC123".to_string()));
        assert_eq!(normalize_code(""), None);
        assert_eq!(normalize_code(" - "), None);
        assert_eq!(normalize_code("ABC!23"), None);
        assert_eq!(normalize_code(&"A".repeat(33)), None);
    }

    #[test]
    fn test_random_codes_use_alphabet() {
        let code = RandomCodes.next_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_fixed_codes_then_random() {
        let source = FixedCodes::new(["ABC123"]);
        assert_eq!(source.next_code(8), "ABC123");
        assert_eq!(source.next_code(8).len(), 8);
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = hash_code("ABC123");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_code("ABC123"));
        assert_ne!(hash, hash_code("ABC124"));
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(input in "[a-zA-Z0-9 -]{0,40}") {
            if let Some(once) = normalize_code(&input) {
                prop_assert_eq!(normalize_code(&once), Some(once.clone()));
            }
        }

        #[test]
        fn prop_case_and_dashes_do_not_change_hash(code in "[A-Z2-9]{8}") {
            let lower = code.to_ascii_lowercase();
            let dashed = format!("{}-{}", &lower[..4], &lower[4..]);
            let expected = hash_code(&code);
            prop_assert_eq!(normalize_code(&dashed).map(|n| hash_code(&n)), Some(expected));
        }
    }
}
