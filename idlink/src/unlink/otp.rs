//! OTP and request token generation and hashing.
//!
//! OTPs are hashed with Argon2id plus a server-side pepper. Request tokens
//! carry 256 bits of entropy, so a SHA-256 digest is enough to store them.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};

/// Number of digits in an unlink OTP
pub const OTP_DIGITS: usize = 6;

/// Hashes and verifies OTPs with a pepper
#[derive(Clone)]
pub struct OtpHasher {
    pepper: String,
    params: Params,
}

impl OtpHasher {
    /// Create a hasher with the default Argon2id cost
    pub fn new(pepper: String) -> Self {
        Self {
            pepper,
            params: Params::default(),
        }
    }

    /// Cheaper parameters; a six-digit OTP lives for minutes and is guarded
    /// by an attempt counter
    pub fn light(pepper: String) -> Self {
        let params = Params::new(8 * 1024, 1, 1, None).unwrap_or_default();
        Self { pepper, params }
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash OTP with Argon2id + pepper
    pub fn hash(&self, otp: &str) -> Option<String> {
        let peppered = format!("{}{}", otp, self.pepper);
        let salt = SaltString::generate(&mut OsRng);

        self.argon2()
            .hash_password(peppered.as_bytes(), &salt)
            .ok()
            .map(|hash| hash.to_string())
    }

    /// Verify OTP against hash
    pub fn verify(&self, otp: &str, hash: &str) -> bool {
        let peppered = format!("{}{}", otp.trim(), self.pepper);
        let Ok(parsed_hash) = PasswordHash::new(hash) else {
            return false;
        };

        self.argon2()
            .verify_password(peppered.as_bytes(), &parsed_hash)
            .is_ok()
    }
}

/// Random six-digit OTP
pub fn generate_otp() -> String {
    let value = rand::rng().random_range(0..10u32.pow(OTP_DIGITS as u32));
    format!("{value:0width$}", width = OTP_DIGITS)
}

/// Random request token, hex encoded
pub fn generate_request_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Digest under which a request token is stored
pub fn hash_request_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otp_format() {
        for _ in 0..50 {
            let otp = generate_otp();
            assert_eq!(otp.len(), OTP_DIGITS);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = OtpHasher::light("test_pepper_value".to_string());
        let hash = hasher.hash("123456").unwrap();

        assert!(hasher.verify("123456", &hash));
        assert!(hasher.verify(" 123456 ", &hash));
        assert!(!hasher.verify("654321", &hash));
        assert!(!hasher.verify("123456", "not-a-hash"));
    }

    #[test]
    fn test_pepper_is_required() {
        let hasher = OtpHasher::light("pepper_one_value".to_string());
        let other = OtpHasher::light("pepper_two_value".to_string());
        let hash = hasher.hash("000111").unwrap();

        assert!(!other.verify("000111", &hash));
    }

    #[test]
    fn test_request_tokens() {
        let token = generate_request_token();
        assert_eq!(token.len(), 64);
        assert_ne!(token, generate_request_token());
        assert_eq!(hash_request_token(&token), hash_request_token(&token));
        assert_ne!(hash_request_token(&token), token);
    }
}
