//! Action tokens for the approve/reject links.
//!
//! Raw tokens are handed out exactly once, inside the owner's notification.
//! Only `hash(token)` is ever stored.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// 256 bits of entropy per token.
pub const TOKEN_BYTES: usize = 32;

/// What a link lets its holder do to one booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Approve,
    Reject,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Approve => "approve",
            Action::Reject => "reject",
        }
    }
}

/// SHA-256 digest of a token, URL-safe base64 without padding.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenHash(String);

impl TokenHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison.
    pub fn matches(&self, other: &TokenHash) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Enough to tell two hashes apart in logs.
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "TokenHash({prefix}…)")
    }
}

/// Mint a fresh token: 32 OS-random bytes as lowercase hex (URL-safe as is).
pub fn generate() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash(token: &str) -> TokenHash {
    let digest = Sha256::digest(token.as_bytes());
    TokenHash(URL_SAFE_NO_PAD.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_long_hex_and_unique() {
        let a = generate();
        let b = generate();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_sha256_base64url_unpadded() {
        assert_eq!(hash("abc").as_str(), "ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0");
        assert_eq!(hash("").as_str(), "47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU");
    }

    #[test]
    fn hash_is_deterministic_and_never_the_token() {
        let t = generate();
        assert_eq!(hash(&t), hash(&t));
        assert_ne!(hash(&t).as_str(), t);
        assert!(!hash(&t).as_str().contains('='));
    }

    #[test]
    fn only_the_issued_token_matches() {
        let t = generate();
        let stored = hash(&t);
        assert!(hash(&t).matches(&stored));
        assert!(!hash(&generate()).matches(&stored));
        assert!(!hash("").matches(&stored));
    }

    #[test]
    fn debug_does_not_print_full_hash() {
        let h = hash("abc");
        let shown = format!("{h:?}");
        assert!(!shown.contains(h.as_str()));
        assert!(shown.starts_with("TokenHash(ungWv48B"));
    }
}
