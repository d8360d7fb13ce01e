//! Sentence hashing for the citation placement engine.
//!
//! Citations are anchored to sentences by a short hash rather than by raw
//! text, so that minor LLM paraphrasing of the numbered report it echoes
//! back doesn't break placement. The hash is computed over a
//! "hash-normalized" form of the sentence (letters and digits only) so that
//! whitespace/punctuation drift never causes a spurious mismatch.

use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// First 6 hex characters of MD5 over the hash-normalized sentence.
///
/// Serializes as a plain 6-character hex string.
///
/// # Examples
///
/// ```
/// use agent_core::hash::Hash6;
///
/// let hash = Hash6::of_sentence("Founded in 2020.");
/// assert_eq!(hash.as_str().len(), 6);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash6([u8; 6]);

impl Hash6 {
    /// Hash-normalize a sentence: keep only ASCII/Unicode letters and digits.
    pub fn hash_normalize(sentence: &str) -> String {
        sentence
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(|c| c.to_lowercase())
            .collect()
    }

    /// Compute the hash6 of a sentence by hash-normalizing then MD5-hashing it.
    pub fn of_sentence(sentence: &str) -> Self {
        Self::of_normalized(&Self::hash_normalize(sentence))
    }

    /// Compute the hash6 of an already-normalized string.
    pub fn of_normalized(normalized: &str) -> Self {
        let digest = Md5::digest(normalized.as_bytes());
        let hex = format!("{:x}", digest);
        let mut buf = [0u8; 6];
        buf.copy_from_slice(hex.as_bytes().get(0..6).unwrap_or(b"000000"));
        Self(buf)
    }

    /// Parse from a 6-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut buf = [0u8; 6];
        buf.copy_from_slice(s.as_bytes());
        Some(Self(buf))
    }

    pub fn as_str(&self) -> &str {
        // SAFETY-free: constructed only from ascii-hexdigit bytes.
        std::str::from_utf8(&self.0).unwrap_or("000000")
    }
}

impl fmt::Debug for Hash6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash6({})", self.as_str())
    }
}

impl fmt::Display for Hash6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Hash6 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Hash6 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 6-char hex string"))
    }
}
