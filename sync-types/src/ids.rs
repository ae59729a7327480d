//! Peer identity for TaskFlow sync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// Default prefix for generated peer IDs.
pub const DEFAULT_PEER_PREFIX: &str = "taskflow";

/// Length of the random suffix of a generated peer ID.
pub const PEER_SUFFIX_LEN: usize = 9;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Identifier of one device/process instance in the sync mesh.
///
/// Generated once per process lifetime as `<prefix>-<9 base36 chars>`.
/// Never persisted; a restarted process gets a fresh one.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a new random PeerId with the default prefix.
    pub fn generate() -> Self {
        Self::generate_with_prefix(DEFAULT_PEER_PREFIX)
    }

    /// Generate a new random PeerId with the given prefix.
    pub fn generate_with_prefix(prefix: &str) -> Self {
        let mut suffix = String::with_capacity(PEER_SUFFIX_LEN);
        while suffix.len() < PEER_SUFFIX_LEN {
            let mut bytes = [0u8; 16];
            getrandom::getrandom(&mut bytes).expect("getrandom failed");
            // 252 = 7 * 36, reject the tail so every symbol is equally likely
            for b in bytes.iter().filter(|b| **b < 252) {
                if suffix.len() == PEER_SUFFIX_LEN {
                    break;
                }
                suffix.push(ALPHABET[(*b % 36) as usize] as char);
            }
        }
        Self(format!("{}-{}", prefix, suffix))
    }

    /// Wrap a caller-supplied identifier.
    ///
    /// Peer identity is not authenticated; any non-empty string without
    /// whitespace is accepted.
    pub fn new(id: impl Into<String>) -> Result<Self, TypesError> {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(TypesError::InvalidPeerId(id));
        }
        Ok(Self(id))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeerId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_has_prefix_and_suffix() {
        let id = PeerId::generate();
        let (prefix, suffix) = id.as_str().split_once('-').unwrap();
        assert_eq!(prefix, "taskflow");
        assert_eq!(suffix.len(), PEER_SUFFIX_LEN);
        assert!(suffix
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
    }

    #[test]
    fn custom_prefix_is_used() {
        let id = PeerId::generate_with_prefix("laptop");
        assert!(id.as_str().starts_with("laptop-"));
        assert_eq!(id.as_str().len(), "laptop-".len() + PEER_SUFFIX_LEN);
    }

    #[test]
    fn generated_ids_differ() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn parse_rejects_empty_and_whitespace() {
        assert!("".parse::<PeerId>().is_err());
        assert!("taskflow abc".parse::<PeerId>().is_err());
        assert!("taskflow-abc123xyz".parse::<PeerId>().is_ok());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = PeerId::new("taskflow-a1b2c3d4e").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"taskflow-a1b2c3d4e\"");

        let restored: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, id);
    }
}
