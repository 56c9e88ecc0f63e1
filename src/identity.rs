//! Deterministic record identities.
//!
//! Every stored record is keyed by [`identity`]: a fixed-width digest of the
//! source tag and an original identifier. Adapters build the original
//! identifier per record kind (for example `"{path}:{line}"` for a log-derived
//! message) so that re-ingesting the same input always yields the same keys.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::{ConvosError, Result};
use crate::models::Source;

/// Hex characters kept from the SHA-256 digest.
pub const ID_LEN: usize = 16;

/// Stable id for `(source, original_id)`.
pub fn identity(source: Source, original_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(original_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..ID_LEN].to_string()
}

/// Mints identities for one normalization run and refuses collisions.
///
/// Two distinct original ids producing the same identity would silently merge
/// unrelated records on upsert, so it is reported as fatal instead.
#[derive(Debug)]
pub struct IdentityMint {
    source: Source,
    seen: HashMap<String, String>,
}

impl IdentityMint {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            seen: HashMap::new(),
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Identity for `original_id`. Minting the same original id twice is
    /// allowed and returns the same value.
    pub fn mint(&mut self, original_id: &str) -> Result<String> {
        let id = identity(self.source, original_id);
        match self.seen.get(&id) {
            Some(previous) if previous != original_id => Err(ConvosError::IdentityCollision {
                id,
                first: previous.clone(),
                second: original_id.to_string(),
            }),
            Some(_) => Ok(id),
            None => {
                self.seen.insert(id.clone(), original_id.to_string());
                Ok(id)
            }
        }
    }

    /// Register an externally produced identity under `original_id`.
    pub fn claim(&mut self, id: &str, original_id: &str) -> Result<()> {
        match self.seen.get(id) {
            Some(previous) if previous != original_id => Err(ConvosError::IdentityCollision {
                id: id.to_string(),
                first: previous.clone(),
                second: original_id.to_string(),
            }),
            _ => {
                self.seen.insert(id.to_string(), original_id.to_string());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_is_fixed_width_hex() {
        let id = identity(Source::Codex, "123");
        assert_eq!(id.len(), ID_LEN);
        assert!(u64::from_str_radix(&id, 16).is_ok());
    }

    #[test]
    fn test_id_consistent_across_syncs() {
        let path = "/Users/test/.claude/projects/-test/session-abc.jsonl";
        assert_eq!(
            identity(Source::ClaudeCode, path),
            identity(Source::ClaudeCode, path)
        );
    }

    #[test]
    fn test_id_known_value_is_stable() {
        // sha256("codex:123") truncated; pins the digest layout across releases.
        let expected = {
            let mut h = Sha256::new();
            h.update(b"codex:123");
            format!("{:x}", h.finalize())[..ID_LEN].to_string()
        };
        assert_eq!(identity(Source::Codex, "123"), expected);
    }

    #[test]
    fn test_sources_sharing_a_namespace_do_not_collide() {
        assert_ne!(
            identity(Source::Chatgpt, "conv-1"),
            identity(Source::Claude, "conv-1")
        );
    }

    #[test]
    fn test_no_collisions_over_corpus() {
        let ids: HashSet<String> = (0..20_000)
            .map(|i| identity(Source::ClaudeCode, &format!("/tmp/s.jsonl:{}", i)))
            .collect();
        assert_eq!(ids.len(), 20_000);
    }

    #[test]
    fn test_mint_is_idempotent_for_same_original() {
        let mut mint = IdentityMint::new(Source::Claude);
        let a = mint.mint("conv:1").unwrap();
        let b = mint.mint("conv:1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_claim_detects_collision() {
        let mut mint = IdentityMint::new(Source::Claude);
        mint.claim("aaaa", "first").unwrap();
        mint.claim("aaaa", "first").unwrap();
        let err = mint.claim("aaaa", "second").unwrap_err();
        assert!(matches!(err, ConvosError::IdentityCollision { .. }));
    }
}
