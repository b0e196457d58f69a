//! Credential validators and per-agent request rate limiting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use share_hub::CredentialValidator;
use share_protocol::AgentId;

use crate::config::{AuthConfig, AuthMode, RateLimitConfig};

/// Hex SHA-256 digest of an API key, as stored in `[auth] credentials`.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Validates against a fixed table of key digests per agent. Plain keys
/// are never held in memory past the comparison.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    digests: HashMap<AgentId, [u8; 32]>,
}

impl StaticCredentials {
    /// Build from `(agent_id, hex digest)` pairs. Malformed digests are
    /// skipped with a warning; config validation rejects them earlier.
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (AgentId, String)>,
    {
        let mut digests = HashMap::new();
        for (agent_id, digest_hex) in entries {
            let mut digest = [0u8; 32];
            match hex::decode_to_slice(digest_hex.trim(), &mut digest) {
                Ok(()) => {
                    digests.insert(agent_id, digest);
                }
                Err(e) => {
                    tracing::warn!(agent_id = %agent_id, error = %e, "Ignoring malformed key digest")
                }
            }
        }
        Self { digests }
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

impl CredentialValidator for StaticCredentials {
    fn validate(&self, agent_id: &AgentId, credential: &str) -> bool {
        let Some(expected) = self.digests.get(agent_id) else {
            return false;
        };
        let presented = Sha256::digest(credential.as_bytes());
        // Compare every byte regardless of where the first mismatch is.
        expected
            .iter()
            .zip(presented.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Accepts every credential.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAccess;

impl CredentialValidator for OpenAccess {
    fn validate(&self, _agent_id: &AgentId, _credential: &str) -> bool {
        true
    }
}

pub fn build_validator(config: &AuthConfig) -> Arc<dyn CredentialValidator> {
    match config.mode {
        AuthMode::Open => {
            tracing::warn!("Auth mode is 'open': any agent may connect with any credential");
            Arc::new(OpenAccess)
        }
        AuthMode::Static => {
            let validator = StaticCredentials::new(
                config
                    .credentials
                    .iter()
                    .map(|c| (c.agent_id.clone(), c.key_sha256.clone())),
            );
            if validator.is_empty() {
                tracing::warn!("No credentials configured; every connect will be rejected");
            } else {
                tracing::info!(agents = validator.len(), "Loaded static credentials");
            }
            Arc::new(validator)
        }
    }
}

/// Token bucket rate limiter keyed by agent id.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<AgentId, TokenBucket>,
    capacity: u32,
    refill_per_sec: f64,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// - `capacity`: max burst tokens
    /// - `refill_per_sec`: steady-state rate (tokens per second)
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            refill_per_sec,
        }
    }

    /// `None` when rate limiting is disabled.
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.capacity, config.refill_per_sec))
    }

    /// Returns true if the request is allowed, false if rate-limited.
    pub fn check(&self, caller: &AgentId) -> bool {
        let now = Instant::now();
        let capacity = self.capacity as f64;
        let mut bucket = self.buckets.entry(caller.clone()).or_insert_with(|| TokenBucket {
            tokens: capacity,
            last_refill: now,
        });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(capacity);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop the bucket of an agent that went away.
    pub fn forget(&self, caller: &AgentId) {
        self.buckets.remove(caller);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialEntry;

    fn agent(id: &str) -> AgentId {
        AgentId::from(id)
    }

    #[test]
    fn static_credentials_accept_only_matching_key() {
        let creds = StaticCredentials::new([(agent("alice"), hash_key("s3cret"))]);
        assert!(creds.validate(&agent("alice"), "s3cret"));
        assert!(!creds.validate(&agent("alice"), "s3cret "));
        assert!(!creds.validate(&agent("bob"), "s3cret"));
    }

    #[test]
    fn malformed_digest_is_skipped() {
        let creds = StaticCredentials::new([(agent("alice"), "zz".to_string())]);
        assert!(creds.is_empty());
        assert!(!creds.validate(&agent("alice"), "anything"));
    }

    #[test]
    fn hash_key_is_lowercase_hex_sha256() {
        assert_eq!(
            hash_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn build_validator_follows_mode() {
        let mut config = AuthConfig {
            mode: AuthMode::Open,
            credentials: Vec::new(),
        };
        assert!(build_validator(&config).validate(&agent("x"), ""));

        config.mode = AuthMode::Static;
        config.credentials.push(CredentialEntry {
            agent_id: agent("x"),
            key_sha256: hash_key("k"),
        });
        let validator = build_validator(&config);
        assert!(validator.validate(&agent("x"), "k"));
        assert!(!validator.validate(&agent("x"), ""));
    }

    #[test]
    fn rate_limiter_allows_within_capacity() {
        let rl = RateLimiter::new(5, 1.0);
        for _ in 0..5 {
            assert!(rl.check(&agent("a1")), "should allow up to capacity");
        }
    }

    #[test]
    fn rate_limiter_blocks_over_capacity() {
        let rl = RateLimiter::new(3, 0.0);
        for _ in 0..3 {
            rl.check(&agent("a1"));
        }
        assert!(!rl.check(&agent("a1")));
    }

    #[test]
    fn rate_limiter_separate_buckets() {
        let rl = RateLimiter::new(1, 0.0);
        assert!(rl.check(&agent("a1")));
        assert!(!rl.check(&agent("a1")));
        assert!(rl.check(&agent("a2")));
        rl.forget(&agent("a1"));
        assert!(rl.check(&agent("a1")));
    }

    #[test]
    fn disabled_config_yields_no_limiter() {
        let config = RateLimitConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(RateLimiter::from_config(&config).is_none());
    }
}
