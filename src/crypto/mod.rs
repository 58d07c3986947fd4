//! PKCE primitives and the pending-login store for the Entra ID
//! authorization-code flow.
//!
//! A login starts with a fresh `code_verifier`; only its SHA-256 digest
//! (base64url, unpadded) travels to the authorize endpoint. The verifier is
//! parked under the CSRF `state` until the callback claims it. Claims are
//! strictly one-shot: a second claim with the same state fails.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Length of the PKCE code verifier entropy in bytes
const VERIFIER_LENGTH: usize = 32;

/// Length of the CSRF state entropy in bytes
const STATE_LENGTH: usize = 16;

/// Generate a random PKCE code verifier (base64url, no padding).
pub fn generate_code_verifier() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; VERIFIER_LENGTH] = rng.random();
    BASE64URL.encode(bytes)
}

/// Derive the S256 code challenge for a verifier.
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    BASE64URL.encode(hasher.finalize())
}

/// Generate a random CSRF state parameter.
pub fn generate_state() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; STATE_LENGTH] = rng.random();
    BASE64URL.encode(bytes)
}

#[derive(Debug, Clone)]
struct PendingLogin {
    verifier: String,
    created_at: Instant,
}

/// In-memory `state -> code_verifier` store for logins in flight.
///
/// Entries expire after the configured TTL; expiry is enforced on `take` and
/// swept periodically so abandoned logins do not accumulate. Single-instance
/// by design: a login started on one instance must finish on the same one.
#[derive(Debug)]
pub struct PkceStore {
    entries: DashMap<String, PendingLogin>,
    ttl: Duration,
}

impl PkceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Park a verifier under its state parameter.
    pub fn insert(&self, state: String, verifier: String) {
        self.entries.insert(
            state,
            PendingLogin {
                verifier,
                created_at: Instant::now(),
            },
        );
    }

    /// Claim the verifier for a state. Removes the entry, so a state is
    /// consumable exactly once; expired entries yield `None`.
    pub fn take(&self, state: &str) -> Option<String> {
        let (_, pending) = self.entries.remove(state)?;
        if pending.created_at.elapsed() > self.ttl {
            return None;
        }
        Some(pending.verifier)
    }

    /// Drop entries past their TTL.
    pub fn cleanup_expired(&self) {
        self.entries
            .retain(|_, pending| pending.created_at.elapsed() <= self.ttl);
    }

    /// Number of logins currently in flight (for monitoring)
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Spawn a background task that periodically sweeps expired pending logins.
pub fn spawn_cleanup_task(store: Arc<PkceStore>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            store.cleanup_expired();
            tracing::debug!(
                "PKCE store cleanup complete, {} logins in flight",
                store.entry_count()
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_challenge_rfc7636_vector() {
        // Appendix B of RFC 7636
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_verifier_is_urlsafe_and_unique() {
        let a = generate_code_verifier();
        let b = generate_code_verifier();
        assert_ne!(a, b);
        // 32 bytes -> 43 base64url chars, no padding
        assert_eq!(a.len(), 43);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn test_state_is_consumable_exactly_once() {
        let store = PkceStore::new(Duration::from_secs(600));
        store.insert("state-1".to_string(), "verifier-1".to_string());

        assert_eq!(store.take("state-1").as_deref(), Some("verifier-1"));
        assert_eq!(store.take("state-1"), None, "second take must fail");
    }

    #[test]
    fn test_unknown_state_yields_none() {
        let store = PkceStore::new(Duration::from_secs(600));
        assert_eq!(store.take("never-stored"), None);
    }

    #[test]
    fn test_expired_entry_is_rejected() {
        let store = PkceStore::new(Duration::from_millis(1));
        store.insert("state-1".to_string(), "verifier-1".to_string());
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(store.take("state-1"), None);
    }

    #[test]
    fn test_cleanup_drops_only_expired() {
        let store = PkceStore::new(Duration::from_millis(1));
        store.insert("old".to_string(), "v".to_string());
        std::thread::sleep(Duration::from_millis(10));
        store.cleanup_expired();
        assert_eq!(store.entry_count(), 0);
    }
}
