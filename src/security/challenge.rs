//! Authentication Challenges
//!
//! Gateways answer a protected request with 401/403 and a JSON body naming
//! the security checks that must be satisfied:
//!
//! ```json
//! { "challenges": { "UserLogin": { "remainingAttempts": 3 } } }
//! ```
//!
//! Each security check is resolved by the handler registered under its name.
//! A handler answers with headers that are attached when the original request
//! is retried.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A challenge raised by the gateway for one security check
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    /// Security check (realm) identifier
    pub security_check: String,

    /// Check-specific data sent by the gateway
    pub payload: Value,
}

/// Credentials produced by a handler, attached to the retried request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeAnswer {
    headers: BTreeMap<String, String>,
}

impl ChallengeAnswer {
    /// Create an empty answer
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header to send with the retry
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Headers carried by this answer
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Fold another answer into this one; later values win
    pub fn merge(&mut self, other: ChallengeAnswer) {
        self.headers.extend(other.headers);
    }
}

/// Resolves challenges for one security check
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    /// Security check this handler is registered under
    fn security_check(&self) -> &str;

    /// Produce an answer for a challenge, or fail to abandon the request
    async fn handle_challenge(&self, challenge: &Challenge) -> anyhow::Result<ChallengeAnswer>;

    /// Called once a request that was challenged by this check succeeds
    fn handle_success(&self, _security_check: &str) {}

    /// Called when `handle_challenge` failed
    fn handle_failure(&self, _challenge: &Challenge, _error: &anyhow::Error) {}
}

/// Registry of challenge handlers keyed by security check
#[derive(Default)]
pub struct ChallengeRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ChallengeHandler>>>,
}

impl ChallengeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any handler for the same security check.
    ///
    /// Returns the replaced handler.
    pub fn register(&self, handler: Arc<dyn ChallengeHandler>) -> Option<Arc<dyn ChallengeHandler>> {
        let key = handler.security_check().to_string();
        let previous = self.handlers.write().insert(key.clone(), handler);
        tracing::debug!(
            security_check = %key,
            replaced = previous.is_some(),
            "registered challenge handler"
        );
        previous
    }

    /// Look up the handler for a security check
    pub fn get(&self, security_check: &str) -> Option<Arc<dyn ChallengeHandler>> {
        self.handlers.read().get(security_check).cloned()
    }

    /// Snapshot of all registered handlers
    pub fn all(&self) -> HashMap<String, Arc<dyn ChallengeHandler>> {
        self.handlers.read().clone()
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Check if no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl fmt::Debug for ChallengeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut checks: Vec<String> = self.handlers.read().keys().cloned().collect();
        checks.sort();
        f.debug_struct("ChallengeRegistry")
            .field("security_checks", &checks)
            .finish()
    }
}

/// Extract challenges from a response, if it carries any.
///
/// Only 401 and 403 responses with a `challenges` object qualify. The result
/// is ordered by security check name.
pub fn parse_challenges(status: u16, body: &[u8]) -> Option<Vec<Challenge>> {
    if status != 401 && status != 403 {
        return None;
    }

    let value: Value = serde_json::from_slice(body).ok()?;
    let challenges = value.get("challenges")?.as_object()?;
    if challenges.is_empty() {
        return None;
    }

    let mut parsed: Vec<Challenge> = challenges
        .iter()
        .map(|(check, payload)| Challenge {
            security_check: check.clone(),
            payload: payload.clone(),
        })
        .collect();
    parsed.sort_by(|a, b| a.security_check.cmp(&b.security_check));
    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticHandler {
        check: String,
        token: String,
    }

    #[async_trait]
    impl ChallengeHandler for StaticHandler {
        fn security_check(&self) -> &str {
            &self.check
        }

        async fn handle_challenge(&self, _challenge: &Challenge) -> anyhow::Result<ChallengeAnswer> {
            Ok(ChallengeAnswer::new().header("Authorization", format!("Bearer {}", self.token)))
        }
    }

    fn handler(check: &str, token: &str) -> Arc<dyn ChallengeHandler> {
        Arc::new(StaticHandler {
            check: check.to_string(),
            token: token.to_string(),
        })
    }

    #[test]
    fn test_register_replaces_same_check() {
        let registry = ChallengeRegistry::new();

        assert!(registry.register(handler("UserLogin", "first")).is_none());
        assert!(registry.register(handler("PinCode", "pin")).is_none());
        assert!(registry.register(handler("UserLogin", "second")).is_some());

        assert_eq!(registry.len(), 2);
        let all = registry.all();
        assert!(all.contains_key("UserLogin"));
        assert!(all.contains_key("PinCode"));
    }

    #[tokio::test]
    async fn test_lookup_returns_latest_handler() {
        let registry = ChallengeRegistry::new();
        registry.register(handler("UserLogin", "first"));
        registry.register(handler("UserLogin", "second"));

        let found = registry.get("UserLogin").unwrap();
        let challenge = Challenge {
            security_check: "UserLogin".to_string(),
            payload: Value::Null,
        };
        let answer = found.handle_challenge(&challenge).await.unwrap();
        assert_eq!(
            answer.headers().get("Authorization"),
            Some(&"Bearer second".to_string())
        );

        assert!(registry.get("Unknown").is_none());
    }

    #[test]
    fn test_parse_challenges() {
        let body = br#"{"challenges":{"UserLogin":{"remainingAttempts":3},"DeviceCheck":null}}"#;

        let parsed = parse_challenges(401, body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].security_check, "DeviceCheck");
        assert_eq!(parsed[1].security_check, "UserLogin");
        assert_eq!(parsed[1].payload["remainingAttempts"], 3);
    }

    #[test]
    fn test_parse_challenges_ignores_other_responses() {
        let body = br#"{"challenges":{"UserLogin":{}}}"#;
        assert!(parse_challenges(200, body).is_none());
        assert!(parse_challenges(500, body).is_none());
        assert!(parse_challenges(401, b"Unauthorized").is_none());
        assert!(parse_challenges(403, br#"{"challenges":{}}"#).is_none());
    }

    #[test]
    fn test_answer_merge() {
        let mut answer = ChallengeAnswer::new().header("X-One", "1").header("X-Two", "a");
        answer.merge(ChallengeAnswer::new().header("X-Two", "b"));
        assert_eq!(answer.headers().len(), 2);
        assert_eq!(answer.headers()["X-Two"], "b");
    }
}
