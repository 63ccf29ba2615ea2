//! Global Headers
//!
//! Headers attached to every outgoing request. Dispatch takes a snapshot, so
//! later mutations never leak into a request that is already in flight.

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Thread-safe set of global headers
#[derive(Debug, Default)]
pub struct GlobalHeaders {
    headers: RwLock<BTreeMap<String, String>>,
}

impl GlobalHeaders {
    /// Create an empty header set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a header set seeded with initial values
    pub fn with_headers(initial: BTreeMap<String, String>) -> Self {
        Self {
            headers: RwLock::new(initial),
        }
    }

    /// Add or replace a header
    pub fn add(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let previous = self.headers.write().insert(name.clone(), value.into());
        tracing::debug!(header = %name, replaced = previous.is_some(), "global header set");
    }

    /// Remove a header; returns its value if it was present
    pub fn remove(&self, name: &str) -> Option<String> {
        let removed = self.headers.write().remove(name);
        if removed.is_some() {
            tracing::debug!(header = %name, "global header removed");
        }
        removed
    }

    /// Copy of the current headers
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.headers.read().clone()
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.headers.read().len()
    }

    /// Check if no header is set
    pub fn is_empty(&self) -> bool {
        self.headers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let headers = GlobalHeaders::new();
        headers.add("X-App", "one");
        headers.add("X-App", "two");

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.snapshot()["X-App"], "two");
    }

    #[test]
    fn test_add_then_remove_restores_previous_state() {
        let headers = GlobalHeaders::with_headers(
            [("X-Tenant".to_string(), "acme".to_string())]
                .into_iter()
                .collect(),
        );
        let before = headers.snapshot();

        headers.add("X-Test", "1");
        assert_eq!(headers.remove("X-Test"), Some("1".to_string()));
        assert_eq!(headers.snapshot(), before);

        assert_eq!(headers.remove("X-Never-Added"), None);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let headers = GlobalHeaders::new();
        headers.add("X-A", "1");
        let snapshot = headers.snapshot();

        headers.add("X-A", "2");
        headers.add("X-B", "3");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["X-A"], "1");
    }
}
