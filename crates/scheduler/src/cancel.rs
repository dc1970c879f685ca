//! Cancellation tokens for session-scoped operations
//!
//! A review session starts long-running operations (source load, bake,
//! submit). Each one receives a token; tearing the session down cancels
//! every registered token so late results are dropped instead of applied.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

/// Cancellation token for cooperative cancellation
///
/// Operations check `is_cancelled()` at their suspension points and abandon
/// their result once it returns `true`. Clones share the same state.
///
/// # Example
///
/// ```
/// use redline_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if this token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of in-flight operations keyed by an operation identifier
///
/// Registering a key that is already present cancels the previous token, so
/// at most one operation per key is live.
///
/// # Example
///
/// ```
/// use redline_scheduler::CancellationRegistry;
///
/// let registry = CancellationRegistry::new();
/// let token = registry.register("bake");
///
/// registry.cancel_all();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug)]
pub struct CancellationRegistry<K> {
    tokens: Mutex<HashMap<K, CancellationToken>>,
}

impl<K: Eq + Hash> CancellationRegistry<K> {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self { tokens: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an operation and return its token
    pub fn register(&self, key: K) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.lock().insert(key, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel an operation by key. Returns `true` if it was registered.
    pub fn cancel(&self, key: &K) -> bool {
        match self.lock().remove(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and forget every registered operation. Returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let mut tokens = self.lock();
        let count = tokens.len();
        for (_, token) in tokens.drain() {
            token.cancel();
        }
        count
    }

    /// Forget a finished operation without cancelling it
    pub fn unregister(&self, key: &K) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Check whether an operation is registered
    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<K: Eq + Hash> Default for CancellationRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_basic() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_clone() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();
        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_idempotent() {
        let token = CancellationToken::new();

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_registry_cancel_by_key() {
        let registry = CancellationRegistry::new();
        let load = registry.register("load");
        let bake = registry.register("bake");

        assert!(registry.cancel(&"bake"));
        assert!(bake.is_cancelled());
        assert!(!load.is_cancelled());
        assert!(!registry.contains(&"bake"));
    }

    #[test]
    fn test_registry_cancel_not_found() {
        let registry: CancellationRegistry<u32> = CancellationRegistry::new();
        assert!(!registry.cancel(&999));
    }

    #[test]
    fn test_registry_reregister_cancels_previous() {
        let registry = CancellationRegistry::new();
        let first = registry.register(1);
        let second = registry.register(1);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_cancel_all() {
        let registry = CancellationRegistry::new();
        let token1 = registry.register(1);
        let token2 = registry.register(2);

        assert_eq!(registry.cancel_all(), 2);
        assert!(token1.is_cancelled());
        assert!(token2.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_unregister_keeps_token_live() {
        let registry = CancellationRegistry::new();
        let token = registry.register(7);

        assert!(registry.unregister(&7));
        assert!(!registry.unregister(&7));
        assert!(!token.is_cancelled());
    }
}
