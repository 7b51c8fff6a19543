//! In-process cancellation of running pipelines.
//!
//! A persisted stop marker on the checkpoint covers requests coming from other processes;
//! the token covers the process running the pipeline and is checked first.

use lakeset_types::DatasetId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tokens of the pipelines currently running in this process, by dataset.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<DatasetId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh token for `id`, replacing any previous one.
    pub fn register(&self, id: DatasetId) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(id, token.clone());
        token
    }

    /// Cancels the pipeline of `id` if it runs here. Returns whether it was found.
    pub fn cancel(&self, id: &DatasetId) -> bool {
        match self.lock().get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every running pipeline and returns their ids.
    pub fn cancel_all(&self) -> Vec<DatasetId> {
        let tokens = self.lock();
        tokens.values().for_each(CancellationToken::cancel);
        tokens.keys().copied().collect()
    }

    pub fn remove(&self, id: &DatasetId) {
        self.lock().remove(id);
    }

    pub fn is_running(&self, id: &DatasetId) -> bool {
        self.lock().contains_key(id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DatasetId, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_the_registered_token() {
        let registry = CancellationRegistry::new();
        let id = DatasetId::new();
        let token = registry.register(id);

        assert!(registry.cancel(&id));
        assert!(token.is_cancelled());
    }

    #[test]
    fn unknown_dataset_is_not_cancelled() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel(&DatasetId::new()));
    }

    #[test]
    fn registering_again_starts_uncancelled() {
        let registry = CancellationRegistry::new();
        let id = DatasetId::new();
        registry.register(id).cancel();

        let token = registry.register(id);
        assert!(!token.is_cancelled());
        registry.remove(&id);
        assert!(!registry.is_running(&id));
    }

    #[test]
    fn cancel_all_reports_every_dataset() {
        let registry = CancellationRegistry::new();
        let a = registry.register(DatasetId::new());
        let b = registry.register(DatasetId::new());

        assert_eq!(registry.cancel_all().len(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
    }
}
