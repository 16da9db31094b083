//! Cooperative cancellation, one token per in-flight operation.
//!
//! Tokens are held in an arena keyed by environment version rather than a
//! shared singleton, so cancelling one environment's operation never
//! affects another's. Stages check [`CancelToken::is_cancelled`] before
//! expensive work and at natural checkpoints (per chunk, per archive
//! entry, per subprocess).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::types::EnvVersion;

/// A single shared abort signal, cheap to clone across stages.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation. Idempotent.
    pub fn signal(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves otherwise,
    /// which makes it suitable for `tokio::select!` against subprocess
    /// completion.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without signalling; park forever.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Arena of active tokens, keyed by environment version.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<EnvVersion, CancelToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for an operation that is about to start.
    pub fn begin(&self, version: &EnvVersion) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .expect("cancel registry poisoned")
            .insert(version.clone(), token.clone());
        token
    }

    /// Drop the token once the operation has settled.
    pub fn finish(&self, version: &EnvVersion) {
        self.tokens
            .lock()
            .expect("cancel registry poisoned")
            .remove(version);
    }

    /// Signal the active token for a version. Returns false when nothing
    /// is in flight.
    pub fn cancel(&self, version: &EnvVersion) -> bool {
        let tokens = self.tokens.lock().expect("cancel registry poisoned");
        match tokens.get(version) {
            Some(token) => {
                token.signal();
                true
            }
            None => false,
        }
    }
}
