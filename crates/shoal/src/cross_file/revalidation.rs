//
// cross_file/revalidation.rs
//
// Debounced diagnostics scheduling
//

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;

/// Tracks pending diagnostics work per file
#[derive(Debug, Default)]
pub struct RevalidationState {
    /// Pending tasks keyed by URI
    pending: RwLock<HashMap<Url, CancellationToken>>,
}

impl RevalidationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule work for a file, cancelling any pending work.
    /// Returns a cancellation token for the new task.
    pub fn schedule(&self, uri: Url) -> CancellationToken {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(old_token) = pending.remove(&uri) {
            old_token.cancel();
        }
        let token = CancellationToken::new();
        pending.insert(uri, token.clone());
        token
    }

    /// Mark work as complete
    pub fn complete(&self, uri: &Url) {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        pending.remove(uri);
    }

    /// Cancel pending work for a URI
    pub fn cancel(&self, uri: &Url) {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = pending.remove(uri) {
            token.cancel();
        }
    }

    /// Cancel all pending work
    pub fn cancel_all(&self) {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        for (_, token) in pending.drain() {
            token.cancel();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Diagnostics publish gating: never publish for a document version older
/// than one already published.
#[derive(Debug, Default)]
pub struct DiagnosticsGate {
    last_published_version: RwLock<HashMap<Url, i32>>,
}

impl DiagnosticsGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_publish(&self, uri: &Url, version: i32) -> bool {
        let last_published = self
            .last_published_version
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match last_published.get(uri) {
            Some(&last) => version >= last,
            None => true,
        }
    }

    pub fn record_publish(&self, uri: &Url, version: i32) {
        self.last_published_version
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri.clone(), version);
    }

    /// Clear all state for a URI (e.g., when document is closed)
    pub fn clear(&self, uri: &Url) {
        self.last_published_version
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
    }
}
