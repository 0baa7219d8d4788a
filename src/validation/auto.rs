//! Validate-once policy.
//!
//! Once a server has been marked Available, it is never auto-revalidated
//! again unless its result is explicitly reset. These are long-lived local
//! subprocesses; reduced overhead wins over freshness here, at the cost of
//! silently serving a stale status if a process later wedges without
//! exiting.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{ValidationResult, ValidationService};

/// Wraps a [`ValidationService`] with a terminal-Available policy.
pub struct AutoValidationService {
    service: Arc<ValidationService>,
    /// Servers whose validation reached Available at least once.
    validated: RwLock<HashSet<String>>,
}

impl AutoValidationService {
    pub fn new(service: Arc<ValidationService>) -> Self {
        Self {
            service,
            validated: RwLock::new(HashSet::new()),
        }
    }

    /// The underlying service, for forced or cache-inspecting calls.
    pub fn service(&self) -> &ValidationService {
        &self.service
    }

    /// Validate unless the server has already reached Available.
    ///
    /// For an already-validated server the cached result is returned with no
    /// handshake, regardless of its age.
    pub async fn ensure_validated(&self, name: &str) -> ValidationResult {
        if self.validated.read().await.contains(name) {
            if let Some(cached) = self.service.cached(name).await {
                tracing::trace!(server = name, "validate-once: serving terminal result");
                return cached;
            }
        }

        let result = self.service.validate_server(name, false).await;
        if result.is_available {
            self.validated.write().await.insert(name.to_string());
        }
        result
    }

    /// Whether the server is pinned Available under validate-once.
    pub async fn is_marked_validated(&self, name: &str) -> bool {
        self.validated.read().await.contains(name)
    }

    /// Drop the terminal mark and the cached result so the next trigger
    /// re-validates from scratch.
    pub async fn reset_server(&self, name: &str) {
        self.validated.write().await.remove(name);
        self.service.reset(name).await;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
