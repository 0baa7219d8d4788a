//! The validation service — handshake plus asymmetric-TTL cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use super::{ValidationResult, ValidationStatus};
use crate::events::{EventBus, Notification};
use crate::server::ServerManager;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long a successful validation stays fresh. Healthy-but-slow servers
/// aren't re-hammered.
const SUCCESS_TTL: Duration = Duration::from_secs(600);

/// How long a failed validation stays fresh. Broken servers are retried soon.
const FAILURE_TTL: Duration = Duration::from_secs(30);

// ─── ValidationService ──────────────────────────────────────────────────────

/// Performs the `initialize` handshake and caches the outcome per server.
pub struct ValidationService {
    servers: Arc<ServerManager>,
    cache: RwLock<HashMap<String, ValidationResult>>,
    events: EventBus,
    success_ttl: Duration,
    failure_ttl: Duration,
}

impl ValidationService {
    pub fn new(servers: Arc<ServerManager>, events: EventBus) -> Self {
        Self {
            servers,
            cache: RwLock::new(HashMap::new()),
            events,
            success_ttl: SUCCESS_TTL,
            failure_ttl: FAILURE_TTL,
        }
    }

    /// Override the cache TTLs. Used by tests and embedders with unusual
    /// freshness requirements.
    pub fn with_ttls(mut self, success_ttl: Duration, failure_ttl: Duration) -> Self {
        self.success_ttl = success_ttl;
        self.failure_ttl = failure_ttl;
        self
    }

    /// Validate a server, honoring the cache unless `force` is set.
    ///
    /// Disabled servers short-circuit to Unavailable without any I/O.
    /// A failed handshake against a stdio process that is confirmed alive
    /// is treated as a startup race and optimistically marked Available.
    pub async fn validate_server(&self, name: &str, force: bool) -> ValidationResult {
        let Some(def) = self.servers.definition(name).await else {
            return ValidationResult::config_error(format!("unknown server '{name}'"));
        };

        let (enabled, is_stdio, timeout_secs) = {
            let d = def.read().await;
            (d.enabled, d.transport.is_stdio(), d.validation_timeout_secs)
        };

        if !enabled {
            let result = ValidationResult::unavailable("server disabled");
            self.finish(name, &def, result.clone()).await;
            return result;
        }

        if !force {
            if let Some(cached) = self.fresh_cached(name).await {
                tracing::debug!(server = name, status = ?cached.status, "validation cache hit");
                return cached;
            }
        }

        def.write().await.state.validation_status = ValidationStatus::Validating;

        let params = serde_json::json!({
            "client": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let response = self
            .servers
            .send_request_and_read_response(
                name,
                "initialize",
                Some(params),
                Some(Duration::from_secs(timeout_secs)),
            )
            .await;

        let result = match response {
            Some(resp) if resp.has_result() => ValidationResult::available(),
            failed => {
                if is_stdio && self.servers.is_server_running(name).await {
                    tracing::info!(
                        server = name,
                        "handshake failed but process is alive, assuming startup race"
                    );
                    ValidationResult::available_with_note(
                        "initialize handshake failed but process is alive",
                    )
                } else {
                    match failed {
                        Some(resp) => ValidationResult::unavailable(
                            resp.error_message()
                                .unwrap_or_else(|| "initialize returned no result".into()),
                        ),
                        None => ValidationResult::timeout(timeout_secs),
                    }
                }
            }
        };

        self.finish(name, &def, result.clone()).await;
        result
    }

    async fn finish(
        &self,
        name: &str,
        def: &crate::server::SharedDefinition,
        result: ValidationResult,
    ) {
        def.write().await.state.validation_status = result.status;
        self.events.emit(Notification::ValidationCompleted {
            server: name.to_string(),
            status: result.status,
            error: result.error.clone(),
        });
        self.cache.write().await.insert(name.to_string(), result);
    }

    /// The cached result, fresh or stale.
    pub async fn cached(&self, name: &str) -> Option<ValidationResult> {
        self.cache.read().await.get(name).cloned()
    }

    async fn fresh_cached(&self, name: &str) -> Option<ValidationResult> {
        let cache = self.cache.read().await;
        let result = cache.get(name)?;
        is_fresh(result, self.success_ttl, self.failure_ttl).then(|| result.clone())
    }

    /// Forget a server's cached result and reset its status to Unknown.
    pub async fn reset(&self, name: &str) {
        self.cache.write().await.remove(name);
        if let Some(def) = self.servers.definition(name).await {
            def.write().await.state.validation_status = ValidationStatus::Unknown;
        }
    }
}

/// Whether a cached result is still within its TTL (success vs failure).
fn is_fresh(result: &ValidationResult, success_ttl: Duration, failure_ttl: Duration) -> bool {
    let ttl = if result.is_available {
        success_ttl
    } else {
        failure_ttl
    };
    let age = Utc::now().signed_duration_since(result.timestamp);
    age.num_milliseconds() >= 0 && age.num_milliseconds() as u128 <= ttl.as_millis()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
