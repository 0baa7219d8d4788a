//! Orchestrator error types.

use thiserror::Error;

/// Errors that can occur across the orchestration core.
///
/// Transport and process failures are normally caught and recorded on the
/// owning `ServerDefinition` rather than propagated; validation and tool-call
/// failures surface as typed results. These variants exist for the paths
/// where a caller genuinely needs a `Result`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A server process failed to start.
    #[error("failed to spawn server '{server}': {reason}")]
    SpawnFailure { server: String, reason: String },

    /// A server process exited outside of an explicit stop.
    #[error("server '{server}' exited unexpectedly")]
    ProcessExitedUnexpectedly { server: String },

    /// No id-matching JSON-RPC response arrived within the window.
    #[error("request to server '{server}' timed out after {timeout_ms}ms")]
    ProtocolTimeout { server: String, timeout_ms: u64 },

    /// The server produced output that never assembled into valid JSON-RPC.
    #[error("malformed response from server '{server}': {reason}")]
    ProtocolMalformedResponse { server: String, reason: String },

    /// The server failed validation or is not reachable.
    #[error("server '{server}' is unavailable")]
    ServerUnavailable { server: String },

    /// The server is disabled in configuration.
    #[error("server '{server}' is disabled")]
    ServerDisabled { server: String },

    /// Bad or missing configuration (unknown server, malformed store).
    #[error("configuration error: {reason}")]
    ConfigurationError { reason: String },

    /// Tool not present in the aggregated catalog.
    #[error("unknown tool: '{name}'")]
    ToolNotFound {
        name: String,
        /// Up to three similar tool names, for error messages.
        suggestions: Vec<String>,
    },

    /// LLM-issued tool arguments failed to parse as JSON.
    #[error("invalid arguments for '{tool}': {reason}")]
    ToolParameterParseError { tool: String, reason: String },

    /// Two scheduled calls contend for the same resource.
    #[error("resource conflict: {description}")]
    ResourceConflict { description: String },

    /// A resource pool had no free slot within the wait ceiling.
    #[error("timed out waiting {waited_ms}ms for a slot in pool '{pool}'")]
    ResourceWaitTimeout { pool: String, waited_ms: u64 },

    /// Retry policy refused further attempts.
    #[error("retry budget exhausted for '{context}' after {attempts} attempts")]
    RetryBudgetExhausted { context: String, attempts: u32 },
}

/// Flat error kind, used by the error-handling manager for classification
/// and by retry policies for allow-listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    SpawnFailure,
    ProcessExitedUnexpectedly,
    ProtocolTimeout,
    ProtocolMalformedResponse,
    ServerUnavailable,
    ServerDisabled,
    ConfigurationError,
    ToolNotFound,
    ToolParameterParseError,
    ResourceConflict,
    ResourceWaitTimeout,
    RetryBudgetExhausted,
}

impl OrchestratorError {
    /// The flat kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SpawnFailure { .. } => ErrorKind::SpawnFailure,
            Self::ProcessExitedUnexpectedly { .. } => ErrorKind::ProcessExitedUnexpectedly,
            Self::ProtocolTimeout { .. } => ErrorKind::ProtocolTimeout,
            Self::ProtocolMalformedResponse { .. } => ErrorKind::ProtocolMalformedResponse,
            Self::ServerUnavailable { .. } => ErrorKind::ServerUnavailable,
            Self::ServerDisabled { .. } => ErrorKind::ServerDisabled,
            Self::ConfigurationError { .. } => ErrorKind::ConfigurationError,
            Self::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            Self::ToolParameterParseError { .. } => ErrorKind::ToolParameterParseError,
            Self::ResourceConflict { .. } => ErrorKind::ResourceConflict,
            Self::ResourceWaitTimeout { .. } => ErrorKind::ResourceWaitTimeout,
            Self::RetryBudgetExhausted { .. } => ErrorKind::RetryBudgetExhausted,
        }
    }
}
