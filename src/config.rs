//! Server definition store — load/save hooks for the external config file.
//!
//! The orchestration core consumes a `server name → ServerDefinition` map
//! persisted as JSON by the surrounding application. This module owns the
//! (de)serialization and merge semantics, not the file's location or when it
//! is written — those belong to the settings layer.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::validation::ValidationStatus;

// ─── Transport ───────────────────────────────────────────────────────────────

/// How to reach a tool-provider server.
///
/// A closed variant set: child process speaking line-delimited JSON-RPC over
/// stdio, or a remote endpoint speaking JSON-RPC over HTTP POST.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        /// Working directory for the child process.
        #[serde(default)]
        cwd: Option<String>,
    },
    Http { url: String },
}

impl TransportConfig {
    /// Whether this is a stdio (child-process) transport.
    pub fn is_stdio(&self) -> bool {
        matches!(self, Self::Stdio { .. })
    }

    /// The executable name for stdio transports (basename of `command`).
    ///
    /// Used as a last resort for kill-by-process-name.
    pub fn process_name(&self) -> Option<String> {
        match self {
            Self::Stdio { command, .. } => Path::new(command)
                .file_name()
                .and_then(|n| n.to_str())
                .map(String::from),
            Self::Http { .. } => None,
        }
    }
}

// ─── Server Definition ───────────────────────────────────────────────────────

/// Runtime state of a server, mutated in place by the ServerManager and
/// ValidationService. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub is_running: bool,
    pub process_id: Option<u32>,
    pub last_error: Option<String>,
    pub validation_status: ValidationStatus,
}

/// A configured tool-provider server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDefinition {
    /// Unique server name (the map key; populated on load).
    #[serde(skip)]
    pub name: String,
    pub transport: TransportConfig,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Seconds between periodic validations (informational for callers).
    #[serde(default = "default_validation_interval")]
    pub validation_interval_secs: u64,
    /// Seconds to wait for the validation handshake.
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,
    #[serde(skip)]
    pub state: RuntimeState,
}

fn default_enabled() -> bool {
    true
}

fn default_validation_interval() -> u64 {
    300
}

fn default_validation_timeout() -> u64 {
    10
}

impl ServerDefinition {
    /// Build a stdio definition with defaults. Convenience for tests and
    /// embedding applications.
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportConfig::Stdio {
                command: command.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                env: HashMap::new(),
                cwd: None,
            },
            enabled: true,
            validation_interval_secs: default_validation_interval(),
            validation_timeout_secs: default_validation_timeout(),
            state: RuntimeState::default(),
        }
    }

    /// Build an HTTP definition with defaults.
    pub fn http(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportConfig::Http {
                url: url.to_string(),
            },
            enabled: true,
            validation_interval_secs: default_validation_interval(),
            validation_timeout_secs: default_validation_timeout(),
            state: RuntimeState::default(),
        }
    }

    /// Record a failure on the definition without propagating it.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.state.last_error = Some(message.into());
    }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Top-level servers configuration file: `{ "servers": { name: def } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServersConfig {
    pub servers: HashMap<String, ServerDefinition>,
}

impl ServersConfig {
    /// Load the server map from a JSON file. Server names are filled in from
    /// the map keys.
    pub fn load_from_path(path: &Path) -> Result<Self, OrchestratorError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::ConfigurationError {
                reason: format!("cannot read {}: {e}", path.display()),
            }
        })?;
        Self::from_json(&raw)
    }

    /// Parse the server map from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, OrchestratorError> {
        let mut config: Self =
            serde_json::from_str(raw).map_err(|e| OrchestratorError::ConfigurationError {
                reason: format!("malformed servers config: {e}"),
            })?;
        for (name, def) in config.servers.iter_mut() {
            def.name = name.clone();
        }
        Ok(config)
    }

    /// Save the server map as pretty-printed JSON. Runtime state is skipped.
    pub fn save_to_path(&self, path: &Path) -> Result<(), OrchestratorError> {
        let raw = serde_json::to_string_pretty(self).map_err(|e| {
            OrchestratorError::ConfigurationError {
                reason: format!("cannot serialize servers config: {e}"),
            }
        })?;
        std::fs::write(path, raw).map_err(|e| OrchestratorError::ConfigurationError {
            reason: format!("cannot write {}: {e}", path.display()),
        })
    }

    /// Merge manual overrides into this config.
    ///
    /// Override entries **fully replace** entries with the same server name.
    /// Override-only servers are added as-is.
    pub fn merge_overrides(&mut self, overrides: HashMap<String, ServerDefinition>) {
        for (name, mut def) in overrides {
            def.name = name.clone();
            self.servers.insert(name, def);
        }
    }

    /// Sorted list of configured server names.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
