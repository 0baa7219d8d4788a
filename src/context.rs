//! Application context — explicit wiring of the core's services.
//!
//! There are no process-wide singletons; everything hangs off one
//! `AppContext` built from the loaded server config and passed into
//! consumers. Tests construct isolated contexts freely.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::{DependencyTable, ToolCallChainManager};
use crate::config::ServersConfig;
use crate::events::EventBus;
use crate::executor::ToolCallExecutor;
use crate::parallel::ParallelExecutionManager;
use crate::recovery::ErrorHandlingManager;
use crate::server::ServerManager;
use crate::tools::ToolManager;
use crate::validation::{AutoValidationService, ValidationService};

/// Default global concurrency cap for parallel tool execution.
const DEFAULT_GLOBAL_CONCURRENCY: usize = 8;

/// The orchestration core, fully wired.
pub struct AppContext {
    pub events: EventBus,
    pub servers: Arc<ServerManager>,
    pub validation: Arc<ValidationService>,
    pub auto_validation: Arc<AutoValidationService>,
    pub tools: Arc<ToolManager>,
    pub chains: Arc<ToolCallChainManager>,
    pub parallel: Arc<ParallelExecutionManager>,
    pub recovery: Arc<ErrorHandlingManager>,
    pub executor: ToolCallExecutor,
}

impl AppContext {
    /// Build the full service graph over a loaded server map.
    pub fn new(config: ServersConfig) -> Self {
        Self::with_concurrency(config, DEFAULT_GLOBAL_CONCURRENCY)
    }

    /// Build with an explicit global concurrency cap.
    pub fn with_concurrency(config: ServersConfig, max_concurrent: usize) -> Self {
        let events = EventBus::new();
        let servers = Arc::new(ServerManager::new(config, events.clone()));
        let validation = Arc::new(ValidationService::new(Arc::clone(&servers), events.clone()));
        let auto_validation = Arc::new(AutoValidationService::new(Arc::clone(&validation)));
        let tools = Arc::new(ToolManager::new(
            Arc::clone(&servers),
            Arc::clone(&auto_validation),
            events.clone(),
        ));
        let chains = Arc::new(ToolCallChainManager::new(DependencyTable::with_defaults()));
        let parallel = Arc::new(ParallelExecutionManager::new(max_concurrent));
        let recovery = Arc::new(ErrorHandlingManager::new());
        let executor = ToolCallExecutor::new(Arc::clone(&tools));

        Self {
            events,
            servers,
            validation,
            auto_validation,
            tools,
            chains,
            parallel,
            recovery,
            executor,
        }
    }

    /// Start every configured server; per-name success map.
    pub async fn start(&self) -> HashMap<String, bool> {
        self.servers.start_all_servers().await
    }

    /// Cancel outstanding work and kill every managed process.
    pub async fn shutdown(&self) {
        self.servers.shutdown().await;
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerDefinition;

    #[tokio::test]
    async fn test_context_wires_and_shuts_down() {
        let mut config = ServersConfig::default();
        let def = ServerDefinition::stdio("echo", "cat", &[]);
        config.servers.insert(def.name.clone(), def);

        let context = AppContext::new(config);
        let started = context.start().await;
        assert_eq!(started.get("echo"), Some(&true));
        assert!(context.servers.is_server_running("echo").await);

        context.shutdown().await;
        assert!(!context.servers.is_server_running("echo").await);
    }

    #[tokio::test]
    async fn test_isolated_contexts_do_not_share_state() {
        let a = AppContext::new(ServersConfig::default());
        let b = AppContext::new(ServersConfig::default());

        let error = crate::errors::OrchestratorError::ProtocolTimeout {
            server: "x".into(),
            timeout_ms: 1,
        };
        a.recovery.handle_error(&error, "op", "network");
        assert_eq!(a.recovery.history_len(), 1);
        assert_eq!(b.recovery.history_len(), 0);
    }
}
