//! Tool discovery and invocation across all healthy servers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, Semaphore};

use super::matching;
use super::types::{ToolCall, ToolDescriptor, ToolResult};
use crate::events::{EventBus, Notification, ToolCallStatus};
use crate::server::ServerManager;
use crate::validation::AutoValidationService;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long a discovered catalog stays fresh.
const CATALOG_TTL: Duration = Duration::from_secs(300);

/// Default timeout for one `tools/call` round-trip.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Batch execution is capped at `min(MAX_BATCH_CONCURRENCY, batch size)`.
const MAX_BATCH_CONCURRENCY: usize = 3;

// ─── ToolManager ─────────────────────────────────────────────────────────────

struct CatalogCache {
    tools: Vec<ToolDescriptor>,
    fetched_at: Instant,
}

/// Discovers, matches, and invokes tools.
pub struct ToolManager {
    servers: Arc<ServerManager>,
    validation: Arc<AutoValidationService>,
    catalog: RwLock<Option<CatalogCache>>,
    events: EventBus,
    call_timeout: Duration,
}

impl ToolManager {
    pub fn new(
        servers: Arc<ServerManager>,
        validation: Arc<AutoValidationService>,
        events: EventBus,
    ) -> Self {
        Self {
            servers,
            validation,
            catalog: RwLock::new(None),
            events,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Override the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    // ─── Discovery ───────────────────────────────────────────────────────

    /// All tools across enabled, validated, running servers.
    ///
    /// Each server is queried with `tools/list` in parallel; results are
    /// tagged with the owning server, merged in server-name order, and
    /// cached for five minutes.
    pub async fn get_available_tools(&self) -> Vec<ToolDescriptor> {
        {
            let cache = self.catalog.read().await;
            if let Some(cache) = cache.as_ref() {
                if cache.fetched_at.elapsed() <= CATALOG_TTL {
                    return cache.tools.clone();
                }
            }
        }

        let names = self.servers.server_names().await;
        let per_server = futures::future::join_all(
            names
                .iter()
                .map(|name| self.discover_server_tools(name)),
        )
        .await;

        let tools: Vec<ToolDescriptor> = per_server.into_iter().flatten().collect();
        tracing::info!(count = tools.len(), "tool catalog refreshed");

        *self.catalog.write().await = Some(CatalogCache {
            tools: tools.clone(),
            fetched_at: Instant::now(),
        });
        tools
    }

    async fn discover_server_tools(&self, name: &str) -> Vec<ToolDescriptor> {
        let Some(def) = self.servers.definition(name).await else {
            return Vec::new();
        };
        if !def.read().await.enabled {
            return Vec::new();
        }
        if !self.validation.ensure_validated(name).await.is_available {
            return Vec::new();
        }
        if !self.servers.is_server_running(name).await {
            return Vec::new();
        }

        let response = self
            .servers
            .send_request_and_read_response(name, "tools/list", None, None)
            .await;

        let Some(result) = response.and_then(|r| r.result) else {
            tracing::warn!(server = name, "tools/list returned nothing");
            return Vec::new();
        };

        match result.get("tools") {
            Some(raw) => match serde_json::from_value::<Vec<ToolDescriptor>>(raw.clone()) {
                Ok(mut tools) => {
                    for tool in &mut tools {
                        tool.server = name.to_string();
                    }
                    tools
                }
                Err(e) => {
                    tracing::warn!(server = name, error = %e, "malformed tools/list payload");
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    }

    /// Drop the cached catalog so the next query re-discovers.
    pub async fn invalidate_catalog(&self) {
        *self.catalog.write().await = None;
    }

    /// Concise capability line for observers: per-server tool counts.
    pub async fn capability_summary(&self) -> String {
        let tools = self.get_available_tools().await;
        if tools.is_empty() {
            return "No tools currently available.".to_string();
        }

        let mut per_server: Vec<(String, usize)> = Vec::new();
        for tool in &tools {
            match per_server.iter_mut().find(|(name, _)| name == &tool.server) {
                Some((_, count)) => *count += 1,
                None => per_server.push((tool.server.clone(), 1)),
            }
        }
        let parts: Vec<String> = per_server
            .iter()
            .map(|(name, count)| format!("{name} ({count})"))
            .collect();
        format!(
            "{} tools across {} servers: {}.",
            tools.len(),
            per_server.len(),
            parts.join(", ")
        )
    }

    /// Top-5 tools relevant to a free-text query, from the live catalog.
    pub async fn match_relevant_tools(&self, query: &str) -> Vec<ToolDescriptor> {
        let tools = self.get_available_tools().await;
        matching::match_relevant_tools(query, &tools)
    }

    // ─── Execution ───────────────────────────────────────────────────────

    /// Execute one tool call.
    ///
    /// Failures come back as unsuccessful results, never errors: an
    /// unreachable server or error envelope is a Failed result, an
    /// empty/late response a Timeout result.
    pub async fn call_tool(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        self.emit_call(call, ToolCallStatus::Started);

        if !self.servers.is_server_running(&call.server).await {
            let result = ToolResult::failed(
                &call.id,
                format!("server '{}' is not running", call.server),
                start.elapsed().as_millis() as u64,
            );
            self.emit_call(call, ToolCallStatus::Failed);
            return result;
        }

        self.emit_call(call, ToolCallStatus::InProgress);

        let params = serde_json::json!({
            "name": call.tool,
            "arguments": call.parameters,
        });
        let response = self
            .servers
            .send_request_and_read_response(
                &call.server,
                "tools/call",
                Some(params),
                Some(self.call_timeout),
            )
            .await;

        let elapsed = start.elapsed().as_millis() as u64;
        match response {
            None => {
                self.emit_call(call, ToolCallStatus::Timeout);
                ToolResult::timed_out(&call.id, self.call_timeout.as_millis() as u64)
            }
            Some(resp) => {
                if let Some(message) = resp.error_message() {
                    self.emit_call(call, ToolCallStatus::Failed);
                    return ToolResult::failed(&call.id, message, elapsed);
                }
                match resp.result {
                    Some(result) if !result.is_null() => {
                        self.emit_call(call, ToolCallStatus::Completed);
                        ToolResult::succeeded(&call.id, extract_text_content(&result), elapsed)
                    }
                    // An empty envelope is indistinguishable from a server
                    // that silently gave up.
                    _ => {
                        self.emit_call(call, ToolCallStatus::Timeout);
                        ToolResult::timed_out(&call.id, self.call_timeout.as_millis() as u64)
                    }
                }
            }
        }
    }

    /// Execute a batch, capped at `min(3, batch size)` concurrent calls.
    /// Results come back in input order.
    pub async fn call_tools(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        if calls.is_empty() {
            return Vec::new();
        }
        let cap = MAX_BATCH_CONCURRENCY.min(calls.len());
        let semaphore = Arc::new(Semaphore::new(cap));

        futures::future::join_all(calls.iter().map(|call| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                // Closed only on drop, which can't happen while we borrow it.
                let _permit = semaphore.acquire().await;
                self.call_tool(call).await
            }
        }))
        .await
    }

    fn emit_call(&self, call: &ToolCall, status: ToolCallStatus) {
        self.events.emit(Notification::ToolCallStatusChanged {
            call_id: call.id.clone(),
            tool: call.qualified_name(),
            status,
        });
    }
}

// ─── Content Extraction ─────────────────────────────────────────────────────

/// Join all text-typed content parts with newlines. Falls back to the raw
/// JSON when the result carries no content array.
fn extract_text_content(result: &serde_json::Value) -> String {
    match result.get("content").and_then(|c| c.as_array()) {
        Some(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        None => result.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerDefinition, ServersConfig};
    use crate::validation::ValidationService;

    fn setup(defs: Vec<ServerDefinition>) -> (Arc<ServerManager>, ToolManager) {
        let mut config = ServersConfig::default();
        for def in defs {
            config.servers.insert(def.name.clone(), def);
        }
        let events = EventBus::new();
        let servers = Arc::new(ServerManager::new(config, events.clone()));
        let validation = Arc::new(AutoValidationService::new(Arc::new(
            ValidationService::new(Arc::clone(&servers), events.clone()),
        )));
        let tools = ToolManager::new(Arc::clone(&servers), validation, events);
        (servers, tools)
    }

    #[test]
    fn test_extract_text_content_joins_parts() {
        let result = serde_json::json!({
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "image", "data": "..."},
                {"type": "text", "text": "world"}
            ]
        });
        assert_eq!(extract_text_content(&result), "hello\nworld");
    }

    #[test]
    fn test_extract_text_content_fallback() {
        let result = serde_json::json!({"value": 3});
        assert_eq!(extract_text_content(&result), r#"{"value":3}"#);
    }

    #[tokio::test]
    async fn test_discovery_lists_and_tags_tools() {
        // Answers initialize (id 1) then tools/list (id 2).
        let script = concat!(
            r#"read a; echo '{"jsonrpc":"2.0","id":1,"result":{"capabilities":{}}}'; "#,
            r#"read b; echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"read_file","description":"Read a file"},{"name":"write_file","description":"Write a file"}]}}'; "#,
            "sleep 2",
        );
        let def = ServerDefinition::stdio("fs", "sh", &["-c", script]);
        let (servers, tools) = setup(vec![def]);
        assert!(servers.start_server("fs").await);

        let catalog = tools.get_available_tools().await;
        assert_eq!(catalog.len(), 2);
        assert!(catalog.iter().all(|t| t.server == "fs"));
        assert!(catalog.iter().any(|t| t.name == "read_file"));

        // Second query hits the cache — the one-shot script is exhausted,
        // so a live re-discovery would come back empty.
        let cached = tools.get_available_tools().await;
        assert_eq!(cached.len(), 2);

        servers.stop_server("fs").await;
    }

    #[tokio::test]
    async fn test_capability_summary_empty() {
        let (_, tools) = setup(vec![]);
        assert_eq!(
            tools.capability_summary().await,
            "No tools currently available."
        );
    }

    #[tokio::test]
    async fn test_discovery_skips_disabled_servers() {
        let mut def = ServerDefinition::stdio("off", "cat", &[]);
        def.enabled = false;
        let (_, tools) = setup(vec![def]);

        let catalog = tools.get_available_tools().await;
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_call_tool_success_concatenates_text() {
        let script = concat!(
            r#"read a; echo '{"jsonrpc":"2.0","id":1,"result":{"content":[{"type":"text","text":"alpha"},{"type":"text","text":"beta"}]}}'; "#,
            "sleep 2",
        );
        let def = ServerDefinition::stdio("fs", "sh", &["-c", script]);
        let (servers, tools) = setup(vec![def]);
        assert!(servers.start_server("fs").await);

        let call = ToolCall::new("fs", "read_file", serde_json::Map::new());
        let result = tools.call_tool(&call).await;
        assert!(result.success);
        assert_eq!(result.content, "alpha\nbeta");
        assert_eq!(result.call_id, call.id);

        servers.stop_server("fs").await;
    }

    #[tokio::test]
    async fn test_call_tool_error_envelope_is_failed_result() {
        let script = concat!(
            r#"read a; echo '{"jsonrpc":"2.0","id":1,"result":null,"error":{"code":-32602,"message":"missing path"}}'; "#,
            "sleep 2",
        );
        let def = ServerDefinition::stdio("fs", "sh", &["-c", script]);
        let (servers, tools) = setup(vec![def]);
        assert!(servers.start_server("fs").await);

        let call = ToolCall::new("fs", "read_file", serde_json::Map::new());
        let result = tools.call_tool(&call).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("-32602"));
        assert!(error.contains("missing path"));

        servers.stop_server("fs").await;
    }

    #[tokio::test]
    async fn test_call_tool_timeout_result() {
        let def = ServerDefinition::stdio("silent", "sleep", &["30"]);
        let (servers, tools_base) = setup(vec![def]);
        let tools = tools_base.with_call_timeout(Duration::from_millis(200));
        assert!(servers.start_server("silent").await);

        let call = ToolCall::new("silent", "anything", serde_json::Map::new());
        let result = tools.call_tool(&call).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));

        servers.stop_server("silent").await;
    }

    #[tokio::test]
    async fn test_call_tool_server_not_running() {
        let def = ServerDefinition::stdio("down", "cat", &[]);
        let (_, tools) = setup(vec![def]);

        let call = ToolCall::new("down", "read_file", serde_json::Map::new());
        let result = tools.call_tool(&call).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not running"));
    }

    #[tokio::test]
    async fn test_call_tools_preserves_order_and_correlation() {
        let (_, tools) = setup(vec![]);
        let calls: Vec<ToolCall> = (0..5)
            .map(|_| ToolCall::new("ghost", "noop", serde_json::Map::new()))
            .collect();

        let results = tools.call_tools(&calls).await;
        assert_eq!(results.len(), 5);
        for (call, result) in calls.iter().zip(&results) {
            assert_eq!(call.id, result.call_id);
            assert!(!result.success); // unknown server
        }
    }

    #[tokio::test]
    async fn test_call_status_events_are_emitted() {
        let events = {
            let def = ServerDefinition::stdio("down", "cat", &[]);
            let mut config = ServersConfig::default();
            config.servers.insert(def.name.clone(), def);
            let events = EventBus::new();
            let servers = Arc::new(ServerManager::new(config, events.clone()));
            let validation = Arc::new(AutoValidationService::new(Arc::new(
                ValidationService::new(Arc::clone(&servers), events.clone()),
            )));
            let tools = ToolManager::new(servers, validation, events.clone());
            let mut rx = events.subscribe();

            let call = ToolCall::new("down", "noop", serde_json::Map::new());
            tools.call_tool(&call).await;

            let mut seen = Vec::new();
            while let Ok(event) = rx.try_recv() {
                if let Notification::ToolCallStatusChanged { status, .. } = event {
                    seen.push(status);
                }
            }
            seen
        };
        assert_eq!(events, vec![ToolCallStatus::Started, ToolCallStatus::Failed]);
    }
}
