//! Shared types for tool discovery and invocation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Schemas ─────────────────────────────────────────────────────────────────

/// One named parameter in a tool's input schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default)]
    pub prop_type: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Closed set of allowed values, when the parameter is an enum.
    #[serde(rename = "enum", default)]
    pub allowed_values: Option<Vec<String>>,
}

/// A tool's input schema: object type, named properties, required list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type", default = "default_schema_type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

fn default_schema_type() -> String {
    "object".to_string()
}

impl Default for ToolSchema {
    fn default() -> Self {
        Self {
            schema_type: default_schema_type(),
            properties: HashMap::new(),
            required: Vec::new(),
        }
    }
}

// ─── Descriptors ─────────────────────────────────────────────────────────────

/// A callable tool advertised by a server via `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: ToolSchema,
    /// Owning server; tagged by the discovery layer, not sent on the wire.
    #[serde(skip)]
    pub server: String,
}

impl ToolDescriptor {
    /// `"server.tool"` — the name the conversation layer sees.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.server, self.name)
    }
}

// ─── Calls and Results ───────────────────────────────────────────────────────

/// One tool invocation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub server: String,
    pub tool: String,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ToolCall {
    pub fn new(
        server: &str,
        tool: &str,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            server: server.to_string(),
            tool: tool.to_string(),
            parameters,
            created_at: Utc::now(),
        }
    }

    /// `"server.tool"` for logs and conflict reports.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.server, self.tool)
    }

    /// A string-typed parameter, if present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

/// The outcome of one tool invocation. Exactly one `ToolResult` correlates
/// to each `ToolCall.id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn succeeded(call_id: &str, content: String, duration_ms: u64) -> Self {
        Self {
            call_id: call_id.to_string(),
            success: true,
            content,
            error: None,
            duration_ms,
        }
    }

    pub fn failed(call_id: &str, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            call_id: call_id.to_string(),
            success: false,
            content: String::new(),
            error: Some(error.into()),
            duration_ms,
        }
    }

    pub fn timed_out(call_id: &str, timeout_ms: u64) -> Self {
        Self {
            call_id: call_id.to_string(),
            success: false,
            content: String::new(),
            error: Some(format!("tool call timed out after {timeout_ms}ms")),
            duration_ms: timeout_ms,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
