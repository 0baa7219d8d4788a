//! Tool-call executor — the bridge between model output and tool servers.
//!
//! Takes the tool-call instructions an LLM issued (name + JSON-encoded
//! arguments), resolves them against the live catalog, dispatches them
//! through the [`ToolManager`], and renders each outcome back into a
//! `tool`-role conversation message correlated by call id.
//!
//! Hallucinated names and malformed argument JSON become error messages
//! for the model to read, never panics or dropped calls.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::tools::{matching, ToolCall, ToolDescriptor, ToolManager};

// ─── Conversation Types ─────────────────────────────────────────────────────

/// Message role on the conversation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    Tool,
}

/// A message produced for the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    /// For `tool` messages: which call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ConversationMessage {
    fn tool(tool_call_id: String, content: String) -> Self {
        Self {
            role: Role::Tool,
            content,
            tool_call_id: Some(tool_call_id),
        }
    }
}

/// One tool call as issued by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallInstruction {
    /// Model-assigned call id; generated when absent.
    pub id: Option<String>,
    /// `"server.tool"`, or a bare tool name to be resolved.
    pub name: String,
    /// JSON-encoded argument object (empty string means no arguments).
    pub arguments: String,
}

// ─── Name Resolution ────────────────────────────────────────────────────────

/// Resolve a possibly-unqualified, possibly-hallucinated tool name against
/// the catalog.
///
/// Qualified names must exist in a non-empty catalog (an empty catalog
/// passes them through untouched, trusting the caller). Bare names resolve
/// when exactly one server advertises that tool.
fn resolve_name(
    catalog: &[ToolDescriptor],
    name: &str,
) -> Result<(String, String), OrchestratorError> {
    if let Some((server, tool)) = name.split_once('.') {
        if catalog.is_empty()
            || catalog
                .iter()
                .any(|t| t.server == server && t.name == tool)
        {
            return Ok((server.to_string(), tool.to_string()));
        }
        return Err(OrchestratorError::ToolNotFound {
            name: name.to_string(),
            suggestions: matching::find_similar(
                tool,
                catalog.iter().map(|t| t.name.as_str()),
                3,
            ),
        });
    }

    let owners: Vec<&ToolDescriptor> = catalog.iter().filter(|t| t.name == name).collect();
    match owners.as_slice() {
        [only] => Ok((only.server.clone(), only.name.clone())),
        [] => Err(OrchestratorError::ToolNotFound {
            name: name.to_string(),
            suggestions: matching::find_similar(
                name,
                catalog.iter().map(|t| t.name.as_str()),
                3,
            ),
        }),
        // Ambiguous: every owner is a suggestion.
        many => Err(OrchestratorError::ToolNotFound {
            name: name.to_string(),
            suggestions: many.iter().map(|t| t.qualified_name()).collect(),
        }),
    }
}

fn parse_arguments(
    tool: &str,
    raw: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, OrchestratorError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Map::new());
    }
    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw).map_err(|e| {
        OrchestratorError::ToolParameterParseError {
            tool: tool.to_string(),
            reason: e.to_string(),
        }
    })
}

// ─── ToolCallExecutor ───────────────────────────────────────────────────────

/// Converts model tool-call instructions into invocations and back into
/// conversation messages.
pub struct ToolCallExecutor {
    tools: Arc<ToolManager>,
}

impl ToolCallExecutor {
    pub fn new(tools: Arc<ToolManager>) -> Self {
        Self { tools }
    }

    /// Execute a batch of instructions.
    ///
    /// Returns one `tool`-role message per instruction, in input order:
    /// successful calls carry the tool's text output, failed calls and
    /// unresolvable instructions carry an error description the model can
    /// act on.
    pub async fn execute_instructions(
        &self,
        instructions: &[ToolCallInstruction],
    ) -> Vec<ConversationMessage> {
        let catalog = self.tools.get_available_tools().await;

        // Resolve everything first; keep slots aligned with input order.
        let mut resolved: Vec<Result<ToolCall, String>> = Vec::with_capacity(instructions.len());
        for instruction in instructions {
            resolved.push(self.resolve_instruction(&catalog, instruction));
        }

        // Dispatch the resolvable calls as one batch.
        let calls: Vec<ToolCall> = resolved
            .iter()
            .filter_map(|r| r.as_ref().ok().cloned())
            .collect();
        let results = self.tools.call_tools(&calls).await;
        let mut results = results.into_iter();

        instructions
            .iter()
            .zip(resolved)
            .map(|(instruction, slot)| {
                let call_id = instruction
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
                match slot {
                    Err(message) => ConversationMessage::tool(call_id, message),
                    Ok(_) => match results.next() {
                        Some(result) if result.success => {
                            ConversationMessage::tool(call_id, result.content)
                        }
                        Some(result) => ConversationMessage::tool(
                            call_id,
                            result
                                .error
                                .unwrap_or_else(|| "tool call failed".to_string()),
                        ),
                        None => ConversationMessage::tool(
                            call_id,
                            "tool call produced no result".to_string(),
                        ),
                    },
                }
            })
            .collect()
    }

    fn resolve_instruction(
        &self,
        catalog: &[ToolDescriptor],
        instruction: &ToolCallInstruction,
    ) -> Result<ToolCall, String> {
        let (server, tool) = resolve_name(catalog, &instruction.name).map_err(|e| {
            if let OrchestratorError::ToolNotFound { suggestions, .. } = &e {
                if suggestions.is_empty() {
                    e.to_string()
                } else {
                    format!("{e}; similar tools: {}", suggestions.join(", "))
                }
            } else {
                e.to_string()
            }
        })?;

        let parameters =
            parse_arguments(&instruction.name, &instruction.arguments).map_err(|e| e.to_string())?;

        Ok(ToolCall::new(&server, &tool, parameters))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
