//! Chain analysis — ordering, conflicts, result validation, rollback.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::dependencies::DependencyTable;
use crate::tools::{ToolCall, ToolResult};

// ─── Plan Types ─────────────────────────────────────────────────────────────

/// How two calls collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The dependency table declares the tool pair incompatible.
    Direct,
    /// Both calls target the same `path` parameter value.
    Resource,
}

/// One detected collision between two calls in a batch.
#[derive(Debug, Clone)]
pub struct ConflictInfo {
    pub kind: ConflictKind,
    pub first_call_id: String,
    pub second_call_id: String,
    pub description: String,
}

/// A call in its computed position, augmented with declared pre/post
/// actions. The actions are informational only.
#[derive(Debug, Clone)]
pub struct PlannedCall {
    pub call: ToolCall,
    pub pre_actions: Vec<String>,
    pub post_actions: Vec<String>,
}

/// A rollback recorded against an active chain. Pure bookkeeping — no
/// compensating action is invoked.
#[derive(Debug, Clone)]
pub struct RollbackRequest {
    pub call_id: String,
    pub requested_at: DateTime<Utc>,
}

/// An ordered, dependency-resolved plan for a batch of tool calls.
#[derive(Debug, Clone)]
pub struct ExecutionChain {
    pub id: String,
    pub original_calls: Vec<ToolCall>,
    pub execution_order: Vec<PlannedCall>,
    pub conflicts: Vec<ConflictInfo>,
    pub rollback_requests: Vec<RollbackRequest>,
}

/// Outcome of per-tool result validation.
#[derive(Debug, Clone)]
pub struct ResultValidation {
    pub passed: bool,
    pub failed_rules: Vec<String>,
}

/// A named predicate applied to a tool's results.
#[derive(Clone)]
pub struct ValidationRule {
    pub name: String,
    predicate: Arc<dyn Fn(&ToolResult) -> bool + Send + Sync>,
}

impl ValidationRule {
    pub fn new(
        name: &str,
        predicate: impl Fn(&ToolResult) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn check(&self, result: &ToolResult) -> bool {
        (self.predicate)(result)
    }
}

impl std::fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationRule")
            .field("name", &self.name)
            .finish()
    }
}

// ─── ToolCallChainManager ───────────────────────────────────────────────────

/// Plans batches of tool calls. Never executes anything.
pub struct ToolCallChainManager {
    table: DependencyTable,
    validators: RwLock<HashMap<String, Vec<ValidationRule>>>,
    active: RwLock<HashMap<String, ExecutionChain>>,
}

impl ToolCallChainManager {
    pub fn new(table: DependencyTable) -> Self {
        Self {
            table,
            validators: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Build the execution plan for a batch.
    ///
    /// Detects direct conflicts (declared-incompatible pairs) and resource
    /// conflicts (identical `path` parameter — compared by exact string
    /// equality, no normalization), orders calls by DFS topological sort
    /// over declared prerequisites (cycles are logged and broken, never
    /// fatal), and augments each call with its declared pre/post actions.
    pub fn analyze_dependencies(&self, calls: &[ToolCall]) -> ExecutionChain {
        let conflicts = self.detect_conflicts(calls);
        let order = self.topological_order(calls);

        let execution_order = order
            .into_iter()
            .map(|call| {
                let (pre, post) = match self.table.get(&call.tool) {
                    Some(info) => (info.prerequisites.clone(), info.post_actions.clone()),
                    None => (Vec::new(), Vec::new()),
                };
                PlannedCall {
                    call,
                    pre_actions: pre,
                    post_actions: post,
                }
            })
            .collect();

        let chain = ExecutionChain {
            id: uuid::Uuid::new_v4().to_string(),
            original_calls: calls.to_vec(),
            execution_order,
            conflicts,
            rollback_requests: Vec::new(),
        };

        if let Ok(mut active) = self.active.write() {
            active.insert(chain.id.clone(), chain.clone());
        }
        tracing::debug!(
            chain = %chain.id,
            calls = calls.len(),
            conflicts = chain.conflicts.len(),
            "dependency analysis complete"
        );
        chain
    }

    fn detect_conflicts(&self, calls: &[ToolCall]) -> Vec<ConflictInfo> {
        let mut conflicts = Vec::new();
        for i in 0..calls.len() {
            for j in (i + 1)..calls.len() {
                let (a, b) = (&calls[i], &calls[j]);

                if self.table.conflicts(&a.tool, &b.tool) {
                    conflicts.push(ConflictInfo {
                        kind: ConflictKind::Direct,
                        first_call_id: a.id.clone(),
                        second_call_id: b.id.clone(),
                        description: format!(
                            "'{}' and '{}' are declared incompatible",
                            a.tool, b.tool
                        ),
                    });
                }

                if let (Some(pa), Some(pb)) = (a.param_str("path"), b.param_str("path")) {
                    if pa == pb {
                        conflicts.push(ConflictInfo {
                            kind: ConflictKind::Resource,
                            first_call_id: a.id.clone(),
                            second_call_id: b.id.clone(),
                            description: format!(
                                "'{}' and '{}' both target path '{pa}'",
                                a.tool, b.tool
                            ),
                        });
                    }
                }
            }
        }
        conflicts
    }

    /// DFS topological sort over prerequisite edges. A call's prerequisites
    /// (when present in the batch) are placed before it; cycles are broken
    /// at the back edge and logged.
    fn topological_order(&self, calls: &[ToolCall]) -> Vec<ToolCall> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InStack,
            Done,
        }

        let mut marks: Vec<Mark> = vec![Mark::Unvisited; calls.len()];
        let mut order: Vec<usize> = Vec::with_capacity(calls.len());

        // predecessors[i] = indices that must run before call i.
        let predecessors: Vec<Vec<usize>> = calls
            .iter()
            .map(|call| {
                let prereqs = self.table.prerequisites(&call.tool);
                calls
                    .iter()
                    .enumerate()
                    .filter(|(_, other)| {
                        other.id != call.id && prereqs.iter().any(|p| p == &other.tool)
                    })
                    .map(|(idx, _)| idx)
                    .collect()
            })
            .collect();

        fn visit(
            idx: usize,
            calls: &[ToolCall],
            predecessors: &[Vec<usize>],
            marks: &mut [Mark],
            order: &mut Vec<usize>,
        ) {
            match marks[idx] {
                Mark::Done => return,
                Mark::InStack => {
                    tracing::warn!(
                        tool = %calls[idx].tool,
                        "dependency cycle detected, breaking edge"
                    );
                    return;
                }
                Mark::Unvisited => {}
            }
            marks[idx] = Mark::InStack;
            for &pred in &predecessors[idx] {
                visit(pred, calls, predecessors, marks, order);
            }
            marks[idx] = Mark::Done;
            order.push(idx);
        }

        for idx in 0..calls.len() {
            visit(idx, calls, &predecessors, &mut marks, &mut order);
        }

        order.into_iter().map(|idx| calls[idx].clone()).collect()
    }

    // ─── Result Validation ───────────────────────────────────────────────

    /// Register a predicate for a tool's results.
    pub fn register_validator(&self, tool: &str, rule: ValidationRule) {
        if let Ok(mut validators) = self.validators.write() {
            validators.entry(tool.to_string()).or_default().push(rule);
        }
    }

    /// Run every registered predicate for a tool against a result.
    /// With no registered rules the result passes vacuously.
    pub fn validate_tool_call_result(&self, tool: &str, result: &ToolResult) -> ResultValidation {
        let Ok(validators) = self.validators.read() else {
            return ResultValidation {
                passed: true,
                failed_rules: Vec::new(),
            };
        };

        let failed_rules: Vec<String> = validators
            .get(tool)
            .map(|rules| {
                rules
                    .iter()
                    .filter(|rule| !rule.check(result))
                    .map(|rule| rule.name.clone())
                    .collect()
            })
            .unwrap_or_default();

        ResultValidation {
            passed: failed_rules.is_empty(),
            failed_rules,
        }
    }

    // ─── Rollback Bookkeeping ────────────────────────────────────────────

    /// Record rollback intent for a call in an active chain.
    ///
    /// Returns `false` when the chain is unknown or the call isn't part of
    /// it. No compensating action runs.
    pub fn rollback_tool_call(&self, chain_id: &str, call_id: &str) -> bool {
        let Ok(mut active) = self.active.write() else {
            return false;
        };
        let Some(chain) = active.get_mut(chain_id) else {
            tracing::warn!(chain = chain_id, "rollback requested for unknown chain");
            return false;
        };
        if !chain.original_calls.iter().any(|c| c.id == call_id) {
            tracing::warn!(chain = chain_id, call = call_id, "rollback for foreign call");
            return false;
        }
        chain.rollback_requests.push(RollbackRequest {
            call_id: call_id.to_string(),
            requested_at: Utc::now(),
        });
        tracing::info!(chain = chain_id, call = call_id, "rollback recorded");
        true
    }

    /// Snapshot of an active chain, including recorded rollbacks.
    pub fn active_chain(&self, chain_id: &str) -> Option<ExecutionChain> {
        self.active.read().ok()?.get(chain_id).cloned()
    }

    /// Drop a finished chain from the active set.
    pub fn complete_chain(&self, chain_id: &str) {
        if let Ok(mut active) = self.active.write() {
            active.remove(chain_id);
        }
    }
}

impl Default for ToolCallChainManager {
    fn default() -> Self {
        Self::new(DependencyTable::with_defaults())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::dependencies::ToolDependencyInfo;

    fn call_with_path(tool: &str, path: &str) -> ToolCall {
        let mut params = serde_json::Map::new();
        params.insert("path".into(), serde_json::json!(path));
        ToolCall::new("filesystem", tool, params)
    }

    #[test]
    fn test_same_path_reports_exactly_one_resource_conflict() {
        let manager = ToolCallChainManager::default();
        let a = call_with_path("read_file", "/tmp/a.txt");
        let b = call_with_path("write_file", "/tmp/a.txt");

        let forward = manager.analyze_dependencies(&[a.clone(), b.clone()]);
        let resource: Vec<_> = forward
            .conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::Resource)
            .collect();
        assert_eq!(resource.len(), 1);

        // Order-independent.
        let reverse = manager.analyze_dependencies(&[b, a]);
        let resource: Vec<_> = reverse
            .conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::Resource)
            .collect();
        assert_eq!(resource.len(), 1);
    }

    #[test]
    fn test_path_comparison_is_exact_string_equality() {
        let manager = ToolCallChainManager::default();
        // Trailing slash means a different resource here, by design.
        let a = call_with_path("read_file", "/tmp/dir");
        let b = call_with_path("copy_file", "/tmp/dir/");
        let chain = manager.analyze_dependencies(&[a, b]);
        assert!(chain
            .conflicts
            .iter()
            .all(|c| c.kind != ConflictKind::Resource));
    }

    #[test]
    fn test_direct_and_resource_conflicts_both_reported() {
        let manager = ToolCallChainManager::default();
        let a = call_with_path("write_file", "/tmp/a.txt");
        let b = call_with_path("delete_file", "/tmp/a.txt");

        let chain = manager.analyze_dependencies(&[a, b]);
        let direct = chain
            .conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::Direct)
            .count();
        let resource = chain
            .conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::Resource)
            .count();
        assert_eq!(direct, 1);
        assert_eq!(resource, 1);
    }

    #[test]
    fn test_prerequisite_ordering() {
        let manager = ToolCallChainManager::default();
        // write_file declares read_file as a prerequisite; issue them
        // backwards and expect the plan to flip them.
        let write = call_with_path("write_file", "/tmp/w.txt");
        let read = call_with_path("read_file", "/tmp/r.txt");

        let chain = manager.analyze_dependencies(&[write.clone(), read.clone()]);
        let order: Vec<&str> = chain
            .execution_order
            .iter()
            .map(|p| p.call.tool.as_str())
            .collect();
        assert_eq!(order, vec!["read_file", "write_file"]);
        assert_eq!(chain.execution_order.len(), chain.original_calls.len());
    }

    #[test]
    fn test_cycle_is_broken_not_fatal() {
        let mut table = DependencyTable::new();
        table.insert(ToolDependencyInfo::new("alpha", &["beta"], &[], &[]));
        table.insert(ToolDependencyInfo::new("beta", &["alpha"], &[], &[]));
        let manager = ToolCallChainManager::new(table);

        let a = ToolCall::new("s", "alpha", serde_json::Map::new());
        let b = ToolCall::new("s", "beta", serde_json::Map::new());
        let chain = manager.analyze_dependencies(&[a, b]);

        // Both calls still scheduled exactly once.
        assert_eq!(chain.execution_order.len(), 2);
        let mut tools: Vec<&str> = chain
            .execution_order
            .iter()
            .map(|p| p.call.tool.as_str())
            .collect();
        tools.sort_unstable();
        assert_eq!(tools, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_pre_post_actions_augmented() {
        let manager = ToolCallChainManager::default();
        let write = call_with_path("write_file", "/tmp/w.txt");
        let chain = manager.analyze_dependencies(&[write]);

        let planned = &chain.execution_order[0];
        assert_eq!(planned.pre_actions, vec!["read_file".to_string()]);
        assert_eq!(planned.post_actions, vec!["verify_file".to_string()]);
    }

    #[test]
    fn test_result_validation_rules() {
        let manager = ToolCallChainManager::default();
        manager.register_validator(
            "read_file",
            ValidationRule::new("non-empty content", |r| !r.content.is_empty()),
        );
        manager.register_validator(
            "read_file",
            ValidationRule::new("call succeeded", |r| r.success),
        );

        let good = ToolResult::succeeded("c1", "data".into(), 3);
        let outcome = manager.validate_tool_call_result("read_file", &good);
        assert!(outcome.passed);

        let empty = ToolResult::succeeded("c2", String::new(), 3);
        let outcome = manager.validate_tool_call_result("read_file", &empty);
        assert!(!outcome.passed);
        assert_eq!(outcome.failed_rules, vec!["non-empty content".to_string()]);

        // No rules registered → vacuous pass.
        let outcome = manager.validate_tool_call_result("unknown_tool", &empty);
        assert!(outcome.passed);
    }

    #[test]
    fn test_rollback_is_bookkeeping_only() {
        let manager = ToolCallChainManager::default();
        let call = call_with_path("write_file", "/tmp/w.txt");
        let call_id = call.id.clone();
        let chain = manager.analyze_dependencies(&[call]);

        assert!(manager.rollback_tool_call(&chain.id, &call_id));
        let snapshot = manager.active_chain(&chain.id).unwrap();
        assert_eq!(snapshot.rollback_requests.len(), 1);
        assert_eq!(snapshot.rollback_requests[0].call_id, call_id);

        // Unknown chain / foreign call are rejected.
        assert!(!manager.rollback_tool_call("no-such-chain", &call_id));
        assert!(!manager.rollback_tool_call(&chain.id, "no-such-call"));
    }

    #[test]
    fn test_complete_chain_drops_active_entry() {
        let manager = ToolCallChainManager::default();
        let chain = manager.analyze_dependencies(&[call_with_path("read_file", "/tmp/a")]);
        assert!(manager.active_chain(&chain.id).is_some());
        manager.complete_chain(&chain.id);
        assert!(manager.active_chain(&chain.id).is_none());
    }
}
