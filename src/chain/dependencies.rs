//! Static tool-dependency table.
//!
//! Declares, per tool name, which tools must run first when both appear in
//! a batch, which tools are incompatible with it, and which follow-up
//! actions are recommended. The table is data, not behavior — pre/post
//! actions are informational for the executor.

use std::collections::HashMap;

/// Declared relationships for one tool.
#[derive(Debug, Clone)]
pub struct ToolDependencyInfo {
    pub tool: String,
    /// Tools that must be ordered before this one when present.
    pub prerequisites: Vec<String>,
    /// Tools that must not run in the same batch.
    pub conflicts: Vec<String>,
    /// Recommended follow-up actions (informational).
    pub post_actions: Vec<String>,
}

impl ToolDependencyInfo {
    pub fn new(tool: &str, prerequisites: &[&str], conflicts: &[&str], post_actions: &[&str]) -> Self {
        Self {
            tool: tool.to_string(),
            prerequisites: prerequisites.iter().map(|s| s.to_string()).collect(),
            conflicts: conflicts.iter().map(|s| s.to_string()).collect(),
            post_actions: post_actions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Lookup table keyed by bare tool name.
#[derive(Debug, Clone, Default)]
pub struct DependencyTable {
    entries: HashMap<String, ToolDependencyInfo>,
}

impl DependencyTable {
    /// An empty table — every call is independent.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table covering the common filesystem/data tool shapes.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for info in default_entries() {
            table.insert(info);
        }
        table
    }

    pub fn insert(&mut self, info: ToolDependencyInfo) {
        self.entries.insert(info.tool.clone(), info);
    }

    pub fn get(&self, tool: &str) -> Option<&ToolDependencyInfo> {
        self.entries.get(tool)
    }

    /// Whether two tools are declared incompatible (either direction).
    pub fn conflicts(&self, a: &str, b: &str) -> bool {
        let a_declares = self
            .get(a)
            .is_some_and(|info| info.conflicts.iter().any(|c| c == b));
        let b_declares = self
            .get(b)
            .is_some_and(|info| info.conflicts.iter().any(|c| c == a));
        a_declares || b_declares
    }

    /// Prerequisites declared for a tool (empty if unknown).
    pub fn prerequisites(&self, tool: &str) -> &[String] {
        self.get(tool)
            .map(|info| info.prerequisites.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn default_entries() -> Vec<ToolDependencyInfo> {
    vec![
        ToolDependencyInfo::new("read_file", &[], &[], &[]),
        ToolDependencyInfo::new(
            "write_file",
            &["read_file"],
            &["delete_file"],
            &["verify_file"],
        ),
        ToolDependencyInfo::new(
            "delete_file",
            &["read_file"],
            &["write_file", "move_file"],
            &[],
        ),
        ToolDependencyInfo::new("move_file", &["read_file"], &["delete_file"], &["verify_file"]),
        ToolDependencyInfo::new("copy_file", &["read_file"], &[], &[]),
        ToolDependencyInfo::new("create_directory", &[], &["delete_directory"], &[]),
        ToolDependencyInfo::new("delete_directory", &[], &["create_directory"], &[]),
        ToolDependencyInfo::new("write_table", &["query_table"], &["drop_table"], &[]),
        ToolDependencyInfo::new("drop_table", &[], &["write_table"], &[]),
    ]
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_file_tools() {
        let table = DependencyTable::with_defaults();
        assert!(table.get("write_file").is_some());
        assert_eq!(table.prerequisites("write_file"), &["read_file".to_string()]);
        assert!(table.prerequisites("unknown_tool").is_empty());
    }

    #[test]
    fn test_conflicts_are_symmetric() {
        let table = DependencyTable::with_defaults();
        assert!(table.conflicts("write_file", "delete_file"));
        assert!(table.conflicts("delete_file", "write_file"));
        assert!(!table.conflicts("read_file", "write_file"));
    }

    #[test]
    fn test_one_sided_declaration_still_conflicts() {
        let mut table = DependencyTable::new();
        table.insert(ToolDependencyInfo::new("archive", &[], &["extract"], &[]));
        // "extract" declares nothing itself.
        assert!(table.conflicts("archive", "extract"));
        assert!(table.conflicts("extract", "archive"));
    }
}
