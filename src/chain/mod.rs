//! Tool-call chain planning.
//!
//! A planning-only layer: given a batch of candidate tool calls it computes
//! a dependency-respecting execution order, detects direct and resource
//! conflicts, and augments calls with declared pre/post actions. It never
//! executes anything itself — the executor consumes the plan.

pub mod dependencies;
pub mod manager;

pub use dependencies::{DependencyTable, ToolDependencyInfo};
pub use manager::{
    ConflictInfo, ConflictKind, ExecutionChain, PlannedCall, ResultValidation, RollbackRequest,
    ToolCallChainManager, ValidationRule,
};
