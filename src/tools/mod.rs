//! Tool discovery, relevance matching, and invocation.
//!
//! The `ToolManager` aggregates tool catalogs across all healthy servers,
//! scores tools against free-text queries, and executes single calls or
//! concurrency-capped batches, emitting lifecycle events for observers.

pub mod manager;
pub mod matching;
pub mod types;

pub use manager::ToolManager;
pub use matching::match_relevant_tools;
pub use types::{PropertySchema, ToolCall, ToolDescriptor, ToolResult, ToolSchema};
