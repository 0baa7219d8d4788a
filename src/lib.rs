//! Toolhost — tool-provider orchestration core.
//!
//! Manages external tool-provider (MCP) server processes, speaks JSON-RPC
//! 2.0 to them over stdio or HTTP, validates protocol health, discovers
//! callable tools, and safely schedules batches of tool invocations on
//! behalf of an LLM-driven conversation.
//!
//! Layering, leaf-first:
//! - [`server`] — process lifecycle and the correlation transport
//! - [`validation`] — handshake + cached health, with a validate-once layer
//! - [`tools`] — discovery, relevance matching, single/batch invocation
//! - [`chain`] — dependency analysis, conflict detection, execution order
//! - [`parallel`] — resource-pooled concurrent execution with metrics
//! - [`recovery`] — severity classification and retry policy
//! - [`executor`] — model tool-call instructions in, conversation messages out
//!
//! Everything is wired through an explicit [`AppContext`]; the crate holds
//! no global state. UI rendering, settings persistence, and chat-history
//! storage live outside this crate and consume the [`events`] bus.

pub mod chain;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod executor;
pub mod logging;
pub mod parallel;
pub mod recovery;
pub mod server;
pub mod tools;
pub mod validation;

pub use context::AppContext;
pub use errors::{ErrorKind, OrchestratorError};
