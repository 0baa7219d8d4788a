//! Server management — tool-provider process lifecycle and JSON-RPC transport.
//!
//! This module handles:
//! - Spawning and supervising stdio server child processes
//! - JSON-RPC 2.0 request/response correlation over unordered transports
//! - HTTP-transport servers (no process lifecycle; marked running immediately)
//! - Batch start/stop across all configured servers

pub mod manager;
pub mod transport;
pub mod types;

pub use manager::{ServerManager, SharedDefinition};
pub use types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
