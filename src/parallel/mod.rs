//! Concurrency-bounded parallel execution.
//!
//! A global semaphore caps overall in-flight work; each item additionally
//! needs a slot in its resource pool (network / filesystem / cpu, chosen by
//! tool-name inspection) before running. Pool starvation fails only the
//! waiting item; batch cancellation stops issuing new items without
//! aborting already-dispatched calls.

pub mod manager;
pub mod pools;

pub use manager::{ExecutionMetrics, ParallelExecutionManager, ToolMetrics};
pub use pools::{categorize, PoolSet, ResourceCategory, ResourcePool};
