//! The parallel execution manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::pools::{categorize, PoolSet};
use crate::tools::{ToolCall, ToolResult};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Interval between resource-pool availability polls.
const POOL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ceiling on how long one item waits for a pool slot.
const POOL_WAIT_CEILING: Duration = Duration::from_secs(30);

// ─── Metrics ─────────────────────────────────────────────────────────────────

/// Per-tool execution metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolMetrics {
    pub count: u64,
    pub total_duration_ms: u64,
    pub successes: u64,
}

impl ToolMetrics {
    pub fn average_duration_ms(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_duration_ms / self.count
        }
    }
}

/// Global and per-tool metrics snapshot.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub per_tool: HashMap<String, ToolMetrics>,
}

// ─── ParallelExecutionManager ───────────────────────────────────────────────

/// Runs batches under a global concurrency cap plus per-category pools.
pub struct ParallelExecutionManager {
    semaphore: Arc<Semaphore>,
    max_concurrent: AtomicUsize,
    pools: Arc<PoolSet>,
    metrics: Mutex<ExecutionMetrics>,
    pool_poll_interval: Duration,
    pool_wait_ceiling: Duration,
}

impl ParallelExecutionManager {
    pub fn new(max_concurrent: usize) -> Self {
        let cap = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(cap)),
            max_concurrent: AtomicUsize::new(cap),
            pools: Arc::new(PoolSet::new(cap)),
            metrics: Mutex::new(ExecutionMetrics::default()),
            pool_poll_interval: POOL_POLL_INTERVAL,
            pool_wait_ceiling: POOL_WAIT_CEILING,
        }
    }

    /// Override the pool-wait poll interval and ceiling.
    pub fn with_pool_wait(mut self, poll: Duration, ceiling: Duration) -> Self {
        self.pool_poll_interval = poll;
        self.pool_wait_ceiling = ceiling;
        self
    }

    /// The category pools, for inspection.
    pub fn pools(&self) -> Arc<PoolSet> {
        Arc::clone(&self.pools)
    }

    /// Current global concurrency cap.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::Acquire)
    }

    /// Live-resize the global cap.
    ///
    /// Growing takes effect immediately; shrinking takes effect as in-flight
    /// permits complete (excess permits are retired in the background).
    pub fn adjust_concurrency(&self, new_max: usize) {
        let new_max = new_max.max(1);
        let old = self.max_concurrent.swap(new_max, Ordering::AcqRel);
        if new_max > old {
            self.semaphore.add_permits(new_max - old);
        } else if new_max < old {
            let retire = (old - new_max) as u32;
            let semaphore = Arc::clone(&self.semaphore);
            tokio::spawn(async move {
                if let Ok(permits) = semaphore.acquire_many(retire).await {
                    permits.forget();
                }
            });
        }
        tracing::info!(old, new = new_max, "adjusted global concurrency cap");
    }

    /// Execute a batch. Results come back in input order.
    ///
    /// Each item waits for a global permit, then polls its resource pool for
    /// a free slot (failing only itself on the wait ceiling). Cancellation
    /// stops issuing new items; items already past their pool gate run to
    /// completion.
    pub async fn execute_batch<F, Fut>(
        &self,
        calls: Vec<ToolCall>,
        executor: F,
        cancel: &CancellationToken,
    ) -> Vec<ToolResult>
    where
        F: Fn(ToolCall) -> Fut + Clone,
        Fut: std::future::Future<Output = ToolResult>,
    {
        futures::future::join_all(
            calls
                .into_iter()
                .map(|call| self.execute_one(call, executor.clone(), cancel)),
        )
        .await
    }

    async fn execute_one<F, Fut>(
        &self,
        call: ToolCall,
        executor: F,
        cancel: &CancellationToken,
    ) -> ToolResult
    where
        F: Fn(ToolCall) -> Fut,
        Fut: std::future::Future<Output = ToolResult>,
    {
        if cancel.is_cancelled() {
            return self.record_failure(&call, "batch cancelled before dispatch");
        }

        // Global cap first.
        let permit = tokio::select! {
            permit = self.semaphore.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return self.record_failure(&call, "executor shut down"),
            },
            _ = cancel.cancelled() => {
                return self.record_failure(&call, "batch cancelled before dispatch");
            }
        };

        // Then a slot in the item's resource pool.
        let pool = self.pools.pool_for(categorize(&call.tool));
        let wait_start = Instant::now();
        loop {
            if pool.try_acquire() {
                break;
            }
            if cancel.is_cancelled() {
                drop(permit);
                return self.record_failure(&call, "batch cancelled before dispatch");
            }
            if wait_start.elapsed() >= self.pool_wait_ceiling {
                drop(permit);
                let message = format!(
                    "timed out waiting {}ms for a slot in pool '{}'",
                    self.pool_wait_ceiling.as_millis(),
                    pool.name()
                );
                tracing::warn!(tool = %call.qualified_name(), pool = pool.name(), "pool wait timeout");
                return self.record_failure(&call, message);
            }
            tokio::time::sleep(self.pool_poll_interval).await;
        }

        let start = Instant::now();
        let result = executor(call.clone()).await;
        let elapsed = start.elapsed().as_millis() as u64;

        pool.release();
        pool.record(elapsed, result.success);
        self.record_metrics(&call.tool, elapsed, result.success);
        drop(permit);
        result
    }

    fn record_failure(&self, call: &ToolCall, message: impl Into<String>) -> ToolResult {
        self.record_metrics(&call.tool, 0, false);
        ToolResult::failed(&call.id, message, 0)
    }

    fn record_metrics(&self, tool: &str, duration_ms: u64, success: bool) {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.total += 1;
            if success {
                metrics.successes += 1;
            } else {
                metrics.failures += 1;
            }
            let entry = metrics.per_tool.entry(tool.to_string()).or_default();
            entry.count += 1;
            entry.total_duration_ms += duration_ms;
            if success {
                entry.successes += 1;
            }
        }
    }

    /// Snapshot of global and per-tool metrics.
    pub fn metrics(&self) -> ExecutionMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
