//! Resource pools — per-category concurrency sub-budgets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use sysinfo::System;

// ─── Categorization ─────────────────────────────────────────────────────────

/// Resource class of a tool, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    Network,
    Filesystem,
    Cpu,
}

impl ResourceCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Filesystem => "filesystem",
            Self::Cpu => "cpu",
        }
    }
}

const NETWORK_KEYWORDS: &[&str] = &[
    "http", "fetch", "url", "download", "upload", "web", "request", "api",
];

const FILESYSTEM_KEYWORDS: &[&str] = &[
    "file", "dir", "folder", "path", "disk", "read", "write", "copy", "move", "delete",
];

/// Classify a tool by keyword inspection of its name. Network wins over
/// filesystem when both match; anything unrecognized is cpu-bound.
pub fn categorize(tool_name: &str) -> ResourceCategory {
    let name = tool_name.to_lowercase();
    if NETWORK_KEYWORDS.iter().any(|k| name.contains(k)) {
        ResourceCategory::Network
    } else if FILESYSTEM_KEYWORDS.iter().any(|k| name.contains(k)) {
        ResourceCategory::Filesystem
    } else {
        ResourceCategory::Cpu
    }
}

// ─── Pool ───────────────────────────────────────────────────────────────────

/// Cumulative metrics for one pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolMetrics {
    pub executions: u64,
    pub total_duration_ms: u64,
    pub successes: u64,
}

impl PoolMetrics {
    pub fn average_duration_ms(&self) -> u64 {
        if self.executions == 0 {
            0
        } else {
            self.total_duration_ms / self.executions
        }
    }
}

/// A named concurrency sub-budget with usage counting and metrics.
#[derive(Debug)]
pub struct ResourcePool {
    name: &'static str,
    max_concurrent: usize,
    current: AtomicUsize,
    metrics: Mutex<PoolMetrics>,
}

impl ResourcePool {
    pub fn new(name: &'static str, max_concurrent: usize) -> Self {
        Self {
            name,
            max_concurrent: max_concurrent.max(1),
            current: AtomicUsize::new(0),
            metrics: Mutex::new(PoolMetrics::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn current_usage(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Claim a slot if one is free. Never blocks.
    pub fn try_acquire(&self) -> bool {
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_concurrent).then_some(current + 1)
            })
            .is_ok()
    }

    /// Return a slot claimed with [`Self::try_acquire`].
    pub fn release(&self) {
        self.current.fetch_sub(1, Ordering::AcqRel);
    }

    /// Record one finished execution against this pool.
    pub fn record(&self, duration_ms: u64, success: bool) {
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.executions += 1;
            metrics.total_duration_ms += duration_ms;
            if success {
                metrics.successes += 1;
            }
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.metrics.lock().map(|m| *m).unwrap_or_default()
    }
}

// ─── Pool Set ───────────────────────────────────────────────────────────────

/// The three category pools, sized from the global concurrency cap.
///
/// Network and filesystem each get half the global cap; cpu gets one slot
/// per logical core.
#[derive(Debug)]
pub struct PoolSet {
    network: ResourcePool,
    filesystem: ResourcePool,
    cpu: ResourcePool,
}

impl PoolSet {
    pub fn new(global_cap: usize) -> Self {
        let half = (global_cap / 2).max(1);
        Self {
            network: ResourcePool::new("network", half),
            filesystem: ResourcePool::new("filesystem", half),
            cpu: ResourcePool::new("cpu", logical_cores()),
        }
    }

    pub fn pool_for(&self, category: ResourceCategory) -> &ResourcePool {
        match category {
            ResourceCategory::Network => &self.network,
            ResourceCategory::Filesystem => &self.filesystem,
            ResourceCategory::Cpu => &self.cpu,
        }
    }

    pub fn all(&self) -> [&ResourcePool; 3] {
        [&self.network, &self.filesystem, &self.cpu]
    }
}

fn logical_cores() -> usize {
    let mut sys = System::new_all();
    sys.refresh_all();
    sys.cpus().len().max(1)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
