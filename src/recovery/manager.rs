//! The error-handling manager — history, dispositions, recommendations.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};

use super::policy::{classify_severity, default_policies, strategy_for, ErrorSeverity, RetryPolicy};
use crate::errors::{ErrorKind, OrchestratorError};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Ring history capacity; trimming happens in batches once exceeded.
const HISTORY_CAPACITY: usize = 1000;

/// Oldest records dropped per trim.
const HISTORY_TRIM_BATCH: usize = 100;

/// Identical-context failures inside this window count against the retry
/// budget.
const REPEAT_WINDOW: Duration = Duration::from_secs(300);

/// Recommendations analyze the trailing hour.
const ANALYSIS_WINDOW: Duration = Duration::from_secs(3600);

// ─── Types ───────────────────────────────────────────────────────────────────

/// One recorded failure.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub context: String,
    pub category: String,
    pub severity: ErrorSeverity,
    pub timestamp: DateTime<Utc>,
}

/// What the caller should do about a failure.
#[derive(Debug, Clone)]
pub struct ErrorDisposition {
    pub should_retry: bool,
    pub delay: Duration,
    /// 1-based count of identical-context failures in the trailing window,
    /// this one included.
    pub attempt: u32,
    pub severity: ErrorSeverity,
    pub notify_user: bool,
    pub user_message: String,
    pub recovery_actions: Vec<String>,
}

// ─── ErrorHandlingManager ───────────────────────────────────────────────────

/// Classifies failures and applies category retry policies over a bounded
/// error history.
pub struct ErrorHandlingManager {
    policies: HashMap<String, RetryPolicy>,
    history: Mutex<VecDeque<ErrorRecord>>,
}

impl ErrorHandlingManager {
    pub fn new() -> Self {
        Self {
            policies: default_policies(),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Replace or add the policy for a category.
    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policies.insert(policy.category.clone(), policy);
    }

    /// Record a failure and derive its disposition.
    ///
    /// Retry eligibility requires all of: the severity class permits
    /// retries, the error kind is on the category's allow-list, and fewer
    /// than max-attempts identical-context failures occurred in the
    /// trailing five minutes.
    pub fn handle_error(
        &self,
        error: &OrchestratorError,
        context: &str,
        category: &str,
    ) -> ErrorDisposition {
        let kind = error.kind();
        let message = error.to_string();
        let severity = classify_severity(&message);
        tracing::warn!(
            %context,
            category,
            ?kind,
            ?severity,
            error = %message,
            "handling error"
        );

        let record = ErrorRecord {
            kind,
            context: context.to_string(),
            category: category.to_string(),
            severity,
            timestamp: Utc::now(),
        };
        let attempt = self.record_and_count(record);

        let strategy = strategy_for(severity);
        let policy = self.policies.get(category);

        let within_budget = policy.map_or(true, |p| attempt < p.max_attempts);
        let kind_allowed = policy.map_or(true, |p| p.is_retryable_kind(kind));
        let should_retry = strategy.should_retry && kind_allowed && within_budget;

        let delay = if should_retry {
            policy
                .map(|p| p.delay_for_attempt(attempt))
                .unwrap_or(strategy.delay)
        } else {
            Duration::ZERO
        };

        ErrorDisposition {
            should_retry,
            delay,
            attempt,
            severity,
            notify_user: strategy.notify_user,
            user_message: strategy.user_message.to_string(),
            recovery_actions: strategy.suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Push a record, trim the ring in batches, and count identical-context
    /// failures in the repeat window (the new record included).
    fn record_and_count(&self, record: ErrorRecord) -> u32 {
        let Ok(mut history) = self.history.lock() else {
            return 1;
        };
        history.push_back(record.clone());
        if history.len() > HISTORY_CAPACITY {
            history.drain(..HISTORY_TRIM_BATCH);
        }

        let cutoff = Utc::now() - chrono::Duration::from_std(REPEAT_WINDOW).unwrap_or_default();
        history
            .iter()
            .filter(|r| {
                r.timestamp >= cutoff
                    && r.context == record.context
                    && r.category == record.category
            })
            .count() as u32
    }

    /// Number of records currently retained.
    pub fn history_len(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// The most recent `n` records, newest last.
    pub fn recent_errors(&self, n: usize) -> Vec<ErrorRecord> {
        self.history
            .lock()
            .map(|h| h.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Post-hoc analysis of the trailing hour: most frequent error kind,
    /// category advice, and time-of-day clustering.
    pub fn generate_recovery_recommendations(&self) -> Vec<String> {
        let Ok(history) = self.history.lock() else {
            return Vec::new();
        };
        let cutoff = Utc::now() - chrono::Duration::from_std(ANALYSIS_WINDOW).unwrap_or_default();
        let recent: Vec<&ErrorRecord> =
            history.iter().filter(|r| r.timestamp >= cutoff).collect();
        if recent.is_empty() {
            return Vec::new();
        }

        let mut recommendations = Vec::new();

        // Most frequent kind.
        let mut by_kind: HashMap<ErrorKind, usize> = HashMap::new();
        for record in &recent {
            *by_kind.entry(record.kind).or_default() += 1;
        }
        if let Some((kind, count)) = by_kind.iter().max_by_key(|(_, count)| **count) {
            recommendations.push(format!(
                "most frequent error in the last hour: {kind:?} ({count} occurrences)"
            ));
        }

        // Advice for the dominant category.
        let mut by_category: HashMap<&str, usize> = HashMap::new();
        for record in &recent {
            *by_category.entry(record.category.as_str()).or_default() += 1;
        }
        if let Some((category, _)) = by_category.iter().max_by_key(|(_, count)| **count) {
            if let Some(advice) = category_advice(category) {
                recommendations.push(advice.to_string());
            }
        }

        // Time-of-day clustering across retained history.
        let mut by_hour: HashMap<u32, usize> = HashMap::new();
        for record in history.iter() {
            *by_hour.entry(record.timestamp.hour()).or_default() += 1;
        }
        if let Some((hour, count)) = by_hour.iter().max_by_key(|(_, count)| **count) {
            if *count * 2 > history.len() {
                recommendations.push(format!(
                    "errors cluster around {hour:02}:00 UTC ({count} of {})",
                    history.len()
                ));
            }
        }

        recommendations
    }
}

impl Default for ErrorHandlingManager {
    fn default() -> Self {
        Self::new()
    }
}

fn category_advice(category: &str) -> Option<&'static str> {
    match category {
        "network" => Some("network errors dominate: check connectivity and endpoint health"),
        "file" => Some("file errors dominate: check paths, permissions, and disk space"),
        "mcp_tool" => Some("tool errors dominate: validate server health and tool arguments"),
        "llm_api" => Some("model API errors dominate: check the inference endpoint and quotas"),
        _ => None,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout_error() -> OrchestratorError {
        OrchestratorError::ProtocolTimeout {
            server: "filesystem".into(),
            timeout_ms: 10_000,
        }
    }

    fn oom_error() -> OrchestratorError {
        OrchestratorError::SpawnFailure {
            server: "ocr".into(),
            reason: "container killed: out of memory".into(),
        }
    }

    #[test]
    fn test_oom_is_critical_and_never_retried() {
        let manager = ErrorHandlingManager::new();
        let disposition = manager.handle_error(&oom_error(), "spawn ocr", "mcp_tool");
        assert_eq!(disposition.severity, ErrorSeverity::Critical);
        assert!(!disposition.should_retry);
        assert!(disposition.notify_user);
        assert_eq!(disposition.delay, Duration::ZERO);
        assert!(!disposition.recovery_actions.is_empty());
    }

    #[test]
    fn test_timeout_is_medium_and_retried_with_delay() {
        let manager = ErrorHandlingManager::new();
        let disposition = manager.handle_error(&timeout_error(), "call read_file", "network");
        assert_eq!(disposition.severity, ErrorSeverity::Medium);
        assert!(disposition.should_retry);
        assert!(disposition.delay > Duration::ZERO);
        assert_eq!(disposition.attempt, 1);
    }

    #[test]
    fn test_kind_must_be_allow_listed() {
        let manager = ErrorHandlingManager::new();
        // Timeout-class severity (Medium, retryable) but the kind is not on
        // the network allow-list.
        let error = OrchestratorError::ConfigurationError {
            reason: "connection settings missing".into(),
        };
        let disposition = manager.handle_error(&error, "load config", "network");
        assert_eq!(disposition.severity, ErrorSeverity::Medium);
        assert!(!disposition.should_retry);
    }

    #[test]
    fn test_repeat_failures_exhaust_budget() {
        let manager = ErrorHandlingManager::new();
        // network policy allows 3 attempts.
        let first = manager.handle_error(&timeout_error(), "call read_file", "network");
        let second = manager.handle_error(&timeout_error(), "call read_file", "network");
        let third = manager.handle_error(&timeout_error(), "call read_file", "network");

        assert!(first.should_retry);
        assert!(second.should_retry);
        assert!(!third.should_retry);
        assert_eq!(third.attempt, 3);

        // Backoff grew between the first two attempts.
        assert!(second.delay > first.delay);
    }

    #[test]
    fn test_distinct_contexts_have_separate_budgets() {
        let manager = ErrorHandlingManager::new();
        for _ in 0..3 {
            manager.handle_error(&timeout_error(), "call read_file", "network");
        }
        let other = manager.handle_error(&timeout_error(), "call write_file", "network");
        assert!(other.should_retry);
        assert_eq!(other.attempt, 1);
    }

    #[test]
    fn test_history_trims_in_batches() {
        let manager = ErrorHandlingManager::new();
        for i in 0..1105 {
            manager.handle_error(&timeout_error(), &format!("op {i}"), "network");
        }
        let len = manager.history_len();
        assert!(len <= HISTORY_CAPACITY, "history grew to {len}");
        assert!(len > HISTORY_CAPACITY - HISTORY_TRIM_BATCH);
    }

    #[test]
    fn test_recent_errors_orders_newest_last() {
        let manager = ErrorHandlingManager::new();
        manager.handle_error(&timeout_error(), "first", "network");
        manager.handle_error(&timeout_error(), "second", "network");

        let recent = manager.recent_errors(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].context, "first");
        assert_eq!(recent[1].context, "second");
    }

    #[test]
    fn test_recommendations_name_frequent_kind_and_category() {
        let manager = ErrorHandlingManager::new();
        for i in 0..5 {
            manager.handle_error(&timeout_error(), &format!("op {i}"), "network");
        }
        let recommendations = manager.generate_recovery_recommendations();
        assert!(recommendations
            .iter()
            .any(|r| r.contains("ProtocolTimeout")));
        assert!(recommendations.iter().any(|r| r.contains("network")));
    }

    #[test]
    fn test_recommendations_empty_without_recent_errors() {
        let manager = ErrorHandlingManager::new();
        assert!(manager.generate_recovery_recommendations().is_empty());
    }
}
