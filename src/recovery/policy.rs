//! Severity classes and retry policies.

use std::collections::HashMap;
use std::time::Duration;

use crate::errors::ErrorKind;

// ─── Severity ────────────────────────────────────────────────────────────────

/// Error severity, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

const CRITICAL_MARKERS: &[&str] = &[
    "out of memory",
    "oom",
    "stack overflow",
    "access violation",
    "segmentation fault",
    "segfault",
];

const HIGH_MARKERS: &[&str] = &[
    "security",
    "permission",
    "unauthorized",
    "forbidden",
    "access denied",
];

const MEDIUM_MARKERS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "unreachable",
    "refused",
    "dns",
];

/// Classify an error message into a severity. First matching class wins:
/// Critical → High → Medium → Low (default).
pub fn classify_severity(message: &str) -> ErrorSeverity {
    let message = message.to_lowercase();
    if CRITICAL_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorSeverity::Critical
    } else if HIGH_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorSeverity::High
    } else if MEDIUM_MARKERS.iter().any(|m| message.contains(m)) {
        ErrorSeverity::Medium
    } else {
        ErrorSeverity::Low
    }
}

// ─── Per-Severity Strategy ──────────────────────────────────────────────────

/// Canned handling for one severity level.
#[derive(Debug, Clone)]
pub struct SeverityStrategy {
    pub severity: ErrorSeverity,
    pub should_retry: bool,
    pub max_attempts: u32,
    pub delay: Duration,
    pub notify_user: bool,
    pub user_message: &'static str,
    pub suggestions: &'static [&'static str],
}

/// The strategy for a severity level.
///
/// User messages are generated here; raw internal error text is logged
/// only and never surfaced directly.
pub fn strategy_for(severity: ErrorSeverity) -> SeverityStrategy {
    match severity {
        ErrorSeverity::Low => SeverityStrategy {
            severity,
            should_retry: true,
            max_attempts: 2,
            delay: Duration::from_millis(500),
            notify_user: false,
            user_message: "A minor issue occurred, retrying automatically.",
            suggestions: &["No action needed"],
        },
        ErrorSeverity::Medium => SeverityStrategy {
            severity,
            should_retry: true,
            max_attempts: 3,
            delay: Duration::from_secs(2),
            notify_user: false,
            user_message: "A temporary problem occurred (network or timeout), retrying.",
            suggestions: &[
                "Check your network connection",
                "Verify the tool server is responsive",
            ],
        },
        ErrorSeverity::High => SeverityStrategy {
            severity,
            should_retry: false,
            max_attempts: 1,
            delay: Duration::ZERO,
            notify_user: true,
            user_message: "The operation was blocked by a permission or security check.",
            suggestions: &[
                "Check file and folder permissions",
                "Review the server's access configuration",
            ],
        },
        ErrorSeverity::Critical => SeverityStrategy {
            severity,
            should_retry: false,
            max_attempts: 1,
            delay: Duration::ZERO,
            notify_user: true,
            user_message: "A critical error occurred. Stopping immediately.",
            suggestions: &[
                "Restart the application",
                "Check available system memory",
            ],
        },
    }
}

// ─── Per-Category Retry Policy ──────────────────────────────────────────────

/// Retry parameters for one operation category.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub category: String,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Only these error kinds are eligible for retry in this category.
    pub retryable_kinds: Vec<ErrorKind>,
}

impl RetryPolicy {
    /// Backoff delay for the given attempt number (1-based), capped at the
    /// policy ceiling.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }

    pub fn is_retryable_kind(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }
}

/// Built-in retry policies per operation category.
pub fn default_policies() -> HashMap<String, RetryPolicy> {
    let mut policies = HashMap::new();
    policies.insert(
        "network".to_string(),
        RetryPolicy {
            category: "network".to_string(),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            retryable_kinds: vec![
                ErrorKind::ProtocolTimeout,
                ErrorKind::ServerUnavailable,
            ],
        },
    );
    policies.insert(
        "file".to_string(),
        RetryPolicy {
            category: "file".to_string(),
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            retryable_kinds: vec![ErrorKind::ResourceConflict, ErrorKind::ResourceWaitTimeout],
        },
    );
    policies.insert(
        "mcp_tool".to_string(),
        RetryPolicy {
            category: "mcp_tool".to_string(),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            retryable_kinds: vec![
                ErrorKind::ProtocolTimeout,
                ErrorKind::ProtocolMalformedResponse,
                ErrorKind::ServerUnavailable,
                ErrorKind::ProcessExitedUnexpectedly,
            ],
        },
    );
    policies.insert(
        "llm_api".to_string(),
        RetryPolicy {
            category: "llm_api".to_string(),
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            retryable_kinds: vec![ErrorKind::ProtocolTimeout, ErrorKind::ServerUnavailable],
        },
    );
    policies
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_first_match_wins() {
        assert_eq!(
            classify_severity("process killed: out of memory"),
            ErrorSeverity::Critical
        );
        assert_eq!(
            classify_severity("permission denied opening /etc/shadow"),
            ErrorSeverity::High
        );
        assert_eq!(
            classify_severity("connection refused by host"),
            ErrorSeverity::Medium
        );
        assert_eq!(classify_severity("something odd happened"), ErrorSeverity::Low);
        // Critical outranks a medium marker in the same message.
        assert_eq!(
            classify_severity("oom while waiting on network"),
            ErrorSeverity::Critical
        );
        // High outranks medium.
        assert_eq!(
            classify_severity("security timeout during scan"),
            ErrorSeverity::High
        );
    }

    #[test]
    fn test_severity_strategies() {
        assert!(strategy_for(ErrorSeverity::Low).should_retry);
        assert!(strategy_for(ErrorSeverity::Medium).should_retry);
        assert!(!strategy_for(ErrorSeverity::High).should_retry);
        assert!(!strategy_for(ErrorSeverity::Critical).should_retry);
        assert!(strategy_for(ErrorSeverity::Critical).notify_user);
        assert!(strategy_for(ErrorSeverity::Medium).delay > Duration::ZERO);
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let policy = &default_policies()["network"];
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        // Far past the ceiling.
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[test]
    fn test_allow_list_membership() {
        let policy = &default_policies()["network"];
        assert!(policy.is_retryable_kind(ErrorKind::ProtocolTimeout));
        assert!(!policy.is_retryable_kind(ErrorKind::ConfigurationError));
    }

    #[test]
    fn test_default_policies_cover_known_categories() {
        let policies = default_policies();
        for category in ["network", "file", "mcp_tool", "llm_api"] {
            assert!(policies.contains_key(category), "missing {category}");
        }
    }
}
