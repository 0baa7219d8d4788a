//! Protocol-level health validation.
//!
//! OS-level liveness (the process exists) is necessary but not sufficient —
//! a server must also speak the protocol. Validation sends a synthetic
//! `initialize` request and checks for a non-null `result`.
//!
//! Results are cached with an asymmetric TTL (healthy servers are left
//! alone for a long time, broken ones retried soon), and the auto layer
//! adds a "validate once" policy on top: an Available server is never
//! re-validated unless explicitly reset. That favors low overhead over
//! freshness — a process that wedges without exiting keeps its stale
//! Available status until reset.

pub mod auto;
pub mod service;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use auto::AutoValidationService;
pub use service::ValidationService;

// ─── Status ──────────────────────────────────────────────────────────────────

/// Protocol-level health of a server.
///
/// `Unknown → Validating → {Available | Unavailable | Timeout |
/// ConfigurationError}`; non-Available outcomes re-enter `Validating` on the
/// next trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    #[default]
    Unknown,
    Validating,
    Available,
    Unavailable,
    Timeout,
    ConfigurationError,
}

// ─── Result ──────────────────────────────────────────────────────────────────

/// Outcome of one validation pass, cached per server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_available: bool,
    pub status: ValidationStatus,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ValidationResult {
    pub fn available() -> Self {
        Self {
            is_available: true,
            status: ValidationStatus::Available,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Available despite a failed handshake — the process was confirmed
    /// alive, so the failure is treated as a startup race.
    pub fn available_with_note(note: impl Into<String>) -> Self {
        Self {
            is_available: true,
            status: ValidationStatus::Available,
            error: Some(note.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            is_available: false,
            status: ValidationStatus::Unavailable,
            error: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn timeout(timeout_secs: u64) -> Self {
        Self {
            is_available: false,
            status: ValidationStatus::Timeout,
            error: Some(format!("no initialize response within {timeout_secs}s")),
            timestamp: Utc::now(),
        }
    }

    pub fn config_error(reason: impl Into<String>) -> Self {
        Self {
            is_available: false,
            status: ValidationStatus::ConfigurationError,
            error: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
