//! Shared deterministic types for the loop engine.
//!
//! These types define stable contracts between components. They must not
//! depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::exit_codes;

/// Lifecycle status of a feature record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Backlog,
    Pending,
    Running,
    Completed,
    Failed,
    Verified,
    WaitingApproval,
    InProgress,
}

impl FeatureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureStatus::Backlog => "backlog",
            FeatureStatus::Pending => "pending",
            FeatureStatus::Running => "running",
            FeatureStatus::Completed => "completed",
            FeatureStatus::Failed => "failed",
            FeatureStatus::Verified => "verified",
            FeatureStatus::WaitingApproval => "waiting_approval",
            FeatureStatus::InProgress => "in_progress",
        }
    }
}

/// One unit of trackable work, stored as `features/<id>/feature.json`.
///
/// Written by the external agent; the engine only reads and validates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRecord {
    pub id: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub title: String,
    pub status: FeatureStatus,
    /// 1 = critical, 4 = low.
    pub priority: u8,
    pub passes: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_severity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl FeatureRecord {
    /// Audit findings are tracked apart from the coding completion gate.
    pub fn is_audit_finding(&self) -> bool {
        self.audit_source.is_some() || self.id.starts_with("audit-")
    }

    /// `passes=true` paired with `status=backlog` is an inconsistent state.
    pub fn is_inconsistent(&self) -> bool {
        self.passes && self.status == FeatureStatus::Backlog
    }
}

/// Classification of a finished iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Success,
    Timeout,
    IdleTimeout,
    NoAssistant,
    ProviderError,
    RateLimited,
    GenericFailure,
}

impl IterationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IterationStatus::Success => "success",
            IterationStatus::Timeout => "timeout",
            IterationStatus::IdleTimeout => "idle_timeout",
            IterationStatus::NoAssistant => "no_assistant",
            IterationStatus::ProviderError => "provider_error",
            IterationStatus::RateLimited => "rate_limited",
            IterationStatus::GenericFailure => "generic_failure",
        }
    }

    /// Stable exit code for statuses that carry a fixed one.
    ///
    /// `GenericFailure` carries the child's own exit code instead.
    pub fn fixed_exit_code(self) -> Option<i32> {
        match self {
            IterationStatus::Success => Some(exit_codes::OK),
            IterationStatus::Timeout => Some(exit_codes::TIMEOUT),
            IterationStatus::IdleTimeout => Some(exit_codes::IDLE_TIMEOUT),
            IterationStatus::NoAssistant => Some(exit_codes::NO_ASSISTANT),
            IterationStatus::ProviderError => Some(exit_codes::PROVIDER_ERROR),
            IterationStatus::RateLimited => Some(exit_codes::RATE_LIMITED),
            IterationStatus::GenericFailure => None,
        }
    }

    pub fn is_timeout(self) -> bool {
        matches!(self, IterationStatus::Timeout | IterationStatus::IdleTimeout)
    }
}

impl fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral per-iteration result handed from the supervisor to the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationOutcome {
    pub status: IterationStatus,
    pub exit_code: i32,
    /// Counter value after the retry policy recorded this outcome.
    pub consecutive_failures: u32,
}

impl IterationOutcome {
    /// Build an outcome from a status, deriving the exit code when fixed.
    ///
    /// `child_code` is used for `GenericFailure`; a zero or missing code is
    /// coerced to `GENERAL_ERROR` so failures never look like success.
    pub fn new(status: IterationStatus, child_code: Option<i32>) -> Self {
        let exit_code = match status.fixed_exit_code() {
            Some(code) => code,
            None => match child_code {
                Some(code) if code != 0 => code,
                _ => exit_codes::GENERAL_ERROR,
            },
        };
        Self {
            status,
            exit_code,
            consecutive_failures: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == IterationStatus::Success
    }
}

/// Category of instructions sent to the agent for the next iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Onboarding,
    Initializer,
    Coding,
    Todo,
    Validate,
    InProgress,
    Audit,
    Directive,
}

impl Phase {
    /// Stable name, also the prompt file stem under the prompts directory.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Onboarding => "onboarding",
            Phase::Initializer => "initializer",
            Phase::Coding => "coding",
            Phase::Todo => "todo",
            Phase::Validate => "validate",
            Phase::InProgress => "in_progress",
            Phase::Audit => "audit",
            Phase::Directive => "directive",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
