//! Next-phase decision.
//!
//! The decision is a pure function of the caller's flags and a snapshot of the
//! project directory. Prompt files are resolved separately by `io::prompt`.

use crate::core::types::Phase;

/// Mode flags supplied by the caller for the next iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeFlags {
    /// One-off instruction text; synthesized into a throwaway prompt.
    pub directive: Option<String>,
    /// Name of an audit template to render.
    pub audit: Option<String>,
    pub todo: bool,
    pub validate: bool,
    pub in_progress: bool,
}

/// Observed state of the project and metadata directories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectSnapshot {
    pub completion_pending: bool,
    pub has_spec: bool,
    pub feature_count: usize,
    pub has_changelog: bool,
    /// Project directory has entries other than metadata and VCS dirs.
    pub project_has_content: bool,
}

impl ProjectSnapshot {
    pub fn onboarding_complete(&self) -> bool {
        self.has_spec && self.feature_count > 0 && self.has_changelog
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeDecision {
    Directive(String),
    Audit(String),
    Standard(Phase),
}

impl ModeDecision {
    pub fn phase(&self) -> Phase {
        match self {
            ModeDecision::Directive(_) => Phase::Directive,
            ModeDecision::Audit(_) => Phase::Audit,
            ModeDecision::Standard(phase) => *phase,
        }
    }
}

/// Pick the next phase. First match wins.
pub fn select_mode(flags: &ModeFlags, snapshot: &ProjectSnapshot) -> ModeDecision {
    if let Some(directive) = flags.directive.as_ref().filter(|d| !d.trim().is_empty()) {
        return ModeDecision::Directive(directive.clone());
    }
    if let Some(audit) = flags.audit.as_ref().filter(|a| !a.trim().is_empty()) {
        return ModeDecision::Audit(audit.clone());
    }
    if snapshot.completion_pending {
        return ModeDecision::Standard(Phase::Todo);
    }
    if flags.todo {
        return ModeDecision::Standard(Phase::Todo);
    }
    if flags.validate {
        return ModeDecision::Standard(Phase::Validate);
    }
    if flags.in_progress {
        return ModeDecision::Standard(Phase::InProgress);
    }
    if snapshot.onboarding_complete() {
        return ModeDecision::Standard(Phase::Coding);
    }
    if snapshot.project_has_content {
        ModeDecision::Standard(Phase::Onboarding)
    } else {
        ModeDecision::Standard(Phase::Initializer)
    }
}
