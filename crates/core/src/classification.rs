//! Error classification vocabulary.
//!
//! A classification turns an opaque tool failure into a category, a severity
//! and exactly one suggested fix. The mapping from category to fix is fixed
//! here so every component agrees on it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    MissingDependency,
    SyntaxError,
    PermissionDenied,
    NetworkTransient,
    ResourceLimitExceeded,
    FileNotFound,
    ImportError,
    TypeError,
    RuntimeError,
    DivisionByZero,
    IndexOrKeyError,
    Unknown,
}

impl ErrorCategory {
    /// The one fix associated with this category.
    pub fn suggested_fix(self) -> SuggestedFix {
        match self {
            Self::MissingDependency => SuggestedFix::InstallDependency,
            Self::NetworkTransient | Self::ResourceLimitExceeded | Self::Unknown => {
                SuggestedFix::RetrySame
            }
            Self::PermissionDenied => SuggestedFix::Abort,
            Self::SyntaxError
            | Self::FileNotFound
            | Self::ImportError
            | Self::TypeError
            | Self::RuntimeError
            | Self::DivisionByZero
            | Self::IndexOrKeyError => SuggestedFix::RetryModified,
        }
    }

    /// Baseline severity; the classifier may raise it for unrecoverable cases.
    pub fn base_severity(self) -> Severity {
        match self {
            Self::PermissionDenied => Severity::Critical,
            Self::NetworkTransient => Severity::Low,
            Self::RuntimeError | Self::ResourceLimitExceeded => Severity::High,
            Self::MissingDependency
            | Self::SyntaxError
            | Self::FileNotFound
            | Self::ImportError
            | Self::TypeError
            | Self::DivisionByZero
            | Self::IndexOrKeyError
            | Self::Unknown => Severity::Medium,
        }
    }

    /// Whether a retry for this category waits with exponential backoff.
    pub fn uses_backoff(self) -> bool {
        matches!(self.suggested_fix(), SuggestedFix::RetrySame)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingDependency => "missing_dependency",
            Self::SyntaxError => "syntax_error",
            Self::PermissionDenied => "permission_denied",
            Self::NetworkTransient => "network_transient",
            Self::ResourceLimitExceeded => "resource_limit_exceeded",
            Self::FileNotFound => "file_not_found",
            Self::ImportError => "import_error",
            Self::TypeError => "type_error",
            Self::RuntimeError => "runtime_error",
            Self::DivisionByZero => "division_by_zero",
            Self::IndexOrKeyError => "index_or_key_error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a failure (or a pre-flight risk) is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a loosely formatted severity label ("crit", "HIGH", ...).
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Some(Self::Low),
            "medium" | "med" | "moderate" => Some(Self::Medium),
            "high" | "major" => Some(Self::High),
            "critical" | "crit" | "blocker" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// The corrective action suggested for a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedFix {
    None,
    InstallDependency,
    RetrySame,
    RetryModified,
    Abort,
}

impl fmt::Display for SuggestedFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::InstallDependency => "install_dependency",
            Self::RetrySame => "retry_same",
            Self::RetryModified => "retry_modified",
            Self::Abort => "abort",
        };
        f.write_str(s)
    }
}

/// Package ecosystem inferred from a missing-dependency failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ecosystem {
    Python,
    Node,
    System,
}

/// Details pulled out of the raw error text by the matching rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Missing package / module / command name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecosystem: Option<Ecosystem>,

    /// File path mentioned by the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// The full classification of one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub suggested_fix: SuggestedFix,

    /// The raw-error line that matched the rule, else its first non-empty line.
    pub message: String,

    /// Name of the rule that matched (for attempt logs).
    pub rule: String,

    #[serde(default)]
    pub details: ErrorDetails,
}

impl ErrorClassification {
    /// Whether the retry controller must stop after this failure.
    pub fn is_terminal(&self) -> bool {
        self.suggested_fix == SuggestedFix::Abort || self.severity == Severity::Critical
    }
}
