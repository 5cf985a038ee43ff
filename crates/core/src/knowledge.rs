//! Learned knowledge: lessons and workflow templates.
//!
//! Lessons are short textual insights gated by human review. Workflows are
//! reusable plan templates saved from successful, generalizable runs; only
//! their metadata ever changes after creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Who a lesson applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonScope {
    UserScoped,
    AgentScoped,
    PlatformWide,
}

impl LessonScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserScoped => "user_scoped",
            Self::AgentScoped => "agent_scoped",
            Self::PlatformWide => "platform_wide",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "user" | "user_scoped" => Some(Self::UserScoped),
            "agent" | "agent_scoped" => Some(Self::AgentScoped),
            "platform" | "platform_wide" => Some(Self::PlatformWide),
            _ => None,
        }
    }
}

impl fmt::Display for LessonScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review lifecycle of a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Proposed,
    Approved,
    Rejected,
    Archived,
}

impl LessonStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Archived => "archived",
        }
    }

    /// Whether a lesson may move from `self` to `next`.
    ///
    /// Approval and rejection only happen from Proposed; anything not
    /// already archived may be archived.
    pub fn can_transition_to(self, next: LessonStatus) -> bool {
        matches!(
            (self, next),
            (Self::Proposed, Self::Approved)
                | (Self::Proposed, Self::Rejected)
                | (Self::Proposed | Self::Approved | Self::Rejected, Self::Archived)
        )
    }
}

impl fmt::Display for LessonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a lesson came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Run that produced the lesson.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    /// Supporting observations (failed subtasks, classified errors, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observations: Vec<String>,
}

/// A textual insight under human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub scope: LessonScope,
    pub text: String,
    /// 0.0..=1.0
    pub confidence: f32,
    pub status: LessonStatus,
    pub usage_count: u32,
    pub positive_feedback_count: u32,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lesson {
    pub fn new(text: impl Into<String>, scope: LessonScope, confidence: f32, evidence: Evidence) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            scope,
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            status: LessonStatus::Proposed,
            usage_count: 0,
            positive_feedback_count: 0,
            evidence,
            rejection_reason: None,
            embedding: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// positive_feedback_count / usage_count, or 0 when never used.
    pub fn success_ratio(&self) -> f32 {
        if self.usage_count == 0 {
            0.0
        } else {
            self.positive_feedback_count as f32 / self.usage_count as f32
        }
    }
}

/// One subtask of a saved plan template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskTemplate {
    pub order: usize,
    pub text: String,
    /// Declared orders of prerequisites.
    #[serde(default)]
    pub after: Vec<usize>,
    #[serde(default)]
    pub steps: Vec<crate::plan::ToolStep>,
}

/// Mutable part of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub applied_count: u32,
    pub success_count: u32,
    pub success_rate: f32,
    pub last_applied: Option<DateTime<Utc>>,
}

impl Default for WorkflowMetadata {
    fn default() -> Self {
        Self {
            applied_count: 0,
            success_count: 0,
            success_rate: 1.0,
            last_applied: None,
        }
    }
}

impl WorkflowMetadata {
    pub fn record(&mut self, success: bool) {
        self.applied_count += 1;
        if success {
            self.success_count += 1;
        }
        self.success_rate = self.success_count as f32 / self.applied_count as f32;
        self.last_applied = Some(Utc::now());
    }
}

/// A reusable plan template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub goal: String,
    pub goal_embedding: Vec<f32>,
    pub subtasks: Vec<SubtaskTemplate>,
    pub metadata: WorkflowMetadata,
    pub created_at: DateTime<Utc>,
}

/// A reviewer's verdict on a proposed lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}
