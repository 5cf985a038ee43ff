//! Run-level state, progress updates and the final report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classification::ErrorCategory;
use crate::plan::{
    ComplexityReport, ExecutionPhase, ExecutionResult, RiskNote, RunId, SubtaskDescriptor,
    SubtaskId, SubtaskStatus,
};

/// Where a run is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "phase")]
pub enum RunState {
    Planning,
    PreflightReflection,
    Executing(usize),
    PostflightReflection,
    Done,
    PartiallyFailed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::PartiallyFailed | Self::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => f.write_str("planning"),
            Self::PreflightReflection => f.write_str("preflight_reflection"),
            Self::Executing(phase) => write!(f, "executing(phase {phase})"),
            Self::PostflightReflection => f.write_str("postflight_reflection"),
            Self::Done => f.write_str("done"),
            Self::PartiallyFailed => f.write_str("partially_failed"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// User-visible final status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    PartiallyFailed,
    Cancelled,
}

impl From<RunStatus> for RunState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Done => RunState::Done,
            RunStatus::PartiallyFailed => RunState::PartiallyFailed,
            RunStatus::Cancelled => RunState::Cancelled,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        RunState::from(*self).fmt(f)
    }
}

/// One progress update streamed from a running orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    pub state: RunState,
    /// Execution phase index, when the update concerns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<SubtaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SubtaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_output: Option<String>,
}

impl RunUpdate {
    /// A state transition with no subtask attached.
    pub fn state(state: RunState) -> Self {
        let phase = match state {
            RunState::Executing(p) => Some(p),
            _ => None,
        };
        Self {
            state,
            phase,
            subtask_id: None,
            status: None,
            partial_output: None,
        }
    }

    /// A subtask status change inside `state`.
    pub fn subtask(state: RunState, id: SubtaskId, status: SubtaskStatus, partial_output: Option<String>) -> Self {
        Self {
            subtask_id: Some(id),
            status: Some(status),
            partial_output,
            ..Self::state(state)
        }
    }
}

/// A lesson extracted by post-execution reflection, before it is proposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonCandidate {
    pub text: String,
    pub confidence: f32,
}

/// Output of the post-execution reflector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub success: bool,
    pub success_rate: f32,
    pub lessons: Vec<LessonCandidate>,
    pub workflow_candidate: bool,
}

/// One failed subtask, as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub subtask_id: SubtaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    pub message: String,
}

/// Everything a finished run reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub goal: String,
    pub complexity: ComplexityReport,
    pub status: RunStatus,
    #[serde(default)]
    pub subtasks: Vec<SubtaskDescriptor>,
    #[serde(default)]
    pub phases: Vec<ExecutionPhase>,
    #[serde(default)]
    pub risks: Vec<RiskNote>,
    #[serde(default)]
    pub results: Vec<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<Reflection>,
    /// Lesson ids proposed to the approval gate by this run.
    #[serde(default)]
    pub proposed_lessons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Degraded steps (reflection failures, store errors) that did not stop the run.
    #[serde(default)]
    pub gaps: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn result(&self, id: &SubtaskId) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| &r.subtask_id == id)
    }

    /// Failed subtasks with their category and message.
    pub fn failures(&self) -> Vec<FailureSummary> {
        self.results
            .iter()
            .filter(|r| r.status == SubtaskStatus::Failed)
            .map(|r| FailureSummary {
                subtask_id: r.subtask_id.clone(),
                category: r.error.as_ref().map(|e| e.category),
                message: r
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .or_else(|| r.note.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Number of tool calls made across all subtasks.
    pub fn tool_calls(&self) -> usize {
        self.results.iter().map(|r| r.attempts.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Mode;

    #[test]
    fn update_for_executing_state_carries_phase() {
        let update = RunUpdate::subtask(
            RunState::Executing(2),
            SubtaskId::from_order(4),
            SubtaskStatus::Running,
            None,
        );
        assert_eq!(update.phase, Some(2));
        assert_eq!(update.status, Some(SubtaskStatus::Running));
        assert_eq!(RunUpdate::state(RunState::Planning).phase, None);
    }

    #[test]
    fn terminal_states() {
        assert!(RunState::Done.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert!(!RunState::Executing(0).is_terminal());
        assert_eq!(RunStatus::PartiallyFailed.to_string(), "partially_failed");
    }

    #[test]
    fn failures_prefer_classified_message() {
        let mut skipped = ExecutionResult::skipped(SubtaskId::from_order(2), "prerequisite s1 failed");
        skipped.status = SubtaskStatus::Failed;
        let report = RunReport {
            run_id: RunId::new(),
            goal: "g".into(),
            complexity: ComplexityReport {
                score: 0,
                mode: Mode::Direct,
                estimated_subtasks: 3,
                indicators: vec![],
            },
            status: RunStatus::PartiallyFailed,
            subtasks: vec![],
            phases: vec![],
            risks: vec![],
            results: vec![skipped],
            reflection: None,
            proposed_lessons: vec![],
            workflow_id: None,
            gaps: vec![],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "prerequisite s1 failed");
        assert_eq!(failures[0].category, None);
        assert_eq!(report.tool_calls(), 0);
    }
}
