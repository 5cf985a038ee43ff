//! Plan domain types: goals, subtasks, mini-plans, phases and results.
//!
//! Everything a run produces is addressed by a stable id scoped to that run.
//! Components hand immutable snapshots forward rather than mutating a shared
//! "current plan".

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::classification::{ErrorCategory, ErrorClassification, Severity, SuggestedFix};

/// Unique identifier for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a subtask within one run (`s1`, `s2`, ... in declared order).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubtaskId(pub String);

impl SubtaskId {
    /// Id for the subtask at 1-based declared position `order`.
    pub fn from_order(order: usize) -> Self {
        Self(format!("s{order}"))
    }

    /// The id used for the single step of a Direct-mode run.
    pub fn direct() -> Self {
        Self("direct".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a goal will be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// One tool call, no decomposition.
    Direct,
    /// Decompose, plan, merge, execute in phases.
    Orchestrated,
}

/// Output of the complexity analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityReport {
    /// Additive score, 0..=10.
    pub score: u8,
    pub mode: Mode,
    /// Suggested subtask count, 3..=7.
    pub estimated_subtasks: usize,
    /// Human-readable signals that contributed to the score.
    pub indicators: Vec<String>,
}

/// A goal with its derived complexity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub text: String,
    pub complexity: ComplexityReport,
}

/// Lifecycle of one subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Planning,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl SubtaskStatus {
    /// Whether a dependent must be skipped once its prerequisite has this
    /// status. Skips cascade so a failure reaches its whole downstream.
    pub fn blocks_dependents(self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// One decomposed unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskDescriptor {
    pub id: SubtaskId,
    /// 1-based declared position; used to break ties inside a phase.
    pub order: usize,
    pub text: String,
    pub depends_on: BTreeSet<SubtaskId>,
    pub status: SubtaskStatus,
}

impl SubtaskDescriptor {
    pub fn new(order: usize, text: impl Into<String>) -> Self {
        Self {
            id: SubtaskId::from_order(order),
            order,
            text: text.into(),
            depends_on: BTreeSet::new(),
            status: SubtaskStatus::Pending,
        }
    }

    /// Snapshot of this descriptor with a new status.
    pub fn with_status(&self, status: SubtaskStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// `prerequisite` must finish before `dependent` may start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub prerequisite: SubtaskId,
    pub dependent: SubtaskId,
}

/// Decomposer output: descriptors plus the (acyclic) edge list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decomposition {
    pub subtasks: Vec<SubtaskDescriptor>,
    pub edges: Vec<DependencyEdge>,
    /// True when declared dependencies formed a cycle and were replaced by a chain.
    pub linear_fallback: bool,
    /// How many excess items were folded into the last kept subtask.
    pub merged_excess: usize,
}

/// One tool invocation inside a mini-plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStep {
    /// Opaque tool name understood by the execution unit.
    pub tool: String,
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ToolStep {
    pub fn new(tool: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            instruction: instruction.into(),
            timeout_secs: None,
        }
    }
}

/// Ordered tool steps for one subtask, planned without seeing other subtasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiniPlan {
    pub subtask_id: SubtaskId,
    pub steps: Vec<ToolStep>,
    /// Constraints injected by pre-flight mitigations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    /// Set when planning failed; the subtask needs redecomposition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_clarification: Option<String>,
}

impl MiniPlan {
    pub fn new(subtask_id: SubtaskId, steps: Vec<ToolStep>) -> Self {
        Self {
            subtask_id,
            steps,
            constraints: Vec::new(),
            needs_clarification: None,
        }
    }

    /// Empty plan flagged for redecomposition.
    pub fn needs_clarification(subtask_id: SubtaskId, reason: impl Into<String>) -> Self {
        Self {
            subtask_id,
            steps: Vec::new(),
            constraints: Vec::new(),
            needs_clarification: Some(reason.into()),
        }
    }
}

/// A group of subtasks with no dependency among its members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPhase {
    pub index: usize,
    pub subtask_ids: Vec<SubtaskId>,
}

/// A pre-flight risk and the action taken against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskNote {
    pub text: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
    /// Subtask the mitigation applies to; `None` means every subtask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<SubtaskId>,
}

impl RiskNote {
    pub fn blocks_execution(&self) -> bool {
        self.severity == Severity::Critical && self.mitigation.is_none()
    }
}

/// The merged, phase-ordered plan handed to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedPlan {
    pub goal: String,
    pub subtasks: Vec<SubtaskDescriptor>,
    pub edges: Vec<DependencyEdge>,
    pub miniplans: Vec<MiniPlan>,
    pub phases: Vec<ExecutionPhase>,
    #[serde(default)]
    pub risks: Vec<RiskNote>,
}

impl MergedPlan {
    pub fn subtask(&self, id: &SubtaskId) -> Option<&SubtaskDescriptor> {
        self.subtasks.iter().find(|s| &s.id == id)
    }

    pub fn miniplan(&self, id: &SubtaskId) -> Option<&MiniPlan> {
        self.miniplans.iter().find(|p| &p.subtask_id == id)
    }

    /// Subtasks that list `id` as a prerequisite.
    pub fn dependents_of<'a>(&'a self, id: &'a SubtaskId) -> impl Iterator<Item = &'a SubtaskDescriptor> + 'a {
        self.subtasks.iter().filter(move |s| s.depends_on.contains(id))
    }
}

/// One attempt made by the retry controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    /// Fix applied before the *next* attempt, if one was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_fix: Option<SuggestedFix>,
    /// Whether this attempt ran a request that differed from the previous one.
    pub modified: bool,
    pub message: String,
}

/// The outcome of one subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub subtask_id: SubtaskId,
    pub status: SubtaskStatus,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// Attempts beyond the first.
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptRecord>,
    /// Last classified failure, if the subtask ended Failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorClassification>,
    /// Why the subtask was skipped or never ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ExecutionResult {
    /// Result for a subtask that never ran because a prerequisite failed.
    pub fn skipped(subtask_id: SubtaskId, reason: impl Into<String>) -> Self {
        Self {
            subtask_id,
            status: SubtaskStatus::Skipped,
            success: false,
            output: String::new(),
            artifacts: Vec::new(),
            retry_count: 0,
            attempts: Vec::new(),
            error: None,
            note: Some(reason.into()),
        }
    }
}
