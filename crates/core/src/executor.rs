//! ExecutionUnit trait: the narrow "run a tool, get a result" contract.
//!
//! The orchestrator never runs tools itself. It hands a subtask and its
//! mini-plan to an execution unit and gets back either output or a raw error
//! that the classifier can work on. Sandboxing and resource isolation are the
//! unit's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;
use crate::plan::{SubtaskId, ToolStep};

/// A request to execute one subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub subtask_id: SubtaskId,

    /// The subtask text as produced by the decomposer (or the goal itself in Direct mode).
    pub text: String,

    /// Ordered steps from the mini-plan, possibly with fix steps prepended.
    #[serde(default)]
    pub steps: Vec<ToolStep>,

    /// Tool names the unit may use.
    #[serde(default)]
    pub available_tools: Vec<String>,

    /// Free-form context: constraints, lesson hints, corrective notes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl ExecutionRequest {
    pub fn new(subtask_id: SubtaskId, text: impl Into<String>) -> Self {
        Self {
            subtask_id,
            text: text.into(),
            steps: Vec::new(),
            available_tools: Vec::new(),
            context: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<ToolStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.available_tools = tools;
        self
    }

    pub fn with_context(mut self, context: impl IntoIterator<Item = String>) -> Self {
        self.context.extend(context);
        self
    }
}

/// What came back from an execution unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub output: String,

    /// References to produced artifacts (paths, URLs, ids).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,

    /// Raw error text when the work itself failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ExecutionOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn failure(raw_error: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            raw_error: Some(raw_error.into()),
            exit_code,
            ..Default::default()
        }
    }

    /// A non-zero exit code counts as failure even without error text.
    pub fn is_success(&self) -> bool {
        self.raw_error.is_none() && self.exit_code.is_none_or(|c| c == 0)
    }
}

/// The execution collaborator.
///
/// Implementations: the shell/LLM tooling executor, scripted test doubles.
#[async_trait]
pub trait ExecutionUnit: Send + Sync {
    /// A human-readable name for this unit.
    fn name(&self) -> &str;

    /// Run a subtask. `Err` means the unit itself could not be driven.
    async fn run(&self, request: ExecutionRequest) -> std::result::Result<ExecutionOutcome, ExecutorError>;
}
