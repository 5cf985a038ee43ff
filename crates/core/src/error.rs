//! Error types for the Conductor domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Conductor operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Execution collaborator errors ---
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    // --- Vector index errors ---
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    // --- Experience store errors ---
    #[error("Learning error: {0}")]
    Learning(#[from] LearningError),

    // --- Planning errors ---
    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of the execution collaborator itself (not of the work it ran).
///
/// A tool that ran and failed reports through `ExecutionOutcome::raw_error`;
/// these variants mean the unit could not be driven at all.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("Execution unit unavailable: {0}")]
    Unavailable(String),

    #[error("Execution timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Invalid execution request: {0}")]
    InvalidRequest(String),

    #[error("Execution failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Index storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Error)]
pub enum LearningError {
    #[error("Lesson not found: {0}")]
    LessonNotFound(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Invalid lesson transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Proposal matches rejected lesson {rejected_id} (similarity {similarity:.2}): {reason}")]
    DuplicateOfRejected {
        rejected_id: String,
        similarity: f32,
        reason: String,
    },

    #[error("Workflow refused: {0}")]
    WorkflowRefused(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, Error)]
pub enum PlanningError {
    #[error("Decomposition produced {found} subtasks, need at least {min}")]
    TooFewSubtasks { found: usize, min: usize },

    #[error("Decomposition request failed: {0}")]
    DecompositionFailed(String),

    #[error("Planning for subtask {subtask_id} failed: {reason}")]
    MiniPlanFailed { subtask_id: String, reason: String },

    #[error("Reflection failed: {0}")]
    ReflectionFailed(String),

    #[error("Dependency cycle among subtasks: {0}")]
    CycleDetected(String),
}
