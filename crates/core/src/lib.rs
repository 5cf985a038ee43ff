//! # Conductor Core
//!
//! Domain types, collaborator traits, and error definitions for the Conductor
//! task-orchestration engine. This crate has **no framework dependencies**;
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here: the language-model
//! [`Provider`], the [`ExecutionUnit`] that runs tools, the [`VectorIndex`]
//! behind semantic search, and the [`ReviewSurface`] that shows lessons to a
//! human. Implementations live in their respective crates, so:
//! - implementations swap via configuration
//! - tests drive the orchestrator with scripted doubles
//! - all crates depend inward on core

pub mod classification;
pub mod error;
pub mod event;
pub mod executor;
pub mod knowledge;
pub mod message;
pub mod plan;
pub mod provider;
pub mod review;
pub mod run;
pub mod vector;

// Re-export key types at crate root for ergonomics
pub use classification::{ErrorCategory, ErrorClassification, ErrorDetails, Severity, SuggestedFix};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use executor::{ExecutionOutcome, ExecutionRequest, ExecutionUnit};
pub use knowledge::{Decision, Evidence, Lesson, LessonScope, LessonStatus, Workflow, WorkflowMetadata};
pub use message::{Message, Role};
pub use plan::{
    ComplexityReport, Decomposition, DependencyEdge, ExecutionPhase, ExecutionResult, Goal,
    MergedPlan, MiniPlan, Mode, RiskNote, RunId, SubtaskDescriptor, SubtaskId, SubtaskStatus,
    ToolStep,
};
pub use provider::{CompletionConstraints, Provider, ProviderRequest, ProviderResponse};
pub use review::ReviewSurface;
pub use run::{Reflection, RunReport, RunState, RunStatus, RunUpdate};
pub use vector::{VectorFilter, VectorIndex, VectorMatch};
