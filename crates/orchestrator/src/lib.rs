//! # Conductor Orchestrator
//!
//! Goal analysis, decomposition, parallel mini-planning, phase merging,
//! reflection and fix-aware retry, driven per run by the execution
//! coordinator.
//!
//! ```text
//! goal ─▶ analyzer ─┬─ Direct ─────────────▶ retry(executor)
//!                   └─ Orchestrated ─▶ decomposer ─▶ planner ─▶ merger
//!                        ─▶ pre-flight ─▶ phases × retry(executor)
//!                        ─▶ post-flight ─▶ experience store / approval gate
//! ```

pub mod analyzer;
pub mod classifier;
mod coordinator;
pub mod decomposer;
pub mod engine;
pub mod handle;
pub mod merger;
pub mod planner;
pub mod reflect;
pub mod retry;

#[cfg(test)]
mod test_helpers;

pub use analyzer::ComplexityAnalyzer;
pub use classifier::ErrorClassifier;
pub use decomposer::{DECOMPOSE_HEADER, Decomposer};
pub use engine::Orchestrator;
pub use handle::RunHandle;
pub use merger::{merge, phases};
pub use planner::{MINIPLAN_HEADER, Planner};
pub use reflect::{POSTFLIGHT_HEADER, PREFLIGHT_HEADER, Postflight, Reflector, apply_mitigations};
pub use retry::{RetryController, RetryPolicy};
