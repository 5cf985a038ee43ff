//! Reference execution unit for Conductor.
//!
//! Gives the orchestrator a way to act on the world: shell steps run under
//! an allow/block command policy with per-step timeouts, and every other
//! step is carried out by the language model.

pub mod shell;
pub mod unit;

pub use shell::{CommandPolicy, ShellRunner};
pub use unit::ToolingExecutor;
