//! LLM provider implementations for Conductor.
//!
//! All providers implement the `conductor_core::Provider` trait.
//! The routers select the backend from configuration and the model per
//! orchestration stage.

pub mod fallback;
pub mod openai_compat;
pub mod router;

pub use fallback::FallbackProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, Stage, StageRouter, build_from_config};
