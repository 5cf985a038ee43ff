//! ReviewSurface trait: where proposed lessons meet a human.
//!
//! The approval gate presents each proposed lesson with its evidence; the
//! reviewer's decision comes back later through `ApprovalGate::on_decision`.

use async_trait::async_trait;

use crate::error::LearningError;
use crate::knowledge::{Evidence, Lesson};

#[async_trait]
pub trait ReviewSurface: Send + Sync {
    fn name(&self) -> &str;

    /// Show a proposed lesson to a reviewer. Does not wait for a decision.
    async fn present(&self, lesson: &Lesson, evidence: &Evidence) -> std::result::Result<(), LearningError>;
}
