//! Approval gate: the only path from a proposed lesson to an approved one.
//!
//! Lessons are submitted (proposed in the store), then presented on a
//! review surface. The reviewer's decision arrives separately through
//! [`ApprovalGate::on_decision`]; nothing here ever approves on its own.

use async_trait::async_trait;
use conductor_core::error::LearningError;
use conductor_core::knowledge::{Decision, Evidence, Lesson, LessonScope, LessonStatus};
use conductor_core::review::ReviewSurface;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::store::ExperienceStore;

pub struct ApprovalGate {
    store: Arc<ExperienceStore>,
    surface: Arc<dyn ReviewSurface>,
}

impl ApprovalGate {
    pub fn new(store: Arc<ExperienceStore>, surface: Arc<dyn ReviewSurface>) -> Self {
        Self { store, surface }
    }

    pub fn store(&self) -> &Arc<ExperienceStore> {
        &self.store
    }

    /// Propose a lesson and show it to a reviewer.
    ///
    /// A proposal that duplicates a live lesson is not re-presented. A
    /// surface failure is logged; the lesson stays proposed and can be
    /// presented again with [`ApprovalGate::present_pending`].
    pub async fn submit(
        &self,
        text: &str,
        scope: LessonScope,
        confidence: f32,
        evidence: Evidence,
    ) -> Result<Lesson, LearningError> {
        let proposal = self.store.propose_lesson(text, scope, confidence, evidence).await?;
        if proposal.created && proposal.lesson.status == LessonStatus::Proposed {
            self.present(&proposal.lesson).await;
        }
        Ok(proposal.lesson)
    }

    async fn present(&self, lesson: &Lesson) {
        if let Err(e) = self.surface.present(lesson, &lesson.evidence).await {
            warn!(lesson_id = %lesson.id, surface = %self.surface.name(), error = %e, "Failed to present lesson");
        }
    }

    /// Re-present every lesson still awaiting review. Returns how many.
    pub async fn present_pending(&self) -> usize {
        let pending = self.store.lessons(Some(LessonStatus::Proposed)).await;
        for lesson in &pending {
            self.present(lesson).await;
        }
        pending.len()
    }

    /// Apply a reviewer's decision.
    pub async fn on_decision(
        &self,
        lesson_id: &str,
        decision: Decision,
        reason: Option<String>,
    ) -> Result<Lesson, LearningError> {
        let lesson = match decision {
            Decision::Approve => self.store.approve(lesson_id).await?,
            Decision::Reject => self.store.reject(lesson_id, reason).await?,
        };
        info!(lesson_id, ?decision, "Review decision applied");
        Ok(lesson)
    }
}

/// A lesson as shown to a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub lesson_id: String,
    pub text: String,
    pub scope: LessonScope,
    pub confidence: f32,
    pub evidence: Evidence,
}

/// Review surface that forwards items to a channel.
///
/// The receiving half belongs to whatever UI collects decisions.
pub struct ChannelReviewSurface {
    tx: mpsc::UnboundedSender<ReviewItem>,
}

impl ChannelReviewSurface {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReviewItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReviewSurface for ChannelReviewSurface {
    fn name(&self) -> &str {
        "channel"
    }

    async fn present(&self, lesson: &Lesson, evidence: &Evidence) -> Result<(), LearningError> {
        self.tx
            .send(ReviewItem {
                lesson_id: lesson.id.clone(),
                text: lesson.text.clone(),
                scope: lesson.scope,
                confidence: lesson.confidence,
                evidence: evidence.clone(),
            })
            .map_err(|_| LearningError::Persistence("review channel closed".into()))
    }
}

/// Surface that only logs; used when no reviewer is attached.
pub struct LogReviewSurface;

#[async_trait]
impl ReviewSurface for LogReviewSurface {
    fn name(&self) -> &str {
        "log"
    }

    async fn present(&self, lesson: &Lesson, _evidence: &Evidence) -> Result<(), LearningError> {
        info!(lesson_id = %lesson.id, scope = %lesson.scope, text = %lesson.text, "Lesson awaiting review");
        Ok(())
    }
}
