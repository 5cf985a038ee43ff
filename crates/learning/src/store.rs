//! Experience store: lessons and workflow templates with semantic search.
//!
//! Lessons enter as Proposed and only a reviewer moves them to Approved.
//! Approved agent-scoped lessons are promoted to platform-wide once their
//! usage and positive-feedback ratio cross the configured thresholds.
//! Workflows are saved only from approved, fully successful, generalizable
//! runs; afterwards only their metadata changes.
//!
//! Mutations are serialized per lesson/workflow id. Creation is serialized
//! per kind so the near-duplicate check and the insert act as one step.
//! Every mutation rewrites the JSON snapshot when persistence is enabled.

use chrono::Utc;
use conductor_core::error::LearningError;
use conductor_core::event::{DomainEvent, EventBus, preview};
use conductor_core::knowledge::{
    Evidence, Lesson, LessonScope, LessonStatus, SubtaskTemplate, Workflow, WorkflowMetadata,
};
use conductor_core::plan::{ExecutionResult, MergedPlan, SubtaskStatus};
use conductor_core::run::Reflection;
use conductor_core::vector::{VectorFilter, VectorIndex};
use conductor_memory::{Embedder, HashEmbedder, InMemoryVectorIndex};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::persistence::{Snapshot, SnapshotFile};

const KIND_LESSON: &str = "lesson";
const KIND_WORKFLOW: &str = "workflow";

/// Thresholds governing dedup, matching and promotion.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub promotion_usage_threshold: u32,
    pub promotion_success_ratio: f32,
    pub dedup_threshold: f32,
    pub workflow_match_threshold: f32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&conductor_config::LearningConfig::default())
    }
}

impl From<&conductor_config::LearningConfig> for StoreSettings {
    fn from(config: &conductor_config::LearningConfig) -> Self {
        Self {
            promotion_usage_threshold: config.promotion_usage_threshold,
            promotion_success_ratio: config.promotion_success_ratio,
            dedup_threshold: config.dedup_threshold,
            workflow_match_threshold: config.workflow_match_threshold,
        }
    }
}

/// What a finished run reports when asking for its plan to be saved.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome<'a> {
    pub reflection: &'a Reflection,
    pub results: &'a [ExecutionResult],
    /// Whether the run passed the pre-flight gate.
    pub approved: bool,
}

/// Result of a lesson proposal.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub lesson: Lesson,
    /// False when the proposal matched a live lesson and that one came back.
    pub created: bool,
}

/// Lock keys guarding creation; ids are UUIDs so these never collide.
const CREATE_LESSON_KEY: &str = "create:lesson";
const CREATE_WORKFLOW_KEY: &str = "create:workflow";

/// Per-id async mutexes.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct ExperienceStore {
    lessons: RwLock<HashMap<String, Lesson>>,
    workflows: RwLock<HashMap<String, Workflow>>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    snapshot: Option<SnapshotFile>,
    locks: KeyedLocks,
    settings: StoreSettings,
    events: Option<Arc<EventBus>>,
}

impl ExperienceStore {
    /// A store with the given collaborators and no persistence.
    pub fn new(settings: StoreSettings, index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            lessons: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
            index,
            embedder,
            snapshot: None,
            locks: KeyedLocks::default(),
            settings,
            events: None,
        }
    }

    /// Ephemeral store over an in-memory index and the hashing embedder.
    pub fn in_memory(settings: StoreSettings) -> Self {
        Self::new(
            settings,
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(HashEmbedder::default()),
        )
    }

    /// Open a persistent store, loading and re-indexing any existing snapshot.
    pub async fn open(
        settings: StoreSettings,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, LearningError> {
        let file = SnapshotFile::new(path);
        let snapshot = file.load().await?;
        let mut store = Self::new(settings, index, embedder);

        for mut lesson in snapshot.lessons {
            if lesson.embedding.is_empty() {
                lesson.embedding = store.embedder.embed(&lesson.text).await?;
            }
            store.index_lesson(&lesson).await?;
            store.lessons.get_mut().insert(lesson.id.clone(), lesson);
        }
        for mut workflow in snapshot.workflows {
            if workflow.goal_embedding.is_empty() {
                workflow.goal_embedding = store.embedder.embed(&workflow.goal).await?;
            }
            store.index_workflow(&workflow).await?;
            store.workflows.get_mut().insert(workflow.id.clone(), workflow);
        }

        info!(
            path = %file.path().display(),
            lessons = store.lessons.get_mut().len(),
            workflows = store.workflows.get_mut().len(),
            "Experience store opened"
        );
        store.snapshot = Some(file);
        Ok(store)
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Embed text with the store's embedder.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, LearningError> {
        Ok(self.embedder.embed(text).await?)
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    async fn persist(&self) -> Result<(), LearningError> {
        let Some(file) = &self.snapshot else {
            return Ok(());
        };
        let snapshot = {
            let lessons = self.lessons.read().await;
            let workflows = self.workflows.read().await;
            let mut lessons: Vec<Lesson> = lessons.values().cloned().collect();
            lessons.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            let mut workflows: Vec<Workflow> = workflows.values().cloned().collect();
            workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            Snapshot {
                lessons,
                workflows,
                ..Snapshot::default()
            }
        };
        file.save(&snapshot).await
    }

    async fn index_lesson(&self, lesson: &Lesson) -> Result<(), LearningError> {
        let metadata = HashMap::from([
            ("kind".to_string(), KIND_LESSON.to_string()),
            ("status".to_string(), lesson.status.as_str().to_string()),
            ("scope".to_string(), lesson.scope.as_str().to_string()),
        ]);
        self.index.upsert(&lesson.id, lesson.embedding.clone(), metadata).await?;
        Ok(())
    }

    async fn index_workflow(&self, workflow: &Workflow) -> Result<(), LearningError> {
        let metadata = HashMap::from([("kind".to_string(), KIND_WORKFLOW.to_string())]);
        self.index.upsert(&workflow.id, workflow.goal_embedding.clone(), metadata).await?;
        Ok(())
    }

    // ── Lessons ──

    /// Propose a lesson for review.
    ///
    /// A proposal near-identical to a rejected lesson is refused; one
    /// near-identical to a live (proposed or approved) lesson returns that
    /// lesson instead of a duplicate.
    pub async fn propose_lesson(
        &self,
        text: &str,
        scope: LessonScope,
        confidence: f32,
        evidence: Evidence,
    ) -> Result<Proposal, LearningError> {
        let embedding = self.embedder.embed(text).await?;
        let _guard = self.locks.lock(CREATE_LESSON_KEY).await;

        let filter = VectorFilter::new().eq("kind", KIND_LESSON);
        let hits = self.index.query(&embedding, 8, &filter).await?;
        let near: Vec<_> = hits
            .into_iter()
            .filter(|h| h.score > self.settings.dedup_threshold)
            .collect();

        {
            let lessons = self.lessons.read().await;
            for hit in &near {
                if let Some(existing) = lessons.get(&hit.id)
                    && existing.status == LessonStatus::Rejected
                {
                    warn!(rejected_id = %existing.id, similarity = hit.score, "Refusing lesson matching a rejected one");
                    return Err(LearningError::DuplicateOfRejected {
                        rejected_id: existing.id.clone(),
                        similarity: hit.score,
                        reason: existing.rejection_reason.clone().unwrap_or_default(),
                    });
                }
            }
            for hit in &near {
                if let Some(existing) = lessons.get(&hit.id)
                    && matches!(existing.status, LessonStatus::Proposed | LessonStatus::Approved)
                {
                    debug!(lesson_id = %existing.id, similarity = hit.score, "Proposal duplicates a live lesson");
                    return Ok(Proposal {
                        lesson: existing.clone(),
                        created: false,
                    });
                }
            }
        }

        let mut lesson = Lesson::new(text, scope, confidence, evidence);
        lesson.embedding = embedding;
        self.index_lesson(&lesson).await?;
        self.lessons.write().await.insert(lesson.id.clone(), lesson.clone());
        self.persist().await?;

        info!(lesson_id = %lesson.id, scope = %lesson.scope, "Lesson proposed");
        self.publish(DomainEvent::LessonProposed {
            lesson_id: lesson.id.clone(),
            text_preview: preview(&lesson.text),
            timestamp: Utc::now(),
        });
        Ok(Proposal { lesson, created: true })
    }

    /// Apply `change` to a lesson under its id lock, then re-index and persist.
    async fn update_lesson<F>(&self, id: &str, change: F) -> Result<Lesson, LearningError>
    where
        F: FnOnce(&mut Lesson) -> Result<(), LearningError>,
    {
        let _guard = self.locks.lock(id).await;
        let updated = {
            let mut lessons = self.lessons.write().await;
            let lesson = lessons
                .get_mut(id)
                .ok_or_else(|| LearningError::LessonNotFound(id.to_string()))?;
            change(lesson)?;
            lesson.updated_at = Utc::now();
            lesson.clone()
        };
        self.index_lesson(&updated).await?;
        self.persist().await?;
        Ok(updated)
    }

    fn transition(lesson: &mut Lesson, next: LessonStatus) -> Result<(), LearningError> {
        if !lesson.status.can_transition_to(next) {
            return Err(LearningError::InvalidTransition {
                id: lesson.id.clone(),
                from: lesson.status.to_string(),
                to: next.to_string(),
            });
        }
        lesson.status = next;
        Ok(())
    }

    fn status_changed(&self, lesson: &Lesson) {
        info!(lesson_id = %lesson.id, status = %lesson.status, "Lesson status changed");
        self.publish(DomainEvent::LessonStatusChanged {
            lesson_id: lesson.id.clone(),
            status: lesson.status.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub async fn approve(&self, id: &str) -> Result<Lesson, LearningError> {
        let lesson = self
            .update_lesson(id, |l| Self::transition(l, LessonStatus::Approved))
            .await?;
        self.status_changed(&lesson);
        Ok(lesson)
    }

    /// Reject a lesson; the reason is kept so later duplicates can cite it.
    pub async fn reject(&self, id: &str, reason: Option<String>) -> Result<Lesson, LearningError> {
        let lesson = self
            .update_lesson(id, |l| {
                Self::transition(l, LessonStatus::Rejected)?;
                l.rejection_reason = Some(reason.unwrap_or_else(|| "rejected by reviewer".into()));
                Ok(())
            })
            .await?;
        self.status_changed(&lesson);
        Ok(lesson)
    }

    pub async fn archive(&self, id: &str) -> Result<Lesson, LearningError> {
        let lesson = self
            .update_lesson(id, |l| Self::transition(l, LessonStatus::Archived))
            .await?;
        self.status_changed(&lesson);
        Ok(lesson)
    }

    /// Promote an approved agent-scoped lesson when both thresholds hold.
    fn maybe_promote(settings: &StoreSettings, lesson: &mut Lesson) -> bool {
        let eligible = lesson.status == LessonStatus::Approved
            && lesson.scope == LessonScope::AgentScoped
            && lesson.usage_count >= settings.promotion_usage_threshold
            && lesson.success_ratio() >= settings.promotion_success_ratio;
        if eligible {
            lesson.scope = LessonScope::PlatformWide;
        }
        eligible
    }

    fn promoted(&self, lesson: &Lesson) {
        info!(
            lesson_id = %lesson.id,
            usage_count = lesson.usage_count,
            success_ratio = lesson.success_ratio(),
            "Lesson promoted to platform-wide"
        );
        self.publish(DomainEvent::LessonPromoted {
            lesson_id: lesson.id.clone(),
            usage_count: lesson.usage_count,
            success_ratio: lesson.success_ratio(),
            timestamp: Utc::now(),
        });
    }

    /// Count one application of a lesson.
    pub async fn record_usage(&self, id: &str) -> Result<Lesson, LearningError> {
        let settings = self.settings.clone();
        let mut promoted = false;
        let lesson = self
            .update_lesson(id, |l| {
                l.usage_count += 1;
                promoted = Self::maybe_promote(&settings, l);
                Ok(())
            })
            .await?;
        if promoted {
            self.promoted(&lesson);
        }
        Ok(lesson)
    }

    /// Record feedback on a lesson use. Positive feedback never exceeds usage.
    pub async fn record_feedback(&self, id: &str, positive: bool) -> Result<Lesson, LearningError> {
        let settings = self.settings.clone();
        let mut promoted = false;
        let lesson = self
            .update_lesson(id, |l| {
                if positive && l.positive_feedback_count < l.usage_count {
                    l.positive_feedback_count += 1;
                }
                promoted = Self::maybe_promote(&settings, l);
                Ok(())
            })
            .await?;
        if promoted {
            self.promoted(&lesson);
        }
        Ok(lesson)
    }

    /// Approved lessons nearest to `embedding`, limited to `scope` plus platform-wide.
    pub async fn search(
        &self,
        embedding: &[f32],
        scope: LessonScope,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<Lesson>, LearningError> {
        let mut scopes = vec![scope.as_str().to_string()];
        if scope != LessonScope::PlatformWide {
            scopes.push(LessonScope::PlatformWide.as_str().to_string());
        }
        let filter = VectorFilter::new()
            .eq("kind", KIND_LESSON)
            .eq("status", LessonStatus::Approved.as_str())
            .any_of("scope", scopes)
            .min_score(min_score);
        let hits = self.index.query(embedding, top_k, &filter).await?;

        let lessons = self.lessons.read().await;
        Ok(hits
            .into_iter()
            .filter_map(|h| lessons.get(&h.id).cloned())
            .collect())
    }

    /// Embed `text` and search.
    pub async fn search_text(
        &self,
        text: &str,
        scope: LessonScope,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<Lesson>, LearningError> {
        let embedding = self.embed(text).await?;
        self.search(&embedding, scope, top_k, min_score).await
    }

    pub async fn lesson_count(&self) -> usize {
        self.lessons.read().await.len()
    }

    pub async fn lesson(&self, id: &str) -> Option<Lesson> {
        self.lessons.read().await.get(id).cloned()
    }

    /// All lessons, optionally filtered by status, oldest first.
    pub async fn lessons(&self, status: Option<LessonStatus>) -> Vec<Lesson> {
        let mut out: Vec<Lesson> = self
            .lessons
            .read()
            .await
            .values()
            .filter(|l| status.is_none_or(|s| l.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    // ── Workflows ──

    /// Save a reusable template from a finished run.
    ///
    /// Refused unless the run was approved, fully successful and flagged as
    /// a workflow candidate. A run matching an existing workflow records an
    /// application on it instead of creating a near-duplicate.
    pub async fn save_workflow(&self, plan: &MergedPlan, outcome: RunOutcome<'_>) -> Result<Workflow, LearningError> {
        if !outcome.approved {
            return Err(LearningError::WorkflowRefused("run did not pass pre-flight review".into()));
        }
        if !outcome.reflection.success
            || outcome.results.is_empty()
            || outcome.results.iter().any(|r| r.status != SubtaskStatus::Succeeded)
        {
            return Err(LearningError::WorkflowRefused("run was not fully successful".into()));
        }
        if !outcome.reflection.workflow_candidate {
            return Err(LearningError::WorkflowRefused("run is not generalizable".into()));
        }

        let goal_embedding = self.embedder.embed(&plan.goal).await?;
        let _guard = self.locks.lock(CREATE_WORKFLOW_KEY).await;
        if let Some((existing, similarity)) = self.find_workflow(&goal_embedding).await? {
            debug!(workflow_id = %existing.id, similarity, "Run matches existing workflow");
            return self.record_workflow_outcome(&existing.id, true).await;
        }

        let subtasks = plan
            .subtasks
            .iter()
            .map(|s| SubtaskTemplate {
                order: s.order,
                text: s.text.clone(),
                after: s
                    .depends_on
                    .iter()
                    .filter_map(|d| plan.subtask(d).map(|p| p.order))
                    .collect(),
                steps: plan.miniplan(&s.id).map(|m| m.steps.clone()).unwrap_or_default(),
            })
            .collect();

        let workflow = Workflow {
            id: Uuid::new_v4().to_string(),
            goal: plan.goal.clone(),
            goal_embedding,
            subtasks,
            metadata: WorkflowMetadata::default(),
            created_at: Utc::now(),
        };

        self.index_workflow(&workflow).await?;
        self.workflows.write().await.insert(workflow.id.clone(), workflow.clone());
        self.persist().await?;

        info!(workflow_id = %workflow.id, subtasks = workflow.subtasks.len(), "Workflow saved");
        self.publish(DomainEvent::WorkflowSaved {
            workflow_id: workflow.id.clone(),
            goal_preview: preview(&workflow.goal),
            timestamp: Utc::now(),
        });
        Ok(workflow)
    }

    /// Closest workflow at or above the match threshold.
    pub async fn find_workflow(&self, goal_embedding: &[f32]) -> Result<Option<(Workflow, f32)>, LearningError> {
        let filter = VectorFilter::new()
            .eq("kind", KIND_WORKFLOW)
            .min_score(self.settings.workflow_match_threshold);
        let hits = self.index.query(goal_embedding, 1, &filter).await?;
        let workflows = self.workflows.read().await;
        Ok(hits
            .into_iter()
            .find_map(|h| workflows.get(&h.id).map(|w| (w.clone(), h.score))))
    }

    /// Update a workflow's metadata after it was applied.
    pub async fn record_workflow_outcome(&self, id: &str, success: bool) -> Result<Workflow, LearningError> {
        let _guard = self.locks.lock(id).await;
        let updated = {
            let mut workflows = self.workflows.write().await;
            let workflow = workflows
                .get_mut(id)
                .ok_or_else(|| LearningError::WorkflowNotFound(id.to_string()))?;
            workflow.metadata.record(success);
            workflow.clone()
        };
        self.persist().await?;
        Ok(updated)
    }

    /// All workflows, oldest first.
    pub async fn workflows(&self) -> Vec<Workflow> {
        let mut out: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::plan::{MiniPlan, SubtaskDescriptor, SubtaskId, ToolStep};

    fn settings() -> StoreSettings {
        StoreSettings {
            promotion_usage_threshold: 3,
            promotion_success_ratio: 0.8,
            dedup_threshold: 0.92,
            workflow_match_threshold: 0.90,
        }
    }

    async fn approved(store: &ExperienceStore, text: &str) -> Lesson {
        let lesson = store
            .propose_lesson(text, LessonScope::AgentScoped, 0.8, Evidence::default())
            .await
            .unwrap()
            .lesson;
        store.approve(&lesson.id).await.unwrap()
    }

    #[tokio::test]
    async fn proposed_lessons_are_not_searchable() {
        let store = ExperienceStore::in_memory(settings());
        store
            .propose_lesson("Install flask before running the app", LessonScope::AgentScoped, 0.9, Evidence::default())
            .await
            .unwrap()
            .lesson;
        let hits = store
            .search_text("install flask", LessonScope::AgentScoped, 5, 0.0)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn approved_lessons_are_scope_filtered() {
        let store = ExperienceStore::in_memory(settings());
        approved(&store, "Install flask before running the app").await;

        let agent = store
            .search_text("install flask app", LessonScope::AgentScoped, 5, 0.0)
            .await
            .unwrap();
        assert_eq!(agent.len(), 1);

        let user = store
            .search_text("install flask app", LessonScope::UserScoped, 5, 0.0)
            .await
            .unwrap();
        assert!(user.is_empty());
    }

    #[tokio::test]
    async fn cannot_approve_twice_or_approve_rejected() {
        let store = ExperienceStore::in_memory(settings());
        let lesson = approved(&store, "Run migrations before seeding").await;
        let err = store.approve(&lesson.id).await.unwrap_err();
        assert!(matches!(err, LearningError::InvalidTransition { .. }));

        let other = store
            .propose_lesson("Cache docker layers", LessonScope::AgentScoped, 0.6, Evidence::default())
            .await
            .unwrap()
            .lesson;
        store.reject(&other.id, None).await.unwrap();
        assert!(store.approve(&other.id).await.is_err());
    }

    #[tokio::test]
    async fn rejected_lesson_blocks_near_duplicate() {
        let store = ExperienceStore::in_memory(settings());
        let lesson = store
            .propose_lesson("Always use sudo for npm installs", LessonScope::AgentScoped, 0.5, Evidence::default())
            .await
            .unwrap()
            .lesson;
        store.reject(&lesson.id, Some("unsafe advice".into())).await.unwrap();

        let err = store
            .propose_lesson("always use sudo for npm installs.", LessonScope::AgentScoped, 0.9, Evidence::default())
            .await
            .unwrap_err();
        match err {
            LearningError::DuplicateOfRejected { rejected_id, reason, .. } => {
                assert_eq!(rejected_id, lesson.id);
                assert_eq!(reason, "unsafe advice");
            }
            other => panic!("expected DuplicateOfRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_duplicate_is_returned_not_copied() {
        let store = ExperienceStore::in_memory(settings());
        let first = store
            .propose_lesson("Pin dependency versions", LessonScope::AgentScoped, 0.7, Evidence::default())
            .await
            .unwrap();
        let second = store
            .propose_lesson("Pin dependency versions!", LessonScope::AgentScoped, 0.7, Evidence::default())
            .await
            .unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.lesson.id, second.lesson.id);
        assert_eq!(store.lessons(None).await.len(), 1);
    }

    /// Index that yields on every call so concurrent writers interleave.
    struct SlowIndex(InMemoryVectorIndex);

    #[async_trait::async_trait]
    impl VectorIndex for SlowIndex {
        fn name(&self) -> &str {
            "slow"
        }

        async fn upsert(
            &self,
            id: &str,
            embedding: Vec<f32>,
            metadata: HashMap<String, String>,
        ) -> Result<(), conductor_core::error::IndexError> {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            self.0.upsert(id, embedding, metadata).await
        }

        async fn query(
            &self,
            embedding: &[f32],
            top_k: usize,
            filter: &VectorFilter,
        ) -> Result<Vec<conductor_core::vector::VectorMatch>, conductor_core::error::IndexError> {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            self.0.query(embedding, top_k, filter).await
        }

        async fn remove(&self, id: &str) -> Result<bool, conductor_core::error::IndexError> {
            self.0.remove(id).await
        }

        async fn len(&self) -> Result<usize, conductor_core::error::IndexError> {
            self.0.len().await
        }
    }

    fn slow_store() -> ExperienceStore {
        ExperienceStore::new(
            settings(),
            Arc::new(SlowIndex(InMemoryVectorIndex::new())),
            Arc::new(HashEmbedder::default()),
        )
    }

    #[tokio::test]
    async fn concurrent_identical_proposals_store_one_lesson() {
        let store = slow_store();
        let (a, b) = tokio::join!(
            store.propose_lesson("Pin dependency versions", LessonScope::AgentScoped, 0.7, Evidence::default()),
            store.propose_lesson("Pin dependency versions", LessonScope::AgentScoped, 0.7, Evidence::default()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.lesson.id, b.lesson.id);
        assert!(a.created != b.created);
        assert_eq!(store.lesson_count().await, 1);
    }

    #[tokio::test]
    async fn promotion_requires_both_thresholds() {
        let store = ExperienceStore::in_memory(settings());
        let lesson = approved(&store, "Verify the port is free before starting servers").await;

        // 3 uses, 2 positive: ratio 0.67 < 0.8
        for _ in 0..3 {
            store.record_usage(&lesson.id).await.unwrap();
        }
        store.record_feedback(&lesson.id, true).await.unwrap();
        let l = store.record_feedback(&lesson.id, true).await.unwrap();
        assert_eq!(l.scope, LessonScope::AgentScoped);

        // third positive: ratio 1.0 with usage 3
        let l = store.record_feedback(&lesson.id, true).await.unwrap();
        assert_eq!(l.scope, LessonScope::PlatformWide);
    }

    #[tokio::test]
    async fn usage_below_threshold_never_promotes() {
        let store = ExperienceStore::in_memory(settings());
        let lesson = approved(&store, "Prefer small migrations").await;
        store.record_usage(&lesson.id).await.unwrap();
        let l = store.record_feedback(&lesson.id, true).await.unwrap();
        assert_eq!(l.success_ratio(), 1.0);
        assert_eq!(l.scope, LessonScope::AgentScoped);
    }

    #[tokio::test]
    async fn proposed_lesson_is_never_promoted() {
        let store = ExperienceStore::in_memory(settings());
        let lesson = store
            .propose_lesson("Unreviewed tip", LessonScope::AgentScoped, 0.9, Evidence::default())
            .await
            .unwrap()
            .lesson;
        for _ in 0..5 {
            store.record_usage(&lesson.id).await.unwrap();
            store.record_feedback(&lesson.id, true).await.unwrap();
        }
        let l = store.lesson(&lesson.id).await.unwrap();
        assert_eq!(l.status, LessonStatus::Proposed);
        assert_eq!(l.scope, LessonScope::AgentScoped);
    }

    #[tokio::test]
    async fn promotion_publishes_event() {
        let bus = Arc::new(EventBus::new(32));
        let mut rx = bus.subscribe();
        let store = ExperienceStore::in_memory(settings()).with_events(bus);
        let lesson = approved(&store, "Check disk space before builds").await;
        for _ in 0..3 {
            store.record_usage(&lesson.id).await.unwrap();
            store.record_feedback(&lesson.id, true).await.unwrap();
        }

        let mut saw_promotion = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.as_ref(), DomainEvent::LessonPromoted { .. }) {
                saw_promotion = true;
            }
        }
        assert!(saw_promotion);
    }

    fn plan() -> MergedPlan {
        let mut backend = SubtaskDescriptor::new(2, "Implement backend");
        backend.depends_on.insert(SubtaskId::from_order(1));
        MergedPlan {
            goal: "Build a todo app with authentication and deploy it".into(),
            subtasks: vec![SubtaskDescriptor::new(1, "Design schema"), backend],
            edges: vec![],
            miniplans: vec![MiniPlan::new(
                SubtaskId::from_order(1),
                vec![ToolStep::new("shell", "write schema.sql")],
            )],
            phases: vec![],
            risks: vec![],
        }
    }

    fn succeeded(id: usize) -> ExecutionResult {
        ExecutionResult {
            subtask_id: SubtaskId::from_order(id),
            status: SubtaskStatus::Succeeded,
            success: true,
            output: "ok".into(),
            artifacts: vec![],
            retry_count: 0,
            attempts: vec![],
            error: None,
            note: None,
        }
    }

    fn reflection(success: bool, candidate: bool) -> Reflection {
        Reflection {
            success,
            success_rate: if success { 1.0 } else { 0.5 },
            lessons: vec![],
            workflow_candidate: candidate,
        }
    }

    #[tokio::test]
    async fn workflow_saved_from_successful_candidate() {
        let store = ExperienceStore::in_memory(settings());
        let results = vec![succeeded(1), succeeded(2)];
        let refl = reflection(true, true);
        let wf = store
            .save_workflow(&plan(), RunOutcome { reflection: &refl, results: &results, approved: true })
            .await
            .unwrap();
        assert_eq!(wf.subtasks.len(), 2);
        assert_eq!(wf.subtasks[1].after, vec![1]);
        assert_eq!(wf.subtasks[0].steps.len(), 1);

        let embedding = store.embed(&plan().goal).await.unwrap();
        let (found, score) = store.find_workflow(&embedding).await.unwrap().unwrap();
        assert_eq!(found.id, wf.id);
        assert!(score > 0.99);
    }

    #[tokio::test]
    async fn workflow_refused_with_failed_subtask() {
        let store = ExperienceStore::in_memory(settings());
        let mut failed = succeeded(2);
        failed.status = SubtaskStatus::Failed;
        failed.success = false;
        let results = vec![succeeded(1), failed];
        let refl = reflection(true, true);
        let err = store
            .save_workflow(&plan(), RunOutcome { reflection: &refl, results: &results, approved: true })
            .await
            .unwrap_err();
        assert!(matches!(err, LearningError::WorkflowRefused(_)));
        assert!(store.workflows().await.is_empty());
    }

    #[tokio::test]
    async fn workflow_refused_when_not_candidate_or_unapproved() {
        let store = ExperienceStore::in_memory(settings());
        let results = vec![succeeded(1), succeeded(2)];
        let not_candidate = reflection(true, false);
        assert!(store
            .save_workflow(&plan(), RunOutcome { reflection: &not_candidate, results: &results, approved: true })
            .await
            .is_err());
        let candidate = reflection(true, true);
        assert!(store
            .save_workflow(&plan(), RunOutcome { reflection: &candidate, results: &results, approved: false })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn repeated_workflow_updates_metadata_only() {
        let store = ExperienceStore::in_memory(settings());
        let results = vec![succeeded(1), succeeded(2)];
        let refl = reflection(true, true);
        let outcome = RunOutcome { reflection: &refl, results: &results, approved: true };
        let first = store.save_workflow(&plan(), outcome).await.unwrap();
        let second = store.save_workflow(&plan(), outcome).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.subtasks, first.subtasks);
        assert_eq!(second.metadata.applied_count, 1);
        assert_eq!(store.workflows().await.len(), 1);

        let after = store.record_workflow_outcome(&first.id, false).await.unwrap();
        assert_eq!(after.metadata.applied_count, 2);
        assert!((after.metadata.success_rate - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn concurrent_saves_of_one_goal_store_one_workflow() {
        let store = slow_store();
        let results = vec![succeeded(1), succeeded(2)];
        let refl = reflection(true, true);
        let outcome = RunOutcome { reflection: &refl, results: &results, approved: true };
        let (plan_a, plan_b) = (plan(), plan());
        let (a, b) = tokio::join!(store.save_workflow(&plan_a, outcome), store.save_workflow(&plan_b, outcome));
        assert_eq!(a.unwrap().id, b.unwrap().id);
        let workflows = store.workflows().await;
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].metadata.applied_count, 1);
    }

    #[tokio::test]
    async fn persistent_store_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experience.json");
        let lesson_id = {
            let store = ExperienceStore::open(
                settings(),
                Arc::new(InMemoryVectorIndex::new()),
                Arc::new(HashEmbedder::default()),
                &path,
            )
            .await
            .unwrap();
            approved(&store, "Retry network installs once").await.id
        };

        let reopened = ExperienceStore::open(
            settings(),
            Arc::new(InMemoryVectorIndex::new()),
            Arc::new(HashEmbedder::default()),
            &path,
        )
        .await
        .unwrap();
        let lesson = reopened.lesson(&lesson_id).await.unwrap();
        assert_eq!(lesson.status, LessonStatus::Approved);
        let hits = reopened
            .search_text("retry network installs", LessonScope::AgentScoped, 3, 0.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn unknown_lesson_is_not_found() {
        let store = ExperienceStore::in_memory(settings());
        assert!(matches!(
            store.record_usage("missing").await.unwrap_err(),
            LearningError::LessonNotFound(_)
        ));
    }
}
