//! End-to-end integration tests for the Conductor orchestration engine.
//!
//! These tests drive full runs through the public `Orchestrator` API with a
//! scripted language model and execution unit: analysis, decomposition,
//! phase execution, fix-aware retry, reflection and the learning loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use conductor_config::AppConfig;
use conductor_core::classification::{ErrorCategory, SuggestedFix};
use conductor_core::error::{ExecutorError, LearningError, ProviderError};
use conductor_core::executor::{ExecutionOutcome, ExecutionRequest, ExecutionUnit};
use conductor_core::knowledge::{Decision, Evidence, LessonScope, LessonStatus};
use conductor_core::message::Message;
use conductor_core::plan::{Mode, SubtaskId, SubtaskStatus, ToolStep};
use conductor_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use conductor_core::run::{RunReport, RunState, RunStatus};
use conductor_learning::{ApprovalGate, ChannelReviewSurface, ExperienceStore, LogReviewSurface, StoreSettings};
use conductor_memory::{HashEmbedder, InMemoryVectorIndex};
use conductor_orchestrator::{
    DECOMPOSE_HEADER, MINIPLAN_HEADER, Orchestrator, POSTFLIGHT_HEADER, PREFLIGHT_HEADER,
};
use conductor_providers::StageRouter;
use conductor_tools::ToolingExecutor;
use tokio_stream::StreamExt;

const TODO_GOAL: &str = "Build a todo app with authentication and deploy it";
const TODO_PLAN: &str = "1. Design database schema [independent]\n\
                         2. Implement authentication (after: 1)\n\
                         3. Build backend API (after: 1)\n\
                         4. Build frontend (after: 2, 3)\n\
                         5. Deploy (after: 2, 3)";
const TODO_LESSON: &str = "Design the schema before the API";

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that answers by prompt content; the first matching
/// needle wins.
struct MockProvider {
    rules: Vec<(String, String)>,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    fn new() -> Self {
        Self {
            rules: Vec::new(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn on(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), reply.to_string()));
        self
    }

    /// The scripted model for the todo-app goal.
    fn todo(miniplan: &str) -> Self {
        Self::new()
            .on(DECOMPOSE_HEADER, TODO_PLAN)
            .on(MINIPLAN_HEADER, miniplan)
            .on(PREFLIGHT_HEADER, "NONE")
            .on(POSTFLIGHT_HEADER, &format!("LESSON (0.8): {TODO_LESSON}"))
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn prompts_containing(&self, needle: &str) -> usize {
        self.prompts.lock().unwrap().iter().filter(|p| p.contains(needle)).count()
    }

    fn router(self: &Arc<Self>) -> StageRouter {
        StageRouter::new(self.clone(), "e2e-model")
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let transcript = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(transcript.clone());

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| transcript.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_default();

        Ok(ProviderResponse {
            message: Message::assistant(reply),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "e2e-model".into(),
            metadata: serde_json::Map::new(),
        })
    }
}

// ── Mock Execution Unit ──────────────────────────────────────────────────

/// Queued outcomes per subtask-text needle; anything unscripted succeeds.
struct MockExecutor {
    scripts: Mutex<Vec<(String, VecDeque<ExecutionOutcome>)>>,
    requests: Mutex<Vec<ExecutionRequest>>,
}

impl MockExecutor {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn on(self, needle: &str, outcomes: Vec<ExecutionOutcome>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .push((needle.to_string(), outcomes.into()));
        self
    }

    fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ExecutionUnit for MockExecutor {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutorError> {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .iter_mut()
            .find(|(needle, _)| request.text.contains(needle.as_str()))
            .and_then(|(_, queue)| queue.pop_front());
        let outcome = scripted.unwrap_or_else(|| ExecutionOutcome::success(format!("done: {}", request.text)));
        self.requests.lock().unwrap().push(request);
        Ok(outcome)
    }
}

fn status_of(report: &RunReport, order: usize) -> SubtaskStatus {
    report.result(&SubtaskId::from_order(order)).map(|r| r.status).unwrap()
}

async fn open_store(path: &std::path::Path) -> Arc<ExperienceStore> {
    let store = ExperienceStore::open(
        StoreSettings::default(),
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(HashEmbedder::default()),
        path.to_path_buf(),
    )
    .await
    .unwrap();
    Arc::new(store)
}

// ── E2E: Direct Mode ─────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_simple_question_runs_as_one_tool_call() {
    let provider = Arc::new(MockProvider::new());
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = Arc::new(Orchestrator::new(provider.router(), executor.clone()));

    let mut handle = orchestrator.orchestrate("What is 2+2?", false);
    let updates: Vec<_> = handle.stream().collect().await;
    let report = handle.outcome().await.unwrap();

    assert!(report.complexity.score <= 2);
    assert_eq!(report.complexity.mode, Mode::Direct);
    assert_eq!(report.status, RunStatus::Done);
    assert!(report.phases.is_empty());
    assert_eq!(report.tool_calls(), 1);
    assert_eq!(executor.requests().len(), 1);
    assert_eq!(provider.calls(), 0);
    assert_eq!(updates.last().map(|u| u.state), Some(RunState::Done));
}

#[tokio::test]
async fn e2e_direct_mode_through_the_tooling_executor() {
    let provider = Arc::new(MockProvider::new().on("Task: What is 2+2?", "4"));
    let config = AppConfig::default();
    let executor = Arc::new(ToolingExecutor::from_config(&config, provider.router()));
    let orchestrator = Arc::new(Orchestrator::from_config(&config, provider.router(), executor));

    let report = orchestrator.orchestrate("What is 2+2?", false).outcome().await.unwrap();

    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.results[0].output, "4");
    assert_eq!(provider.calls(), 1);
}

// ── E2E: Orchestrated Mode ───────────────────────────────────────────────

#[tokio::test]
async fn e2e_todo_app_runs_in_three_phases() {
    let provider = Arc::new(MockProvider::todo("llm: do the work"));
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = Arc::new(Orchestrator::new(provider.router(), executor.clone()));

    let report = orchestrator.orchestrate(TODO_GOAL, false).outcome().await.unwrap();

    assert!(report.complexity.score >= 7, "score was {}", report.complexity.score);
    assert_eq!(report.complexity.mode, Mode::Orchestrated);
    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.subtasks.len(), 5);

    let phases: Vec<Vec<SubtaskId>> = report.phases.iter().map(|p| p.subtask_ids.clone()).collect();
    assert_eq!(
        phases,
        vec![
            vec![SubtaskId::from_order(1)],
            vec![SubtaskId::from_order(2), SubtaskId::from_order(3)],
            vec![SubtaskId::from_order(4), SubtaskId::from_order(5)],
        ]
    );
    assert_eq!(executor.requests().len(), 5);
    assert!((1..=5).all(|i| status_of(&report, i) == SubtaskStatus::Succeeded));

    // one mini-plan per subtask
    assert_eq!(provider.prompts_containing(MINIPLAN_HEADER), 5);
}

#[tokio::test]
async fn e2e_shell_steps_run_through_the_tooling_executor() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.execution.working_dir = Some(dir.path().to_path_buf());

    let provider = Arc::new(MockProvider::todo("shell: echo step complete"));
    let executor = Arc::new(ToolingExecutor::from_config(&config, provider.router()));
    let orchestrator = Arc::new(Orchestrator::from_config(&config, provider.router(), executor));

    let report = orchestrator.orchestrate(TODO_GOAL, false).outcome().await.unwrap();

    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.results.len(), 5);
    assert!(report.results.iter().all(|r| r.output.contains("step complete")));
}

// ── E2E: Fix-Aware Retry ─────────────────────────────────────────────────

#[tokio::test]
async fn e2e_missing_dependency_is_installed_then_retried() {
    let provider = Arc::new(MockProvider::new());
    let executor = Arc::new(MockExecutor::new().on(
        "app.py",
        vec![ExecutionOutcome::failure(
            "Traceback (most recent call last):\nModuleNotFoundError: No module named 'flask'",
            Some(1),
        )],
    ));
    let orchestrator = Arc::new(Orchestrator::new(provider.router(), executor.clone()));

    let report = orchestrator.orchestrate("Run app.py", false).outcome().await.unwrap();

    assert_eq!(report.complexity.mode, Mode::Direct);
    assert_eq!(report.status, RunStatus::Done);
    let result = &report.results[0];
    assert!(result.success);
    assert_eq!(result.retry_count, 1);
    assert_eq!(result.attempts[0].category, Some(ErrorCategory::MissingDependency));
    assert_eq!(result.attempts[0].applied_fix, Some(SuggestedFix::InstallDependency));

    let requests = executor.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].steps[0], ToolStep::new("shell", "pip install flask"));
}

#[tokio::test]
async fn e2e_permission_denied_fails_fast_and_skips_dependents() {
    let provider = Arc::new(MockProvider::todo("llm: do the work"));
    let executor = Arc::new(MockExecutor::new().on(
        "Implement authentication",
        vec![ExecutionOutcome::failure("Permission denied: /etc/secrets", Some(1))],
    ));
    let orchestrator = Arc::new(Orchestrator::new(provider.router(), executor.clone()));

    let report = orchestrator.orchestrate(TODO_GOAL, false).outcome().await.unwrap();

    assert_eq!(report.status, RunStatus::PartiallyFailed);
    let auth = report.result(&SubtaskId::from_order(2)).unwrap();
    assert_eq!(auth.status, SubtaskStatus::Failed);
    assert_eq!(auth.attempts.len(), 1);
    assert_eq!(auth.retry_count, 0);

    let auth_calls = executor
        .requests()
        .iter()
        .filter(|r| r.text.contains("Implement authentication"))
        .count();
    assert_eq!(auth_calls, 1);

    assert_eq!(status_of(&report, 3), SubtaskStatus::Succeeded);
    assert_eq!(status_of(&report, 4), SubtaskStatus::Skipped);
    assert_eq!(status_of(&report, 5), SubtaskStatus::Skipped);

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].category, Some(ErrorCategory::PermissionDenied));

    // a failed run never becomes a workflow
    assert!(report.workflow_id.is_none());
}

// ── E2E: Learning Loop ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_workflow_and_approved_lesson_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("experience.json");

    let first_id = {
        let store = open_store(&path).await;
        let (surface, mut reviews) = ChannelReviewSurface::new();
        let gate = Arc::new(ApprovalGate::new(store.clone(), Arc::new(surface)));
        let provider = Arc::new(MockProvider::todo("llm: do the work"));
        let orchestrator = Arc::new(
            Orchestrator::new(provider.router(), Arc::new(MockExecutor::new())).with_gate(gate.clone()),
        );

        let report = orchestrator.orchestrate(TODO_GOAL, false).outcome().await.unwrap();
        assert_eq!(report.status, RunStatus::Done);
        assert!(report.workflow_id.is_some());

        let item = reviews.recv().await.unwrap();
        assert_eq!(item.text, TODO_LESSON);
        let lesson = gate.on_decision(&item.lesson_id, Decision::Approve, None).await.unwrap();
        assert_eq!(lesson.status, LessonStatus::Approved);
        report.workflow_id.unwrap()
    };

    let reopened = open_store(&path).await;
    assert_eq!(reopened.workflows().await.len(), 1);
    assert_eq!(reopened.lessons(Some(LessonStatus::Approved)).await.len(), 1);

    // the stored workflow replaces decomposition on the next run
    let provider = Arc::new(MockProvider::todo("llm: do the work"));
    let orchestrator =
        Arc::new(Orchestrator::new(provider.router(), Arc::new(MockExecutor::new())).with_store(reopened.clone()));
    let second = orchestrator.orchestrate(TODO_GOAL, false).outcome().await.unwrap();

    assert_eq!(second.status, RunStatus::Done);
    assert_eq!(second.workflow_id.as_deref(), Some(first_id.as_str()));
    assert_eq!(second.phases.len(), 3);
    assert_eq!(provider.prompts_containing(DECOMPOSE_HEADER), 0);

    let workflows = reopened.workflows().await;
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].metadata.applied_count, 1);
}

#[tokio::test]
async fn e2e_rejected_lesson_cannot_come_back() {
    let store = Arc::new(ExperienceStore::in_memory(StoreSettings::default()));
    let gate = Arc::new(ApprovalGate::new(store.clone(), Arc::new(LogReviewSurface)));
    let provider = Arc::new(MockProvider::todo("llm: do the work"));
    let orchestrator =
        Arc::new(Orchestrator::new(provider.router(), Arc::new(MockExecutor::new())).with_gate(gate.clone()));

    let report = orchestrator.orchestrate(TODO_GOAL, false).outcome().await.unwrap();
    assert_eq!(report.proposed_lessons.len(), 1);

    let id = &report.proposed_lessons[0];
    let rejected = gate
        .on_decision(id, Decision::Reject, Some("too specific".into()))
        .await
        .unwrap();
    assert_eq!(rejected.status, LessonStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("too specific"));

    let again = store
        .propose_lesson(TODO_LESSON, LessonScope::AgentScoped, 0.8, Evidence::default())
        .await;
    assert!(matches!(again, Err(LearningError::DuplicateOfRejected { .. })));
}

#[tokio::test]
async fn e2e_critical_risk_blocks_until_confirmed() {
    let risky = "RISK [critical] (all): Deploy overwrites the production database";
    let provider = Arc::new(
        MockProvider::new()
            .on(DECOMPOSE_HEADER, TODO_PLAN)
            .on(MINIPLAN_HEADER, "llm: do the work")
            .on(PREFLIGHT_HEADER, risky)
            .on(POSTFLIGHT_HEADER, "NONE"),
    );
    let executor = Arc::new(MockExecutor::new());
    let orchestrator = Arc::new(Orchestrator::new(provider.router(), executor.clone()));

    let blocked = orchestrator.orchestrate(TODO_GOAL, false).outcome().await.unwrap();
    assert_eq!(blocked.status, RunStatus::Cancelled);
    assert!(executor.requests().is_empty());
    assert!(blocked.gaps.iter().any(|g| g.contains("critical risk")));

    let confirmed = orchestrator.orchestrate(TODO_GOAL, true).outcome().await.unwrap();
    assert_eq!(confirmed.status, RunStatus::Done);
    assert_eq!(executor.requests().len(), 5);
    assert!(confirmed.workflow_id.is_none());
}
