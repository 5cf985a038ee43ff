//! Execution coordinator: the per-run state machine.
//!
//! Planning → PreflightReflection → Executing(0..n) → PostflightReflection →
//! Done | PartiallyFailed | Cancelled.
//!
//! Phases run strictly in order; subtasks inside a phase run concurrently,
//! each wrapped by the retry controller, and the phase is joined before the
//! next one starts. A failed subtask does not stop the run: everything that
//! depends on it, directly or through skipped subtasks, is skipped and the
//! rest carries on. Cancellation is
//! checked at every phase boundary.

use chrono::{DateTime, Utc};
use conductor_config::AppConfig;
use conductor_core::error::{LearningError, PlanningError};
use conductor_core::event::{DomainEvent, EventBus, preview};
use conductor_core::executor::ExecutionRequest;
use conductor_core::knowledge::{Evidence, Lesson, LessonScope, LessonStatus, Workflow};
use conductor_core::plan::{
    ComplexityReport, Decomposition, DependencyEdge, ExecutionResult, MergedPlan, MiniPlan, Mode,
    RunId, SubtaskDescriptor, SubtaskId, SubtaskStatus,
};
use conductor_core::run::{Reflection, RunReport, RunState, RunStatus, RunUpdate};
use conductor_learning::{ApprovalGate, ExperienceStore, RunOutcome};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analyzer::ComplexityAnalyzer;
use crate::decomposer::Decomposer;
use crate::handle::RunChannels;
use crate::merger;
use crate::planner::Planner;
use crate::reflect::{Reflector, apply_mitigations};
use crate::retry::RetryController;

/// Prerequisite output passed on to dependents is clipped to this many characters.
const PREREQUISITE_OUTPUT_CHARS: usize = 500;

/// Run-level switches taken from configuration.
#[derive(Debug, Clone)]
pub(crate) struct RunSettings {
    pub preflight: bool,
    pub postflight: bool,
    pub lesson_top_k: usize,
    pub lesson_min_score: f32,
    pub available_tools: Vec<String>,
}

impl RunSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            preflight: config.planning.preflight,
            postflight: config.planning.postflight,
            lesson_top_k: config.learning.lesson_top_k,
            lesson_min_score: config.learning.lesson_min_score,
            available_tools: config.execution.available_tools.clone(),
        }
    }
}

pub(crate) struct Coordinator {
    pub analyzer: ComplexityAnalyzer,
    pub decomposer: Decomposer,
    pub planner: Planner,
    pub reflector: Reflector,
    pub retry: RetryController,
    pub store: Option<Arc<ExperienceStore>>,
    pub gate: Option<Arc<ApprovalGate>>,
    pub events: Option<Arc<EventBus>>,
    pub settings: RunSettings,
}

/// Everything one run accumulates on its way to the report.
struct RunContext {
    run_id: RunId,
    goal: String,
    complexity: ComplexityReport,
    started_at: DateTime<Utc>,
    plan: Option<MergedPlan>,
    results: Vec<ExecutionResult>,
    reflection: Option<Reflection>,
    proposed_lessons: Vec<String>,
    workflow_id: Option<String>,
    gaps: Vec<String>,
}

impl RunContext {
    fn gap(&mut self, gap: impl Into<String>) {
        let gap = gap.into();
        warn!(run_id = %self.run_id, gap = %gap, "Run degraded");
        self.gaps.push(gap);
    }
}

impl Coordinator {
    /// Drive a run to completion and deliver its report.
    pub async fn run(&self, run_id: RunId, goal: String, confirm_risks: bool, channels: RunChannels) {
        let report = self.drive(run_id, goal, confirm_risks, &channels).await;
        if channels.outcome.send(report).is_err() {
            debug!("Run handle dropped before the report was ready");
        }
    }

    async fn drive(&self, run_id: RunId, goal: String, confirm_risks: bool, channels: &RunChannels) -> RunReport {
        let complexity = self.analyzer.analyze(&goal);
        info!(
            run_id = %run_id,
            score = complexity.score,
            mode = ?complexity.mode,
            estimated_subtasks = complexity.estimated_subtasks,
            "Run started"
        );

        let mut ctx = RunContext {
            run_id,
            goal,
            complexity,
            started_at: Utc::now(),
            plan: None,
            results: Vec::new(),
            reflection: None,
            proposed_lessons: Vec::new(),
            workflow_id: None,
            gaps: Vec::new(),
        };

        let status = match ctx.complexity.mode {
            Mode::Direct => self.run_direct(&mut ctx, channels).await,
            Mode::Orchestrated => self.run_orchestrated(&mut ctx, confirm_risks, channels).await,
        };
        self.finish(ctx, status, channels)
    }

    // ── Direct mode ──

    async fn run_direct(&self, ctx: &mut RunContext, channels: &RunChannels) -> RunStatus {
        if channels.cancelled() {
            return RunStatus::Cancelled;
        }
        let hints = self.lesson_hints(ctx).await;

        let id = SubtaskId::direct();
        let state = RunState::Executing(0);
        channels.emit(RunUpdate::subtask(state, id.clone(), SubtaskStatus::Running, None));

        let request = ExecutionRequest::new(id.clone(), ctx.goal.clone())
            .with_tools(self.settings.available_tools.clone())
            .with_context(hints.iter().map(|l| format!("Lesson: {}", l.text)));
        let result = self.retry.execute_with_retry(request).await;
        channels.emit(RunUpdate::subtask(state, id, result.status, partial(&result.output)));

        let success = result.status == SubtaskStatus::Succeeded;
        self.reward_hints(ctx, &hints, success).await;
        ctx.results.push(result);

        if success {
            RunStatus::Done
        } else {
            RunStatus::PartiallyFailed
        }
    }

    // ── Orchestrated mode ──

    async fn run_orchestrated(&self, ctx: &mut RunContext, confirm_risks: bool, channels: &RunChannels) -> RunStatus {
        channels.emit(RunUpdate::state(RunState::Planning));
        let (mut plan, reused) = match self.plan(ctx).await {
            Ok(planned) => planned,
            Err(e) => {
                ctx.gap(format!("planning failed: {e}"));
                return RunStatus::PartiallyFailed;
            }
        };
        for subtask in &plan.subtasks {
            let status = match plan.miniplan(&subtask.id) {
                Some(m) if m.needs_clarification.is_some() => SubtaskStatus::Pending,
                _ => SubtaskStatus::Ready,
            };
            channels.emit(RunUpdate::subtask(RunState::Planning, subtask.id.clone(), status, None));
        }
        info!(
            run_id = %ctx.run_id,
            subtasks = plan.subtasks.len(),
            phases = plan.phases.len(),
            reused_workflow = reused.is_some(),
            "Plan ready"
        );

        // Runs whose pre-flight found nothing blocking may become workflows
        let mut approved = true;
        if self.settings.preflight {
            channels.emit(RunUpdate::state(RunState::PreflightReflection));
            match self.reflector.reflect_before(&plan).await {
                Ok(risks) => {
                    plan = apply_mitigations(&plan, &risks);
                    let blocking: Vec<&str> = risks
                        .iter()
                        .filter(|r| r.blocks_execution())
                        .map(|r| r.text.as_str())
                        .collect();
                    if !blocking.is_empty() {
                        approved = false;
                        if !confirm_risks {
                            ctx.gap(format!("execution blocked by critical risk: {}", blocking.join("; ")));
                            ctx.plan = Some(plan);
                            return RunStatus::Cancelled;
                        }
                        warn!(run_id = %ctx.run_id, risks = blocking.len(), "Critical risks confirmed by caller");
                    }
                }
                Err(e) => {
                    approved = false;
                    ctx.gap(e.to_string());
                }
            }
        }

        let hints = self.lesson_hints(ctx).await;
        let cancelled = self.execute_phases(ctx, &plan, &hints, channels).await;

        channels.emit(RunUpdate::state(RunState::PostflightReflection));
        let reflection = if self.settings.postflight {
            let post = self.reflector.reflect_after(&plan, &ctx.results).await;
            if let Some(gap) = post.gap {
                ctx.gap(gap);
            }
            post.reflection
        } else {
            Reflector::local_reflection(&plan, &ctx.results)
        };

        self.reward_hints(ctx, &hints, reflection.success).await;
        self.learn(ctx, &plan, &reflection, approved, reused.as_deref()).await;

        ctx.reflection = Some(reflection);
        ctx.plan = Some(plan);

        if cancelled {
            RunStatus::Cancelled
        } else if ctx.results.iter().any(|r| r.status == SubtaskStatus::Failed) {
            RunStatus::PartiallyFailed
        } else {
            RunStatus::Done
        }
    }

    /// Reuse a stored workflow for the goal, or decompose and plan afresh.
    async fn plan(&self, ctx: &RunContext) -> Result<(MergedPlan, Option<String>), PlanningError> {
        if let Some((workflow, similarity)) = self.matching_workflow(&ctx.goal).await {
            info!(run_id = %ctx.run_id, workflow_id = %workflow.id, similarity, "Reusing stored workflow");
            let plan = plan_from_template(&ctx.goal, &workflow)?;
            return Ok((plan, Some(workflow.id)));
        }

        let decomposition = self
            .decomposer
            .decompose(&ctx.goal, ctx.complexity.estimated_subtasks)
            .await?;
        let miniplans = self.planner.plan_all(&ctx.goal, &decomposition.subtasks).await;
        let plan = merger::merge(&ctx.goal, &decomposition, miniplans)?;
        Ok((plan, None))
    }

    async fn matching_workflow(&self, goal: &str) -> Option<(Workflow, f32)> {
        let store = self.store.as_ref()?;
        let found = match store.embed(goal).await {
            Ok(embedding) => store.find_workflow(&embedding).await,
            Err(e) => Err(e),
        };
        found.unwrap_or_else(|e| {
            warn!(error = %e, "Workflow lookup failed");
            None
        })
    }

    /// Run every phase in order. Returns true when the run was cancelled.
    async fn execute_phases(
        &self,
        ctx: &mut RunContext,
        plan: &MergedPlan,
        hints: &[Lesson],
        channels: &RunChannels,
    ) -> bool {
        let mut statuses: HashMap<SubtaskId, SubtaskStatus> = HashMap::new();
        let mut outputs: HashMap<SubtaskId, String> = HashMap::new();

        for phase in &plan.phases {
            if channels.cancelled() {
                info!(run_id = %ctx.run_id, next_phase = phase.index, "Run cancelled");
                return true;
            }

            let state = RunState::Executing(phase.index);
            channels.emit(RunUpdate::state(state));
            info!(run_id = %ctx.run_id, phase = phase.index, subtasks = phase.subtask_ids.len(), "Phase started");

            let mut requests = Vec::new();
            for id in &phase.subtask_ids {
                let Some(subtask) = plan.subtask(id) else {
                    continue;
                };

                let blocked = subtask.depends_on.iter().find_map(|d| {
                    statuses
                        .get(d)
                        .filter(|s| s.blocks_dependents())
                        .map(|s| (d, *s))
                });
                if let Some((prerequisite, status)) = blocked {
                    info!(run_id = %ctx.run_id, subtask_id = %id, prerequisite = %prerequisite, %status, "Skipping subtask");
                    let result = ExecutionResult::skipped(id.clone(), format!("prerequisite {prerequisite} {status}"));
                    self.record(ctx, &mut statuses, &mut outputs, state, channels, result);
                    continue;
                }

                if let Some(reason) = plan.miniplan(id).and_then(|m| m.needs_clarification.as_deref()) {
                    warn!(run_id = %ctx.run_id, subtask_id = %id, reason, "Subtask was never planned");
                    let result = unplanned(id.clone(), reason);
                    self.record(ctx, &mut statuses, &mut outputs, state, channels, result);
                    continue;
                }

                channels.emit(RunUpdate::subtask(state, id.clone(), SubtaskStatus::Running, None));
                requests.push(self.request_for(&ctx.goal, plan, subtask, hints, &outputs));
            }

            let results = join_all(
                requests
                    .into_iter()
                    .map(|request| self.retry.execute_with_retry(request)),
            )
            .await;
            for result in results {
                self.record(ctx, &mut statuses, &mut outputs, state, channels, result);
            }
        }
        false
    }

    fn record(
        &self,
        ctx: &mut RunContext,
        statuses: &mut HashMap<SubtaskId, SubtaskStatus>,
        outputs: &mut HashMap<SubtaskId, String>,
        state: RunState,
        channels: &RunChannels,
        result: ExecutionResult,
    ) {
        statuses.insert(result.subtask_id.clone(), result.status);
        if result.status == SubtaskStatus::Succeeded && !result.output.is_empty() {
            outputs.insert(result.subtask_id.clone(), result.output.clone());
        }
        channels.emit(RunUpdate::subtask(
            state,
            result.subtask_id.clone(),
            result.status,
            partial(&result.output),
        ));
        ctx.results.push(result);
    }

    fn request_for(
        &self,
        goal: &str,
        plan: &MergedPlan,
        subtask: &SubtaskDescriptor,
        hints: &[Lesson],
        outputs: &HashMap<SubtaskId, String>,
    ) -> ExecutionRequest {
        let miniplan = plan.miniplan(&subtask.id);
        let mut context = vec![format!("Goal: {goal}")];
        if let Some(miniplan) = miniplan {
            context.extend(miniplan.constraints.iter().map(|c| format!("Constraint: {c}")));
        }
        context.extend(hints.iter().map(|l| format!("Lesson: {}", l.text)));
        for prerequisite in &subtask.depends_on {
            if let Some(output) = outputs.get(prerequisite) {
                let clipped: String = output.chars().take(PREREQUISITE_OUTPUT_CHARS).collect();
                context.push(format!("Output of {prerequisite}: {clipped}"));
            }
        }

        ExecutionRequest::new(subtask.id.clone(), subtask.text.clone())
            .with_steps(miniplan.map(|m| m.steps.clone()).unwrap_or_default())
            .with_tools(self.settings.available_tools.clone())
            .with_context(context)
    }

    // ── Learning ──

    /// Approved lessons near the goal, each counted as one usage.
    async fn lesson_hints(&self, ctx: &mut RunContext) -> Vec<Lesson> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        let lessons = match store
            .search_text(
                &ctx.goal,
                LessonScope::AgentScoped,
                self.settings.lesson_top_k,
                self.settings.lesson_min_score,
            )
            .await
        {
            Ok(lessons) => lessons,
            Err(e) => {
                ctx.gap(format!("lesson search failed: {e}"));
                return Vec::new();
            }
        };

        for lesson in &lessons {
            if let Err(e) = store.record_usage(&lesson.id).await {
                ctx.gap(format!("could not record usage of lesson {}: {e}", lesson.id));
            }
        }
        if !lessons.is_empty() {
            info!(run_id = %ctx.run_id, lessons = lessons.len(), "Applying learned lessons");
        }
        lessons
    }

    /// Positive feedback for every hint used by a successful run.
    async fn reward_hints(&self, ctx: &mut RunContext, hints: &[Lesson], success: bool) {
        let Some(store) = &self.store else {
            return;
        };
        if !success {
            return;
        }
        for lesson in hints {
            if let Err(e) = store.record_feedback(&lesson.id, true).await {
                ctx.gap(format!("could not record feedback on lesson {}: {e}", lesson.id));
            }
        }
    }

    async fn learn(
        &self,
        ctx: &mut RunContext,
        plan: &MergedPlan,
        reflection: &Reflection,
        approved: bool,
        reused: Option<&str>,
    ) {
        if let Some(store) = &self.store {
            match reused {
                Some(id) => match store.record_workflow_outcome(id, reflection.success).await {
                    Ok(workflow) => ctx.workflow_id = Some(workflow.id),
                    Err(e) => ctx.gap(format!("could not update workflow {id}: {e}")),
                },
                None if reflection.workflow_candidate => {
                    let outcome = RunOutcome {
                        reflection,
                        results: &ctx.results,
                        approved,
                    };
                    match store.save_workflow(plan, outcome).await {
                        Ok(workflow) => ctx.workflow_id = Some(workflow.id),
                        Err(LearningError::WorkflowRefused(reason)) => {
                            debug!(run_id = %ctx.run_id, reason = %reason, "Workflow not saved");
                        }
                        Err(e) => ctx.gap(format!("could not save workflow: {e}")),
                    }
                }
                None => {}
            }
        }

        let Some(gate) = &self.gate else {
            return;
        };
        let evidence = Evidence {
            run_id: Some(ctx.run_id.to_string()),
            goal: Some(ctx.goal.clone()),
            observations: observations(&ctx.results),
        };
        for candidate in &reflection.lessons {
            match gate
                .submit(&candidate.text, LessonScope::AgentScoped, candidate.confidence, evidence.clone())
                .await
            {
                Ok(lesson) => {
                    if lesson.status == LessonStatus::Proposed && !ctx.proposed_lessons.contains(&lesson.id) {
                        ctx.proposed_lessons.push(lesson.id);
                    }
                }
                Err(LearningError::DuplicateOfRejected { rejected_id, similarity, .. }) => {
                    debug!(run_id = %ctx.run_id, rejected_id = %rejected_id, similarity, "Lesson matches a rejected one");
                }
                Err(e) => ctx.gap(format!("could not propose lesson: {e}")),
            }
        }
    }

    // ── Report ──

    fn finish(&self, ctx: RunContext, status: RunStatus, channels: &RunChannels) -> RunReport {
        let failed = ctx
            .results
            .iter()
            .filter(|r| r.status == SubtaskStatus::Failed)
            .count();
        info!(
            run_id = %ctx.run_id,
            status = %status,
            results = ctx.results.len(),
            failed,
            gaps = ctx.gaps.len(),
            "Run finished"
        );
        channels.emit(RunUpdate::state(status.into()));

        if let Some(events) = &self.events {
            events.publish(DomainEvent::RunFinished {
                run_id: ctx.run_id.to_string(),
                status: status.to_string(),
                subtasks: ctx.results.len(),
                failed,
                timestamp: Utc::now(),
            });
        }

        let (subtasks, phases, risks) = match ctx.plan {
            Some(plan) => {
                let subtasks = plan
                    .subtasks
                    .iter()
                    .map(|s| {
                        let status = ctx
                            .results
                            .iter()
                            .find(|r| r.subtask_id == s.id)
                            .map_or(SubtaskStatus::Pending, |r| r.status);
                        s.with_status(status)
                    })
                    .collect();
                (subtasks, plan.phases, plan.risks)
            }
            None => (Vec::new(), Vec::new(), Vec::new()),
        };

        RunReport {
            run_id: ctx.run_id,
            goal: ctx.goal,
            complexity: ctx.complexity,
            status,
            subtasks,
            phases,
            risks,
            results: ctx.results,
            reflection: ctx.reflection,
            proposed_lessons: ctx.proposed_lessons,
            workflow_id: ctx.workflow_id,
            gaps: ctx.gaps,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Rebuild a plan from a stored workflow without any model call.
fn plan_from_template(goal: &str, workflow: &Workflow) -> Result<MergedPlan, PlanningError> {
    let subtasks: Vec<SubtaskDescriptor> = workflow
        .subtasks
        .iter()
        .map(|t| {
            let mut descriptor = SubtaskDescriptor::new(t.order, t.text.clone());
            descriptor.depends_on = t.after.iter().map(|o| SubtaskId::from_order(*o)).collect();
            descriptor
        })
        .collect();
    let edges = subtasks
        .iter()
        .flat_map(|s| {
            s.depends_on.iter().map(|p| DependencyEdge {
                prerequisite: p.clone(),
                dependent: s.id.clone(),
            })
        })
        .collect();
    let miniplans = workflow
        .subtasks
        .iter()
        .map(|t| MiniPlan::new(SubtaskId::from_order(t.order), t.steps.clone()))
        .collect();

    let decomposition = Decomposition {
        subtasks,
        edges,
        linear_fallback: false,
        merged_excess: 0,
    };
    merger::merge(goal, &decomposition, miniplans)
}

/// A subtask whose planning failed ends Failed without running.
fn unplanned(subtask_id: SubtaskId, reason: &str) -> ExecutionResult {
    ExecutionResult {
        status: SubtaskStatus::Failed,
        note: Some(format!("needs clarification: {reason}")),
        ..ExecutionResult::skipped(subtask_id, "")
    }
}

fn partial(output: &str) -> Option<String> {
    (!output.is_empty()).then(|| preview(output))
}

/// Evidence lines for lessons: what failed and what needed fixing.
fn observations(results: &[ExecutionResult]) -> Vec<String> {
    results
        .iter()
        .filter_map(|r| match (&r.error, r.status) {
            (Some(error), _) => Some(format!(
                "{} {}: [{}] {}",
                r.subtask_id, r.status, error.category, error.message
            )),
            (None, SubtaskStatus::Succeeded) if r.retry_count > 0 => {
                let fixes: Vec<String> = r
                    .attempts
                    .iter()
                    .filter_map(|a| a.applied_fix.map(|f| f.to_string()))
                    .collect();
                Some(format!(
                    "{} succeeded after {} retries ({})",
                    r.subtask_id,
                    r.retry_count,
                    fixes.join(", ")
                ))
            }
            (None, _) => r.note.as_ref().map(|n| format!("{} {}: {n}", r.subtask_id, r.status)),
        })
        .collect()
}
