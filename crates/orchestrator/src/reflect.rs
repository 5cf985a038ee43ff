//! Reflectors: an adversarial pass before execution, a lessons pass after.
//!
//! Pre-flight answers in `RISK [severity] (target): text | MITIGATION: action`
//! lines. Mitigations are written into the plan: a targeted one becomes an
//! early step of that subtask, an untargeted one a constraint on every
//! subtask. Post-flight computes the success figures locally and asks the
//! model only for `LESSON (confidence): text` lines.

use conductor_config::AppConfig;
use conductor_core::classification::Severity;
use conductor_core::error::PlanningError;
use conductor_core::plan::{ExecutionResult, MergedPlan, RiskNote, SubtaskId, SubtaskStatus, ToolStep};
use conductor_core::provider::CompletionConstraints;
use conductor_core::run::{LessonCandidate, Reflection};
use conductor_learning::ExperienceStore;
use conductor_providers::{Stage, StageRouter};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use crate::analyzer::{contains_phrase, normalize};

static RISK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*]|\d+[.)])?\s*RISK\s*\[([^\]]*)\]\s*(?:\(([^)]*)\))?\s*:?\s*(.*?)\s*(?:\|\s*MITIGATION\s*:\s*(.*?))?\s*$",
    )
    .expect("risk line regex should be valid")
});

static LESSON_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*]|\d+[.)])?\s*LESSON\s*\(\s*([0-9]*\.?[0-9]+)\s*%?\s*\)\s*:?\s*(.+?)\s*$")
        .expect("lesson line regex should be valid")
});

/// Header every pre-flight prompt starts with.
pub const PREFLIGHT_HEADER: &str = "Find what could go wrong with this plan";

/// Header every post-flight prompt starts with.
pub const POSTFLIGHT_HEADER: &str = "Extract reusable lessons from this run";

const PREFLIGHT_SYSTEM: &str = "You are a skeptical reviewer. You look for missing \
prerequisites, wrong ordering, destructive operations and unstated assumptions.";

const POSTFLIGHT_SYSTEM: &str = "You distill short, reusable engineering lessons from \
the record of a finished run. Only state what the record supports.";

/// Goal vocabulary that tends to come back: scaffolds, services, deploys.
const RECURRING_VOCABULARY: &[&str] = &[
    "app", "application", "api", "service", "website", "site", "dashboard", "blog", "todo",
    "crud", "landing page", "deploy", "setup", "set up", "scaffold", "pipeline", "bot", "cli",
    "microservice", "integration", "migration",
];

/// Post-flight result plus why the model pass was skipped, if it failed.
#[derive(Debug, Clone)]
pub struct Postflight {
    pub reflection: Reflection,
    pub gap: Option<String>,
}

pub struct Reflector {
    router: StageRouter,
    constraints: CompletionConstraints,
    store: Option<Arc<ExperienceStore>>,
}

impl Reflector {
    pub fn new(router: StageRouter) -> Self {
        Self {
            router,
            constraints: CompletionConstraints::structured(1024),
            store: None,
        }
    }

    pub fn from_config(config: &AppConfig, router: StageRouter) -> Self {
        Self::new(router).with_constraints(CompletionConstraints::structured(config.planning.max_tokens))
    }

    pub fn with_constraints(mut self, constraints: CompletionConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Used to recognise goals that already have a stored workflow.
    pub fn with_store(mut self, store: Arc<ExperienceStore>) -> Self {
        self.store = Some(store);
        self
    }

    // ── Pre-flight ──

    /// One adversarial pass over the merged plan.
    pub async fn reflect_before(&self, plan: &MergedPlan) -> Result<Vec<RiskNote>, PlanningError> {
        let reply = self
            .router
            .complete(Stage::Preflight, PREFLIGHT_SYSTEM, &preflight_prompt(plan), &self.constraints)
            .await
            .map_err(|e| PlanningError::ReflectionFailed(format!("pre-flight: {e}")))?;

        let risks = parse_risks(&reply, plan);
        info!(
            risks = risks.len(),
            blocking = risks.iter().filter(|r| r.blocks_execution()).count(),
            "Pre-flight review finished"
        );
        Ok(risks)
    }

    // ── Post-flight ──

    /// Success figures, lesson candidates and the workflow decision.
    ///
    /// A failed lesson pass reports a gap and captures nothing: no lessons
    /// and no workflow candidate. The success figures are always present.
    pub async fn reflect_after(&self, plan: &MergedPlan, results: &[ExecutionResult]) -> Postflight {
        let mut reflection = Self::local_reflection(plan, results);

        let gap = match self.extract_lessons(plan, results).await {
            Ok(lessons) => {
                reflection.lessons = lessons;
                reflection.workflow_candidate = reflection.success
                    && results.iter().all(|r| r.retry_count <= 1)
                    && self.is_recurring(&plan.goal).await;
                None
            }
            Err(e) => {
                warn!(error = %e, "Lesson extraction failed, skipping capture");
                Some(e.to_string())
            }
        };

        debug!(
            success = reflection.success,
            success_rate = reflection.success_rate,
            workflow_candidate = reflection.workflow_candidate,
            lessons = reflection.lessons.len(),
            "Post-flight reflection"
        );
        Postflight { reflection, gap }
    }

    /// Reflection with no model call, for runs configured without post-flight.
    pub fn local_reflection(plan: &MergedPlan, results: &[ExecutionResult]) -> Reflection {
        let total = plan.subtasks.len().max(results.len());
        let succeeded = results
            .iter()
            .filter(|r| r.status == SubtaskStatus::Succeeded)
            .count();
        Reflection {
            success: total > 0 && succeeded == total,
            success_rate: if total == 0 { 0.0 } else { succeeded as f32 / total as f32 },
            lessons: Vec::new(),
            workflow_candidate: false,
        }
    }

    async fn extract_lessons(
        &self,
        plan: &MergedPlan,
        results: &[ExecutionResult],
    ) -> Result<Vec<LessonCandidate>, PlanningError> {
        let reply = self
            .router
            .complete(
                Stage::Postflight,
                POSTFLIGHT_SYSTEM,
                &postflight_prompt(plan, results),
                &self.constraints,
            )
            .await
            .map_err(|e| PlanningError::ReflectionFailed(format!("post-flight: {e}")))?;
        Ok(parse_lessons(&reply))
    }

    async fn is_recurring(&self, goal: &str) -> bool {
        let text = normalize(goal);
        let words: Vec<&str> = text.split_whitespace().collect();
        if RECURRING_VOCABULARY.iter().any(|v| contains_phrase(&words, v)) {
            return true;
        }
        let Some(store) = &self.store else {
            return false;
        };
        match store.embed(goal).await {
            Ok(embedding) => matches!(store.find_workflow(&embedding).await, Ok(Some(_))),
            Err(e) => {
                warn!(error = %e, "Could not embed goal for workflow lookup");
                false
            }
        }
    }
}

/// Write risk mitigations into a copy of the plan.
pub fn apply_mitigations(plan: &MergedPlan, risks: &[RiskNote]) -> MergedPlan {
    let mut out = plan.clone();
    for risk in risks {
        let Some(mitigation) = &risk.mitigation else {
            continue;
        };
        match &risk.target {
            Some(target) => {
                if let Some(miniplan) = out.miniplans.iter_mut().find(|m| &m.subtask_id == target) {
                    miniplan
                        .steps
                        .insert(0, ToolStep::new("llm", format!("Mitigation: {mitigation}")));
                }
            }
            None => {
                for miniplan in &mut out.miniplans {
                    miniplan.constraints.push(mitigation.clone());
                }
            }
        }
    }
    out.risks = risks.to_vec();
    out
}

fn preflight_prompt(plan: &MergedPlan) -> String {
    let mut prompt = format!("{PREFLIGHT_HEADER}.\n\nGoal: {}\n\nSubtasks:\n", plan.goal);
    for subtask in &plan.subtasks {
        let _ = write!(prompt, "{} {}", subtask.id, subtask.text);
        if !subtask.depends_on.is_empty() {
            let deps: Vec<String> = subtask.depends_on.iter().map(|d| d.to_string()).collect();
            let _ = write!(prompt, " (after {})", deps.join(", "));
        }
        prompt.push('\n');
        if let Some(miniplan) = plan.miniplan(&subtask.id) {
            for step in &miniplan.steps {
                let _ = writeln!(prompt, "    {}: {}", step.tool, step.instruction);
            }
        }
    }
    prompt.push_str(
        "\nList each risk on its own line as\n\
         RISK [low|medium|high|critical] (subtask id or all): description | MITIGATION: action\n\
         Leave out the MITIGATION part when nothing can be done. Reply NONE if you see no risk.",
    );
    prompt
}

fn postflight_prompt(plan: &MergedPlan, results: &[ExecutionResult]) -> String {
    let mut prompt = format!("{POSTFLIGHT_HEADER}.\n\nGoal: {}\n\nOutcome per subtask:\n", plan.goal);
    for subtask in &plan.subtasks {
        match results.iter().find(|r| r.subtask_id == subtask.id) {
            Some(result) => {
                let _ = write!(
                    prompt,
                    "{} {}: {} after {} retries",
                    subtask.id, subtask.text, result.status, result.retry_count
                );
                if let Some(error) = &result.error {
                    let _ = write!(prompt, " [{}] {}", error.category, error.message);
                }
                for attempt in result.attempts.iter().filter(|a| !a.success) {
                    if let Some(category) = attempt.category {
                        let _ = write!(prompt, "; attempt {} failed ({category})", attempt.attempt);
                    }
                }
            }
            None => {
                let _ = write!(prompt, "{} {}: not run", subtask.id, subtask.text);
            }
        }
        prompt.push('\n');
    }
    prompt.push_str(
        "\nReply with at most five lines of the form\n\
         LESSON (confidence between 0 and 1): lesson text\n\
         Reply NONE if nothing generalizes.",
    );
    prompt
}

pub(crate) fn parse_risks(reply: &str, plan: &MergedPlan) -> Vec<RiskNote> {
    reply
        .lines()
        .filter_map(|line| {
            let caps = RISK_LINE.captures(line)?;
            let text = caps.get(3).map_or("", |m| m.as_str()).trim().to_string();
            if text.is_empty() {
                return None;
            }
            let severity = Severity::parse(&caps[1]).unwrap_or_else(|| {
                debug!(label = &caps[1], "Unknown risk severity, assuming medium");
                Severity::Medium
            });
            let target = caps.get(2).and_then(|m| resolve_target(m.as_str(), plan));
            let mitigation = caps
                .get(4)
                .map(|m| m.as_str().trim())
                .filter(|m| !m.is_empty() && !m.eq_ignore_ascii_case("none") && *m != "-")
                .map(String::from);
            Some(RiskNote {
                text,
                severity,
                mitigation,
                target,
            })
        })
        .collect()
}

/// `s2`, `2` or `#2` name a subtask; anything else means the whole plan.
fn resolve_target(raw: &str, plan: &MergedPlan) -> Option<SubtaskId> {
    let raw = raw.trim().trim_start_matches('#');
    let order: usize = raw
        .strip_prefix('s')
        .or_else(|| raw.strip_prefix('S'))
        .unwrap_or(raw)
        .parse()
        .ok()?;
    let id = SubtaskId::from_order(order);
    if plan.subtask(&id).is_some() {
        Some(id)
    } else {
        warn!(subtask = raw, "Risk names an unknown subtask, applying to all");
        None
    }
}

pub(crate) fn parse_lessons(reply: &str) -> Vec<LessonCandidate> {
    reply
        .lines()
        .filter_map(|line| {
            let caps = LESSON_LINE.captures(line)?;
            let mut confidence: f32 = caps[1].parse().ok()?;
            if confidence > 1.0 {
                confidence /= 100.0;
            }
            Some(LessonCandidate {
                text: caps[2].to_string(),
                confidence: confidence.clamp(0.0, 1.0),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;
    use conductor_core::error::ProviderError;
    use conductor_core::plan::{ExecutionPhase, MiniPlan, SubtaskDescriptor};
    use conductor_learning::StoreSettings;

    fn plan(goal: &str) -> MergedPlan {
        let subtasks: Vec<_> = (1..=3).map(|i| SubtaskDescriptor::new(i, format!("task {i}"))).collect();
        MergedPlan {
            goal: goal.into(),
            miniplans: subtasks
                .iter()
                .map(|s| MiniPlan::new(s.id.clone(), vec![ToolStep::new("shell", "echo hi")]))
                .collect(),
            phases: vec![ExecutionPhase {
                index: 0,
                subtask_ids: subtasks.iter().map(|s| s.id.clone()).collect(),
            }],
            subtasks,
            edges: vec![],
            risks: vec![],
        }
    }

    fn result(order: usize, status: SubtaskStatus, retries: u32) -> ExecutionResult {
        let mut r = ExecutionResult::skipped(SubtaskId::from_order(order), "");
        r.status = status;
        r.success = status == SubtaskStatus::Succeeded;
        r.retry_count = retries;
        r.note = None;
        r
    }

    #[test]
    fn parses_risk_lines() {
        let reply = "RISK [critical] (s3): Deploy credentials are not configured\n\
                     RISK [high] (all): Port 3000 may be taken | MITIGATION: use port 0\n\
                     - RISK [medium] (2): Schema may drift | MITIGATION: none\n\
                     Some prose that is not a risk";
        let risks = parse_risks(reply, &plan("g"));
        assert_eq!(risks.len(), 3);
        assert_eq!(risks[0].severity, Severity::Critical);
        assert_eq!(risks[0].target, Some(SubtaskId::from_order(3)));
        assert!(risks[0].blocks_execution());
        assert_eq!(risks[1].target, None);
        assert_eq!(risks[1].mitigation.as_deref(), Some("use port 0"));
        assert_eq!(risks[2].target, Some(SubtaskId::from_order(2)));
        assert_eq!(risks[2].mitigation, None);
    }

    #[test]
    fn unknown_target_applies_to_all() {
        let risks = parse_risks("RISK [low] (s9): thing | MITIGATION: check", &plan("g"));
        assert_eq!(risks[0].target, None);
    }

    #[test]
    fn mitigations_are_injected() {
        let base = plan("g");
        let risks = vec![
            RiskNote {
                text: "missing venv".into(),
                severity: Severity::High,
                mitigation: Some("create a virtualenv".into()),
                target: Some(SubtaskId::from_order(2)),
            },
            RiskNote {
                text: "secrets in logs".into(),
                severity: Severity::Medium,
                mitigation: Some("never print secrets".into()),
                target: None,
            },
        ];
        let mitigated = apply_mitigations(&base, &risks);
        assert_eq!(mitigated.miniplans[1].steps.len(), 2);
        assert_eq!(mitigated.miniplans[1].steps[0].instruction, "Mitigation: create a virtualenv");
        assert_eq!(mitigated.miniplans[0].steps.len(), 1);
        assert!(mitigated.miniplans.iter().all(|m| m.constraints == vec!["never print secrets"]));
        assert_eq!(mitigated.risks.len(), 2);
        // the input plan is untouched
        assert_eq!(base.miniplans[1].steps.len(), 1);
    }

    #[test]
    fn parses_lessons_and_normalizes_confidence() {
        let lessons = parse_lessons("LESSON (0.9): Pin versions\n2. LESSON (75%): Run migrations first\nNONE");
        assert_eq!(lessons.len(), 2);
        assert_eq!(lessons[0].text, "Pin versions");
        assert!((lessons[1].confidence - 0.75).abs() < 1e-6);
    }

    #[tokio::test]
    async fn reflect_before_failure_is_an_error() {
        let provider = Arc::new(
            ScriptedProvider::new().fail_on(PREFLIGHT_HEADER, ProviderError::Network("down".into())),
        );
        let err = Reflector::new(provider.router()).reflect_before(&plan("g")).await.unwrap_err();
        assert!(matches!(err, PlanningError::ReflectionFailed(_)));
    }

    #[tokio::test]
    async fn successful_recurring_run_is_a_workflow_candidate() {
        let provider = Arc::new(ScriptedProvider::new().on(POSTFLIGHT_HEADER, "LESSON (0.8): Seed the db"));
        let results: Vec<_> = (1..=3).map(|i| result(i, SubtaskStatus::Succeeded, 1)).collect();
        let post = Reflector::new(provider.router())
            .reflect_after(&plan("Build a todo app"), &results)
            .await;
        assert!(post.reflection.success);
        assert_eq!(post.reflection.success_rate, 1.0);
        assert!(post.reflection.workflow_candidate);
        assert_eq!(post.reflection.lessons.len(), 1);
        assert!(post.gap.is_none());
    }

    #[tokio::test]
    async fn two_retries_rule_out_a_workflow() {
        let provider = Arc::new(ScriptedProvider::new());
        let mut results: Vec<_> = (1..=3).map(|i| result(i, SubtaskStatus::Succeeded, 0)).collect();
        results[1].retry_count = 2;
        let post = Reflector::new(provider.router())
            .reflect_after(&plan("Build a todo app"), &results)
            .await;
        assert!(post.reflection.success);
        assert!(!post.reflection.workflow_candidate);
    }

    #[tokio::test]
    async fn partial_run_rate_counts_unrun_subtasks() {
        let provider = Arc::new(ScriptedProvider::new());
        let results = vec![
            result(1, SubtaskStatus::Succeeded, 0),
            result(2, SubtaskStatus::Failed, 2),
        ];
        let post = Reflector::new(provider.router())
            .reflect_after(&plan("Build a todo app"), &results)
            .await;
        assert!(!post.reflection.success);
        assert!((post.reflection.success_rate - 1.0 / 3.0).abs() < 1e-6);
        assert!(!post.reflection.workflow_candidate);
    }

    #[tokio::test]
    async fn lesson_failure_is_a_gap() {
        let provider = Arc::new(
            ScriptedProvider::new().fail_on(POSTFLIGHT_HEADER, ProviderError::Timeout("slow".into())),
        );
        let results: Vec<_> = (1..=3).map(|i| result(i, SubtaskStatus::Succeeded, 0)).collect();
        let post = Reflector::new(provider.router())
            .reflect_after(&plan("Rename the variables in utils.py"), &results)
            .await;
        assert!(post.reflection.success);
        assert!(post.reflection.lessons.is_empty());
        assert!(post.gap.is_some());
        assert!(!post.reflection.workflow_candidate);
    }

    #[tokio::test]
    async fn failed_lesson_pass_drops_the_workflow_candidate() {
        let provider = Arc::new(
            ScriptedProvider::new().fail_on(POSTFLIGHT_HEADER, ProviderError::Network("down".into())),
        );
        let results: Vec<_> = (1..=3).map(|i| result(i, SubtaskStatus::Succeeded, 0)).collect();
        let post = Reflector::new(provider.router())
            .reflect_after(&plan("Build a todo app"), &results)
            .await;
        assert!(post.reflection.success);
        assert!(post.gap.is_some());
        assert!(!post.reflection.workflow_candidate);
    }

    #[tokio::test]
    async fn stored_workflow_makes_goal_recurring() {
        let store = Arc::new(ExperienceStore::in_memory(StoreSettings::default()));
        let provider = Arc::new(ScriptedProvider::new());
        let goal = "Rename the variables in utils.py";
        let results: Vec<_> = (1..=3).map(|i| result(i, SubtaskStatus::Succeeded, 0)).collect();

        let reflector = Reflector::new(provider.router()).with_store(store.clone());
        let first = reflector.reflect_after(&plan(goal), &results).await;
        assert!(!first.reflection.workflow_candidate);

        // seed a workflow for the same goal through a candidate run
        let mut seeded = first.reflection.clone();
        seeded.workflow_candidate = true;
        store
            .save_workflow(
                &plan(goal),
                conductor_learning::RunOutcome {
                    reflection: &seeded,
                    results: &results,
                    approved: true,
                },
            )
            .await
            .unwrap();

        let second = reflector.reflect_after(&plan(goal), &results).await;
        assert!(second.reflection.workflow_candidate);
    }
}
