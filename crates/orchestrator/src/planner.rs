//! Parallel planner: one independent mini-plan per subtask.
//!
//! Every subtask gets its own planning call, all issued concurrently. A
//! call sees the goal and its own subtask, nothing about siblings. A failed
//! call flags that one subtask for clarification; the others are unaffected.

use conductor_config::AppConfig;
use conductor_core::plan::{MiniPlan, SubtaskDescriptor, ToolStep};
use conductor_core::provider::CompletionConstraints;
use conductor_providers::{Stage, StageRouter};
use futures::future::join_all;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

static STEP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]|[-*])?\s*([A-Za-z][\w-]*)\s*:\s*(.+?)\s*$")
        .expect("step line regex should be valid")
});

static TIMEOUT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*timeout\s*:\s*(\d+)\s*s?\s*\)").expect("timeout marker regex should be valid")
});

const SYSTEM_PROMPT: &str = "You plan the concrete tool steps for a single subtask. \
You do not know about any other subtask.";

/// Header every mini-plan prompt starts with.
pub const MINIPLAN_HEADER: &str = "List the tool steps for this subtask";

const FALLBACK_TOOL: &str = "llm";

pub struct Planner {
    router: StageRouter,
    available_tools: Vec<String>,
    constraints: CompletionConstraints,
}

impl Planner {
    pub fn new(router: StageRouter, available_tools: Vec<String>) -> Self {
        Self {
            router,
            available_tools,
            constraints: CompletionConstraints::structured(1024),
        }
    }

    pub fn from_config(config: &AppConfig, router: StageRouter) -> Self {
        Self::new(router, config.execution.available_tools.clone())
            .with_constraints(CompletionConstraints::structured(config.planning.max_tokens))
    }

    pub fn with_constraints(mut self, constraints: CompletionConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Plan every subtask concurrently. Output order follows `subtasks`.
    pub async fn plan_all(&self, goal: &str, subtasks: &[SubtaskDescriptor]) -> Vec<MiniPlan> {
        join_all(subtasks.iter().map(|s| self.plan_one(goal, s))).await
    }

    pub async fn plan_one(&self, goal: &str, subtask: &SubtaskDescriptor) -> MiniPlan {
        let prompt = self.prompt(goal, subtask);
        match self
            .router
            .complete(Stage::MiniPlan, SYSTEM_PROMPT, &prompt, &self.constraints)
            .await
        {
            Ok(reply) => {
                let steps = self.parse_steps(&reply);
                if steps.is_empty() {
                    warn!(subtask_id = %subtask.id, "Planner returned no steps");
                    return MiniPlan::needs_clarification(subtask.id.clone(), "planner returned no steps");
                }
                debug!(subtask_id = %subtask.id, steps = steps.len(), "Mini-plan ready");
                MiniPlan::new(subtask.id.clone(), steps)
            }
            Err(e) => {
                warn!(subtask_id = %subtask.id, error = %e, "Mini-plan request failed");
                MiniPlan::needs_clarification(subtask.id.clone(), format!("planning failed: {e}"))
            }
        }
    }

    fn prompt(&self, goal: &str, subtask: &SubtaskDescriptor) -> String {
        format!(
            "{MINIPLAN_HEADER}.\n\n\
             Overall goal: {goal}\n\
             Subtask: {}\n\n\
             Available tools: {}\n\
             Answer with one `tool: instruction` line per step, in order. \
             Add `(timeout: 120)` to a step that needs longer than usual.",
            subtask.text,
            self.available_tools.join(", ")
        )
    }

    /// `tool: instruction` lines; tools outside the available set become
    /// language-model steps. A reply with content but no such line is
    /// kept as one language-model step.
    pub(crate) fn parse_steps(&self, reply: &str) -> Vec<ToolStep> {
        let steps: Vec<ToolStep> = reply
            .lines()
            .filter_map(|line| {
                let caps = STEP_LINE.captures(line)?;
                let tool = caps[1].to_ascii_lowercase();
                let mut instruction = caps[2].to_string();

                let timeout_secs = TIMEOUT_MARKER
                    .captures(&instruction)
                    .and_then(|c| c[1].parse::<u64>().ok());
                instruction = TIMEOUT_MARKER.replace_all(&instruction, "").trim().to_string();
                let instruction = instruction.trim_matches('`').trim().to_string();
                if instruction.is_empty() {
                    return None;
                }

                let mut step = if self.is_available(&tool) {
                    ToolStep::new(tool, instruction)
                } else {
                    ToolStep::new(FALLBACK_TOOL, format!("{tool}: {instruction}"))
                };
                step.timeout_secs = timeout_secs;
                Some(step)
            })
            .collect();

        if steps.is_empty() && !reply.trim().is_empty() {
            return vec![ToolStep::new(FALLBACK_TOOL, reply.trim())];
        }
        steps
    }

    fn is_available(&self, tool: &str) -> bool {
        self.available_tools.iter().any(|t| t == tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;
    use conductor_core::error::ProviderError;
    use std::sync::Arc;

    fn planner(provider: &Arc<ScriptedProvider>) -> Planner {
        Planner::new(provider.router(), vec!["shell".into(), "llm".into()])
    }

    #[test]
    fn parses_tool_lines() {
        let provider = Arc::new(ScriptedProvider::new());
        let steps = planner(&provider).parse_steps(
            "1. shell: `pip install flask`\n2. llm: write app.py (timeout: 90)\n- shell: python app.py",
        );
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], ToolStep::new("shell", "pip install flask"));
        assert_eq!(steps[1].instruction, "write app.py");
        assert_eq!(steps[1].timeout_secs, Some(90));
        assert_eq!(steps[2].tool, "shell");
    }

    #[test]
    fn unknown_tools_become_llm_steps() {
        let provider = Arc::new(ScriptedProvider::new());
        let steps = planner(&provider).parse_steps("browser: open the docs");
        assert_eq!(steps, vec![ToolStep::new("llm", "browser: open the docs")]);
    }

    #[test]
    fn free_text_becomes_one_llm_step() {
        let provider = Arc::new(ScriptedProvider::new());
        let steps = planner(&provider).parse_steps("Just write the README");
        assert_eq!(steps, vec![ToolStep::new("llm", "Just write the README")]);
    }

    #[tokio::test]
    async fn each_call_sees_only_its_own_subtask() {
        let provider = Arc::new(ScriptedProvider::new().otherwise("llm: do it"));
        let subtasks = vec![
            SubtaskDescriptor::new(1, "Design database schema"),
            SubtaskDescriptor::new(2, "Build frontend"),
        ];
        let plans = planner(&provider).plan_all("todo app", &subtasks).await;
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].subtask_id, subtasks[1].id);

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 2);
        for prompt in &prompts {
            let schema = prompt.contains("Design database schema");
            let frontend = prompt.contains("Build frontend");
            assert!(schema != frontend, "prompt leaked a sibling subtask: {prompt}");
        }
    }

    #[tokio::test]
    async fn failure_flags_only_that_subtask() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .fail_on("Build frontend", ProviderError::Timeout("slow".into()))
                .otherwise("shell: echo ok"),
        );
        let subtasks = vec![
            SubtaskDescriptor::new(1, "Design database schema"),
            SubtaskDescriptor::new(2, "Build frontend"),
        ];
        let plans = planner(&provider).plan_all("todo app", &subtasks).await;
        assert!(plans[0].needs_clarification.is_none());
        assert_eq!(plans[0].steps.len(), 1);
        assert!(plans[1].needs_clarification.is_some());
        assert!(plans[1].steps.is_empty());
    }

    #[tokio::test]
    async fn empty_reply_needs_clarification() {
        let provider = Arc::new(ScriptedProvider::new().otherwise("   "));
        let plan = planner(&provider)
            .plan_one("goal", &SubtaskDescriptor::new(1, "x"))
            .await;
        assert!(plan.needs_clarification.is_some());
    }
}
