//! Tooling executor: the reference `ExecutionUnit`.
//!
//! Walks a request's steps in order. `shell` steps run through the
//! [`ShellRunner`]; any other tool is carried out by the language model with
//! the subtask, the step instruction and the request context as prompt. A
//! request without steps is answered by the language model directly.
//! The first failing step stops the walk and its error is returned for
//! classification.

use async_trait::async_trait;
use conductor_config::AppConfig;
use conductor_core::error::ExecutorError;
use conductor_core::executor::{ExecutionOutcome, ExecutionRequest, ExecutionUnit};
use conductor_core::plan::ToolStep;
use conductor_core::provider::CompletionConstraints;
use conductor_providers::{Stage, StageRouter};
use std::time::Duration;
use tracing::{debug, info};

use crate::shell::ShellRunner;

const SHELL_TOOL: &str = "shell";

const EXECUTE_SYSTEM: &str = "You are an execution unit carrying out one step of a larger plan. \
Do the step and reply with its result only. If the step cannot be done, reply with a line \
starting with 'ERROR:' followed by the reason.";

pub struct ToolingExecutor {
    shell: ShellRunner,
    router: Option<StageRouter>,
    constraints: CompletionConstraints,
}

impl ToolingExecutor {
    pub fn new(shell: ShellRunner) -> Self {
        Self {
            shell,
            router: None,
            constraints: CompletionConstraints::default(),
        }
    }

    pub fn with_router(mut self, router: StageRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_constraints(mut self, constraints: CompletionConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn from_config(config: &AppConfig, router: StageRouter) -> Self {
        Self::new(ShellRunner::from_config(&config.execution))
            .with_router(router)
            .with_constraints(CompletionConstraints {
                temperature: config.default_temperature,
                max_tokens: Some(config.default_max_tokens),
                stop: Vec::new(),
            })
    }

    fn prompt(request: &ExecutionRequest, step: Option<&ToolStep>, previous: &[String]) -> String {
        let mut prompt = format!("Task: {}\n", request.text);
        if let Some(step) = step {
            prompt.push_str(&format!("Step ({}): {}\n", step.tool, step.instruction));
        }
        if !request.context.is_empty() {
            prompt.push_str("\nContext:\n");
            for line in &request.context {
                prompt.push_str(&format!("- {line}\n"));
            }
        }
        if !previous.is_empty() {
            prompt.push_str("\nOutput of earlier steps:\n");
            prompt.push_str(&previous.join("\n"));
            prompt.push('\n');
        }
        prompt
    }

    async fn ask_model(&self, prompt: &str) -> Result<ExecutionOutcome, ExecutorError> {
        let router = self
            .router
            .as_ref()
            .ok_or_else(|| ExecutorError::Unavailable("no language model configured for non-shell steps".into()))?;

        match router
            .complete(Stage::Execute, EXECUTE_SYSTEM, prompt, &self.constraints)
            .await
        {
            Ok(reply) => {
                let reply = reply.trim();
                match reply.strip_prefix("ERROR:") {
                    Some(reason) => Ok(ExecutionOutcome::failure(reason.trim(), None)),
                    None => Ok(ExecutionOutcome::success(reply)),
                }
            }
            // Provider failures are work failures the classifier can read
            Err(e) => Ok(ExecutionOutcome::failure(e.to_string(), None)),
        }
    }

    async fn run_step(
        &self,
        request: &ExecutionRequest,
        step: &ToolStep,
        previous: &[String],
    ) -> Result<ExecutionOutcome, ExecutorError> {
        if !request.available_tools.is_empty() && !request.available_tools.iter().any(|t| t == &step.tool) {
            return Err(ExecutorError::InvalidRequest(format!(
                "tool '{}' is not available for this request",
                step.tool
            )));
        }

        if step.tool == SHELL_TOOL {
            let timeout = step.timeout_secs.map(Duration::from_secs);
            return Ok(self.shell.run(&step.instruction, timeout).await);
        }
        self.ask_model(&Self::prompt(request, Some(step), previous)).await
    }
}

#[async_trait]
impl ExecutionUnit for ToolingExecutor {
    fn name(&self) -> &str {
        "tooling"
    }

    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutorError> {
        if request.steps.is_empty() {
            debug!(subtask_id = %request.subtask_id, "No steps, answering directly");
            return self.ask_model(&Self::prompt(&request, None, &[])).await;
        }

        let mut outputs: Vec<String> = Vec::with_capacity(request.steps.len());
        for (i, step) in request.steps.iter().enumerate() {
            debug!(subtask_id = %request.subtask_id, step = i + 1, tool = %step.tool, "Running step");
            let outcome = self.run_step(&request, step, &outputs).await?;
            if !outcome.is_success() {
                info!(subtask_id = %request.subtask_id, step = i + 1, tool = %step.tool, "Step failed");
                outputs.push(outcome.output);
                return Ok(ExecutionOutcome {
                    output: outputs.join("\n"),
                    artifacts: Vec::new(),
                    raw_error: outcome.raw_error,
                    exit_code: outcome.exit_code,
                });
            }
            outputs.push(outcome.output);
        }

        Ok(ExecutionOutcome::success(
            outputs.into_iter().filter(|o| !o.is_empty()).collect::<Vec<_>>().join("\n"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::CommandPolicy;
    use conductor_core::error::ProviderError;
    use conductor_core::message::Message;
    use conductor_core::plan::SubtaskId;
    use conductor_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
    use std::sync::{Arc, Mutex};

    /// Replies with a fixed string and records prompts.
    struct FixedProvider {
        reply: Result<String, ProviderError>,
        prompts: Mutex<Vec<String>>,
    }

    impl FixedProvider {
        fn new(reply: Result<String, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.prompts.lock().unwrap().push(request.prompt().to_string());
            let content = self.reply.clone()?;
            Ok(ProviderResponse {
                message: Message::assistant(content),
                usage: Some(Usage::default()),
                model: request.model,
                metadata: Default::default(),
            })
        }
    }

    fn executor(provider: Arc<FixedProvider>) -> ToolingExecutor {
        let shell = ShellRunner::new(CommandPolicy::new(vec![], vec!["sudo".into()]), Duration::from_secs(10));
        ToolingExecutor::new(shell).with_router(StageRouter::new(provider, "test-model"))
    }

    #[tokio::test]
    async fn no_steps_asks_model() {
        let provider = FixedProvider::new(Ok("4".into()));
        let unit = executor(provider.clone());
        let outcome = unit
            .run(ExecutionRequest::new(SubtaskId::direct(), "What is 2+2?"))
            .await
            .unwrap();
        assert_eq!(outcome.output, "4");
        assert!(provider.prompts.lock().unwrap()[0].contains("What is 2+2?"));
    }

    #[tokio::test]
    async fn model_error_prefix_is_failure() {
        let unit = executor(FixedProvider::new(Ok("ERROR: cannot reach registry".into())));
        let outcome = unit
            .run(ExecutionRequest::new(SubtaskId::from_order(1), "install"))
            .await
            .unwrap();
        assert_eq!(outcome.raw_error.as_deref(), Some("cannot reach registry"));
    }

    #[tokio::test]
    async fn provider_failure_becomes_outcome() {
        let unit = executor(FixedProvider::new(Err(ProviderError::Timeout("request timed out".into()))));
        let outcome = unit
            .run(ExecutionRequest::new(SubtaskId::from_order(1), "anything"))
            .await
            .unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.raw_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn context_reaches_prompt() {
        let provider = FixedProvider::new(Ok("done".into()));
        let unit = executor(provider.clone());
        let request = ExecutionRequest::new(SubtaskId::from_order(2), "Write docs")
            .with_steps(vec![ToolStep::new("llm", "draft README")])
            .with_context(["Lesson: keep it short".to_string()]);
        unit.run(request).await.unwrap();
        let prompt = provider.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("draft README"));
        assert!(prompt.contains("keep it short"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_steps_run_in_order_and_stop_on_failure() {
        let unit = executor(FixedProvider::new(Ok("unused".into())));
        let request = ExecutionRequest::new(SubtaskId::from_order(1), "setup").with_steps(vec![
            ToolStep::new("shell", "echo one"),
            ToolStep::new("shell", "echo oops >&2; exit 2"),
            ToolStep::new("shell", "echo never"),
        ]);
        let outcome = unit.run(request).await.unwrap();
        assert_eq!(outcome.exit_code, Some(2));
        assert_eq!(outcome.raw_error.as_deref(), Some("oops"));
        assert!(outcome.output.contains("one"));
        assert!(!outcome.output.contains("never"));
    }

    #[tokio::test]
    async fn blocked_shell_step_is_permission_failure() {
        let unit = executor(FixedProvider::new(Ok("unused".into())));
        let request = ExecutionRequest::new(SubtaskId::from_order(1), "admin")
            .with_steps(vec![ToolStep::new("shell", "sudo apt-get install x")]);
        let outcome = unit.run(request).await.unwrap();
        assert_eq!(outcome.exit_code, Some(126));
    }

    #[tokio::test]
    async fn unavailable_tool_is_invalid_request() {
        let unit = executor(FixedProvider::new(Ok("unused".into())));
        let request = ExecutionRequest::new(SubtaskId::from_order(1), "browse")
            .with_steps(vec![ToolStep::new("browser", "open page")])
            .with_tools(vec!["shell".into(), "llm".into()]);
        assert!(matches!(
            unit.run(request).await.unwrap_err(),
            ExecutorError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn llm_step_without_router_is_unavailable() {
        let shell = ShellRunner::new(CommandPolicy::default(), Duration::from_secs(5));
        let unit = ToolingExecutor::new(shell);
        let request = ExecutionRequest::new(SubtaskId::from_order(1), "think")
            .with_steps(vec![ToolStep::new("llm", "plan")]);
        assert!(matches!(unit.run(request).await.unwrap_err(), ExecutorError::Unavailable(_)));
    }
}
