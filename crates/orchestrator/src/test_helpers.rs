//! Shared test doubles for orchestrator tests.

use async_trait::async_trait;
use conductor_core::error::{ExecutorError, ProviderError};
use conductor_core::executor::{ExecutionOutcome, ExecutionRequest, ExecutionUnit};
use conductor_core::message::Message;
use conductor_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use conductor_providers::StageRouter;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A mock provider that routes on prompt content.
///
/// Each rule is `(needle, reply)`; the first rule whose needle appears in
/// the system or user message answers. Unmatched prompts get the default.
pub struct ScriptedProvider {
    rules: Vec<(String, Result<String, ProviderError>)>,
    default: Result<String, ProviderError>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default: Ok(String::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), Ok(reply.to_string())));
        self
    }

    pub fn fail_on(mut self, needle: &str, error: ProviderError) -> Self {
        self.rules.push((needle.to_string(), Err(error)));
        self
    }

    pub fn otherwise(mut self, reply: &str) -> Self {
        self.default = Ok(reply.to_string());
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// A stage router over this provider.
    pub fn router(self: &Arc<Self>) -> StageRouter {
        StageRouter::new(self.clone(), "mock-model")
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
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
            .unwrap_or_else(|| self.default.clone())?;

        Ok(make_text_response(&reply))
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
        metadata: serde_json::Map::new(),
    }
}

/// An execution unit that returns scripted outcomes in sequence and
/// records every request. Once the script runs out it keeps succeeding.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Result<ExecutionOutcome, ExecutorError>>>,
    requests: Mutex<Vec<ExecutionRequest>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<Result<ExecutionOutcome, ExecutorError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionUnit for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutorError> {
        let output = format!("done: {}", request.text);
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ExecutionOutcome::success(output)))
    }
}

/// An execution unit whose outcome depends on the subtask text.
pub struct RoutedExecutor {
    rules: Vec<(String, ExecutionOutcome)>,
    requests: Mutex<Vec<ExecutionRequest>>,
}

impl RoutedExecutor {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests whose text contains `needle` get `outcome`.
    pub fn on(mut self, needle: &str, outcome: ExecutionOutcome) -> Self {
        self.rules.push((needle.to_string(), outcome));
        self
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionUnit for RoutedExecutor {
    fn name(&self) -> &str {
        "routed"
    }

    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, ExecutorError> {
        let outcome = self
            .rules
            .iter()
            .find(|(needle, _)| request.text.contains(needle.as_str()))
            .map(|(_, o)| o.clone())
            .unwrap_or_else(|| ExecutionOutcome::success(format!("done: {}", request.text)));
        self.requests.lock().unwrap().push(request);
        Ok(outcome)
    }
}
