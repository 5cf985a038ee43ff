//! Provider routing: which backend and which model answers a given call.
//!
//! `ProviderRouter` holds the configured backends by name. `StageRouter`
//! sits on top and picks a model per orchestration stage: the planning
//! stages can run on a dedicated planning model while execution-time calls
//! use the default one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use conductor_core::error::ProviderError;
use conductor_core::provider::{CompletionConstraints, Provider, ProviderRequest};
use tracing::debug;

use crate::fallback::FallbackProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider. Replaces any existing provider with the same name.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// All registered names, default first, the rest sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .providers
            .keys()
            .map(|s| s.as_str())
            .filter(|n| *n != self.default_provider)
            .collect();
        names.sort_unstable();
        if self.providers.contains_key(&self.default_provider) {
            names.insert(0, self.default_provider.as_str());
        }
        names
    }

    /// One provider that tries the default first, then every other backend.
    pub fn into_fallback_chain(self, timeout: Duration) -> Arc<dyn Provider> {
        let names: Vec<String> = self.list().into_iter().map(String::from).collect();
        let chain = names
            .iter()
            .filter_map(|n| self.providers.get(n).cloned())
            .fold(FallbackProvider::new("fallback"), |chain, p| chain.add(p, timeout));
        Arc::new(chain)
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &conductor_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));

        router.register(name.clone(), Arc::new(OpenAiCompatProvider::new(name, &base_url, &api_key)));
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        let base_url = default_base_url(&config.default_provider);
        router.register(
            config.default_provider.clone(),
            Arc::new(OpenAiCompatProvider::new(&config.default_provider, &base_url, &api_key)),
        );
    }

    router
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

/// The orchestration stage a language-model call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Decompose,
    MiniPlan,
    Preflight,
    Postflight,
    Execute,
}

impl Stage {
    /// Stages that shape the plan rather than carry it out.
    pub fn is_planning(self) -> bool {
        !matches!(self, Self::Execute)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Decompose => "decompose",
            Self::MiniPlan => "mini_plan",
            Self::Preflight => "preflight",
            Self::Postflight => "postflight",
            Self::Execute => "execute",
        };
        f.write_str(s)
    }
}

/// Chooses the model per stage and sends the prompt.
#[derive(Clone)]
pub struct StageRouter {
    provider: Arc<dyn Provider>,
    default_model: String,
    planning_model: Option<String>,
}

impl StageRouter {
    pub fn new(provider: Arc<dyn Provider>, default_model: impl Into<String>) -> Self {
        Self {
            provider,
            default_model: default_model.into(),
            planning_model: None,
        }
    }

    pub fn with_planning_model(mut self, model: impl Into<String>) -> Self {
        self.planning_model = Some(model.into());
        self
    }

    /// Build from config: every backend in one fallback chain, planning model from config.
    pub fn from_config(config: &conductor_config::AppConfig) -> Self {
        let provider = build_from_config(config)
            .into_fallback_chain(Duration::from_secs(config.provider_timeout_secs));
        let router = Self::new(provider, &config.default_model);
        match &config.planning_model {
            Some(model) => router.with_planning_model(model),
            None => router,
        }
    }

    pub fn model_for(&self, stage: Stage) -> &str {
        match (&self.planning_model, stage.is_planning()) {
            (Some(model), true) => model,
            _ => &self.default_model,
        }
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        self.provider.clone()
    }

    /// Send one prompt for `stage` and return the reply text.
    pub async fn complete(
        &self,
        stage: Stage,
        system: &str,
        prompt: &str,
        constraints: &CompletionConstraints,
    ) -> std::result::Result<String, ProviderError> {
        let model = self.model_for(stage);
        debug!(%stage, model, "Routing completion");
        let request = ProviderRequest::from_prompt(model, system, prompt, constraints);
        let response = self.provider.complete(request).await?;
        Ok(response.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_core::message::Message;
    use conductor_core::provider::ProviderResponse;

    /// Replies with the model it was asked for.
    struct ModelEcho;

    #[async_trait]
    impl Provider for ModelEcho {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(request.model.clone()),
                usage: None,
                model: request.model,
                metadata: serde_json::Map::new(),
            })
        }
    }

    #[test]
    fn router_register_and_lookup() {
        let mut router = ProviderRouter::new("openai");
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("sk-test")));
        router.register("ollama", Arc::new(OpenAiCompatProvider::ollama(None)));

        assert!(router.get("ollama").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default().is_some());
        assert_eq!(router.list(), vec!["openai", "ollama"]);
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config() {
        let config = conductor_config::AppConfig::default();
        let router = build_from_config(&config);
        assert!(router.default().is_some());
    }

    #[test]
    fn planning_stages_use_planning_model() {
        let router = StageRouter::new(Arc::new(ModelEcho), "gpt-4o-mini").with_planning_model("o3");
        assert_eq!(router.model_for(Stage::Decompose), "o3");
        assert_eq!(router.model_for(Stage::Postflight), "o3");
        assert_eq!(router.model_for(Stage::Execute), "gpt-4o-mini");

        let plain = StageRouter::new(Arc::new(ModelEcho), "gpt-4o");
        assert_eq!(plain.model_for(Stage::MiniPlan), "gpt-4o");
    }

    #[tokio::test]
    async fn complete_sends_stage_model() {
        let router = StageRouter::new(Arc::new(ModelEcho), "default").with_planning_model("planner");
        let text = router
            .complete(Stage::MiniPlan, "sys", "plan it", &CompletionConstraints::default())
            .await
            .unwrap();
        assert_eq!(text, "planner");
    }

    #[test]
    fn stage_router_from_config() {
        let mut config = conductor_config::AppConfig::default();
        config.planning_model = Some("o3-mini".into());
        let router = StageRouter::from_config(&config);
        assert_eq!(router.model_for(Stage::Decompose), "o3-mini");
        assert_eq!(router.provider().name(), "fallback");
    }
}
