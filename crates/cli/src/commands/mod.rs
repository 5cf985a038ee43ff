pub mod analyze;
pub mod classify;
pub mod config_cmd;
pub mod lessons;
pub mod run;
pub mod workflows;

use conductor_config::AppConfig;
use conductor_learning::{ExperienceStore, StoreSettings};
use conductor_memory::{Embedder, HashEmbedder, InMemoryVectorIndex, ProviderEmbedder};
use conductor_providers::StageRouter;
use std::sync::Arc;
use tracing::debug;

pub(crate) fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Open the persistent experience store described by `config`.
///
/// Embeddings come from the provider when `learning.embedding_model` is
/// set, otherwise from the local hashing embedder.
pub(crate) async fn open_store(
    config: &AppConfig,
    router: &StageRouter,
) -> Result<Arc<ExperienceStore>, Box<dyn std::error::Error>> {
    let hashing = HashEmbedder::new(config.learning.embedding_dimensions);
    let embedder: Arc<dyn Embedder> = match &config.learning.embedding_model {
        Some(model) => Arc::new(ProviderEmbedder::new(router.provider(), model.clone(), hashing)),
        None => Arc::new(hashing),
    };
    let path = config.learning.resolved_store_path();
    let store = ExperienceStore::open(
        StoreSettings::from(&config.learning),
        Arc::new(InMemoryVectorIndex::new()),
        embedder,
        path.clone(),
    )
    .await
    .map_err(|e| format!("Failed to open experience store at {}: {e}", path.display()))?;
    debug!(path = %path.display(), embedder = %embedder_name(config), "Experience store ready");
    Ok(Arc::new(store))
}

fn embedder_name(config: &AppConfig) -> &str {
    config.learning.embedding_model.as_deref().unwrap_or("hashing")
}

/// Shorten `text` to `max` chars for one-line display.
pub(crate) fn clip(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
