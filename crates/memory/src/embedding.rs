//! Text embedders for lessons and workflow goals.
//!
//! `HashEmbedder` is a deterministic feature-hashing embedder that needs no
//! network and produces stable vectors across runs, so persisted embeddings
//! stay comparable. `ProviderEmbedder` asks the language-model provider and
//! falls back to hashing when the provider cannot embed.

use async_trait::async_trait;
use conductor_core::error::IndexError;
use conductor_core::provider::{EmbeddingRequest, Provider};
use std::sync::Arc;
use tracing::warn;

use crate::vector::normalize;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;
}

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "to", "in", "on", "for", "with", "it", "is", "be", "this",
    "that", "my", "me", "i", "we", "you", "at", "by", "as",
];

/// Signed feature hashing over lowercase word unigrams and bigrams.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
            .map(String::from)
            .collect()
    }

    fn add_feature(&self, v: &mut [f32], feature: &str, weight: f32) {
        let h = fnv1a(feature.as_bytes());
        let slot = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        v[slot] += sign * weight;
    }

    /// Synchronous embedding; never fails.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        let tokens = Self::tokens(text);
        for token in &tokens {
            self.add_feature(&mut v, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut v, &format!("{} {}", pair[0], pair[1]), 0.5);
        }
        normalize(&mut v);
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        Ok(self.embed_text(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Embeds through a provider's embedding endpoint.
///
/// Any provider error falls back to the hashing embedder. Callers must not
/// mix the two vector spaces in one index, so a fallback is only taken when
/// the provider has never produced a vector; after that, errors propagate.
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
    fallback: HashEmbedder,
    provider_dimension: tokio::sync::OnceCell<usize>,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, fallback: HashEmbedder) -> Self {
        Self {
            provider,
            model: model.into(),
            fallback,
            provider_dimension: tokio::sync::OnceCell::new(),
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn name(&self) -> &str {
        "provider"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            inputs: vec![text.to_string()],
        };

        match self.provider.embed(request).await {
            Ok(resp) => {
                let v = resp
                    .embeddings
                    .into_iter()
                    .next()
                    .ok_or_else(|| IndexError::EmbeddingFailed("provider returned no vectors".into()))?;
                let _ = self.provider_dimension.set(v.len());
                Ok(v)
            }
            Err(e) if self.provider_dimension.get().is_none() => {
                warn!(provider = %self.provider.name(), error = %e, "Embedding via provider failed, using hash embedder");
                Ok(self.fallback.embed_text(text))
            }
            Err(e) => Err(IndexError::EmbeddingFailed(e.to_string())),
        }
    }
}
