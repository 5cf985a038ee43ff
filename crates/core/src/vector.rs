//! VectorIndex trait: nearest-neighbour search over embeddings.
//!
//! The experience store keeps lessons and workflows addressable by
//! embedding. The index only knows ids, vectors and a little metadata; the
//! store owns the records themselves.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::IndexError;

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
}

/// Metadata filter applied before ranking.
///
/// An entry passes when every key in `equals` is present with the same value
/// and, if `any_of` is non-empty, its value for `any_of.0` is in `any_of.1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorFilter {
    #[serde(default)]
    pub equals: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_of: Option<(String, Vec<String>)>,

    /// Hits scoring below this are dropped.
    #[serde(default)]
    pub min_score: Option<f32>,
}

impl VectorFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn any_of(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.any_of = Some((key.into(), values));
        self
    }

    pub fn min_score(mut self, score: f32) -> Self {
        self.min_score = Some(score);
        self
    }

    pub fn matches(&self, metadata: &HashMap<String, String>) -> bool {
        let equals_ok = self
            .equals
            .iter()
            .all(|(k, v)| metadata.get(k).is_some_and(|m| m == v));
        let any_ok = match &self.any_of {
            Some((key, values)) => metadata.get(key).is_some_and(|m| values.contains(m)),
            None => true,
        };
        equals_ok && any_ok
    }
}

/// The vector index collaborator.
///
/// Implementations: in-memory brute-force cosine index (default), external
/// vector databases.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace the vector stored under `id`.
    async fn upsert(
        &self,
        id: &str,
        embedding: Vec<f32>,
        metadata: HashMap<String, String>,
    ) -> std::result::Result<(), IndexError>;

    /// Best `top_k` matches passing `filter`, highest score first.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &VectorFilter,
    ) -> std::result::Result<Vec<VectorMatch>, IndexError>;

    /// Remove `id`; returns whether it existed.
    async fn remove(&self, id: &str) -> std::result::Result<bool, IndexError>;

    async fn len(&self) -> std::result::Result<usize, IndexError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(VectorFilter::new().matches(&HashMap::new()));
    }

    #[test]
    fn equals_filter() {
        let f = VectorFilter::new().eq("kind", "lesson");
        assert!(f.matches(&meta(&[("kind", "lesson"), ("status", "approved")])));
        assert!(!f.matches(&meta(&[("kind", "workflow")])));
        assert!(!f.matches(&HashMap::new()));
    }

    #[test]
    fn any_of_filter() {
        let f = VectorFilter::new()
            .eq("status", "approved")
            .any_of("scope", vec!["agent".into(), "platform".into()]);
        assert!(f.matches(&meta(&[("status", "approved"), ("scope", "platform")])));
        assert!(!f.matches(&meta(&[("status", "approved"), ("scope", "user")])));
        assert!(!f.matches(&meta(&[("status", "proposed"), ("scope", "agent")])));
    }
}
