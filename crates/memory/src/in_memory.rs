//! In-memory vector index: brute-force cosine search over a HashMap.

use async_trait::async_trait;
use conductor_core::error::IndexError;
use conductor_core::vector::{VectorFilter, VectorIndex, VectorMatch};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::vector::rank;

struct IndexedVector {
    embedding: Vec<f32>,
    metadata: HashMap<String, String>,
}

/// An in-memory index keyed by id.
///
/// The first upsert fixes the dimension; later vectors must match it.
pub struct InMemoryVectorIndex {
    entries: Arc<RwLock<HashMap<String, IndexedVector>>>,
    dimension: Arc<RwLock<Option<usize>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            dimension: Arc::new(RwLock::new(None)),
        }
    }

    /// Index with a fixed dimension from the start.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            dimension: Arc::new(RwLock::new(Some(dimension))),
        }
    }

    async fn check_dimension(&self, len: usize) -> Result<(), IndexError> {
        let mut dimension = self.dimension.write().await;
        match *dimension {
            Some(expected) if expected != len => Err(IndexError::DimensionMismatch {
                expected,
                actual: len,
            }),
            Some(_) => Ok(()),
            None => {
                *dimension = Some(len);
                Ok(())
            }
        }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn upsert(
        &self,
        id: &str,
        embedding: Vec<f32>,
        metadata: HashMap<String, String>,
    ) -> Result<(), IndexError> {
        if embedding.is_empty() {
            return Err(IndexError::EmbeddingFailed(format!("empty embedding for '{id}'")));
        }
        self.check_dimension(embedding.len()).await?;
        self.entries
            .write()
            .await
            .insert(id.to_string(), IndexedVector { embedding, metadata });
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>, IndexError> {
        if let Some(expected) = *self.dimension.read().await
            && expected != embedding.len()
        {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }

        let entries = self.entries.read().await;
        let mut candidates: Vec<(&str, &[f32])> = entries
            .iter()
            .filter(|(_, v)| filter.matches(&v.metadata))
            .map(|(id, v)| (id.as_str(), v.embedding.as_slice()))
            .collect();
        // HashMap order is arbitrary; sort so ties are stable
        candidates.sort_by(|a, b| a.0.cmp(b.0));

        Ok(rank(candidates, embedding, top_k, filter.min_score.unwrap_or(f32::MIN)))
    }

    async fn remove(&self, id: &str) -> Result<bool, IndexError> {
        Ok(self.entries.write().await.remove(id).is_some())
    }

    async fn len(&self) -> Result<usize, IndexError> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn upsert_query_remove() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", vec![1.0, 0.0], meta(&[("kind", "lesson")])).await.unwrap();
        index.upsert("b", vec![0.0, 1.0], meta(&[("kind", "lesson")])).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 2);

        let hits = index.query(&[1.0, 0.1], 1, &VectorFilter::new()).await.unwrap();
        assert_eq!(hits[0].id, "a");

        assert!(index.remove("a").await.unwrap());
        assert!(!index.remove("a").await.unwrap());
        assert_eq!(index.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_existing() {
        let index = InMemoryVectorIndex::new();
        index.upsert("a", vec![1.0, 0.0], HashMap::new()).await.unwrap();
        index.upsert("a", vec![0.0, 1.0], HashMap::new()).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        let hits = index.query(&[0.0, 1.0], 5, &VectorFilter::new()).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn filter_and_min_score_apply() {
        let index = InMemoryVectorIndex::new();
        index.upsert("approved", vec![1.0, 0.0], meta(&[("status", "approved")])).await.unwrap();
        index.upsert("proposed", vec![1.0, 0.0], meta(&[("status", "proposed")])).await.unwrap();
        index.upsert("far", vec![0.0, 1.0], meta(&[("status", "approved")])).await.unwrap();

        let filter = VectorFilter::new().eq("status", "approved").min_score(0.5);
        let hits = index.query(&[1.0, 0.0], 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "approved");
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected() {
        let index = InMemoryVectorIndex::with_dimension(3);
        let err = index.upsert("a", vec![1.0, 0.0], HashMap::new()).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 3, actual: 2 }));

        let err = index.query(&[1.0], 1, &VectorFilter::new()).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn empty_embedding_rejected() {
        let index = InMemoryVectorIndex::new();
        assert!(index.upsert("a", vec![], HashMap::new()).await.is_err());
    }
}
