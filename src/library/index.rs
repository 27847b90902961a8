//! Persisted embedding index with cosine-distance search.
//!
//! Rows are held in memory and snapshotted to JSON; the owning store is
//! responsible for keeping row count in lockstep with its metadata map.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRow {
    key: String,
    embedding: Vec<f32>,
}

/// An in-memory vector index with a JSON snapshot on disk.
#[derive(Debug)]
pub struct VectorIndex {
    path: PathBuf,
    rows: Vec<IndexRow>,
}

impl VectorIndex {
    /// Open an index at `path`, loading the snapshot when `resume` is set
    /// and one exists.
    pub async fn open(path: PathBuf, resume: bool) -> Result<Self, CoreError> {
        let rows = if resume && path.exists() {
            storage::load_json(&path).await?
        } else {
            Vec::new()
        };
        Ok(Self { path, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Add a row. The caller persists via [`VectorIndex::persist`] together
    /// with its metadata map.
    pub fn add(&mut self, key: String, embedding: Vec<f32>) {
        self.rows.push(IndexRow { key, embedding });
    }

    /// Snapshot the index to disk.
    pub async fn persist(&self) -> Result<(), CoreError> {
        storage::dump_json(&self.path, &self.rows).await
    }

    /// The `k` nearest rows to `query` by cosine distance, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .rows
            .iter()
            .map(|row| (row.key.clone(), cosine_distance(query, &row.embedding)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Cosine distance in [0, 2]; degenerate vectors are treated as maximally
/// distant from everything.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_orders_by_distance() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = VectorIndex::open(dir.path().join("index.json"), false)
            .await
            .unwrap();

        index.add("x".to_string(), vec![1.0, 0.0]);
        index.add("y".to_string(), vec![0.0, 1.0]);
        index.add("xy".to_string(), vec![1.0, 1.0]);

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "x");
        assert!(hits[0].1 < 1e-6);
        assert_eq!(hits[1].0, "xy");
    }

    #[tokio::test]
    async fn persists_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut index = VectorIndex::open(path.clone(), false).await.unwrap();
        index.add("a".to_string(), vec![0.5, 0.5]);
        index.persist().await.unwrap();

        let resumed = VectorIndex::open(path.clone(), true).await.unwrap();
        assert_eq!(resumed.len(), 1);

        let fresh = VectorIndex::open(path, false).await.unwrap();
        assert!(fresh.is_empty());
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let d = cosine_distance(&[0.3, 0.7], &[0.3, 0.7]);
        assert!(d.abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
