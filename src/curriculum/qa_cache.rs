//! Memoized question→answer cache with near-duplicate suppression.
//!
//! An exact key hit returns the stored answer. Otherwise the question index
//! is searched; a neighbor within the closeness threshold is treated as the
//! same question, so paraphrases do not trigger a second oracle call.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::CoreError;
use crate::library::VectorIndex;
use crate::oracle::{AnswerOracle, Embedder};
use crate::storage;

/// Cosine distance below which two questions count as the same question.
const NEAR_DUPLICATE_DISTANCE: f32 = 0.05;

pub struct QaCache {
    dir: PathBuf,
    entries: BTreeMap<String, String>,
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for QaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QaCache")
            .field("dir", &self.dir)
            .field("entries", &self.entries)
            .field("index", &self.index)
            .field("embedder", &"<dyn Embedder>")
            .finish()
    }
}

impl QaCache {
    /// Open the cache under `<root>/curriculum`, enforcing the consistency
    /// gate when resuming.
    pub async fn open(
        root: &Path,
        resume: bool,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, CoreError> {
        let dir = root.join("curriculum");
        tokio::fs::create_dir_all(&dir).await?;

        let entries_path = dir.join("qa_cache.json");
        let entries: BTreeMap<String, String> = if resume && entries_path.exists() {
            storage::load_json(&entries_path).await?
        } else {
            BTreeMap::new()
        };
        let index = VectorIndex::open(dir.join("qa_index.json"), resume).await?;

        let cache = Self {
            dir,
            entries,
            index,
            embedder,
        };
        cache.check_synced()?;
        Ok(cache)
    }

    fn check_synced(&self) -> Result<(), CoreError> {
        if self.index.len() != self.entries.len() {
            return Err(CoreError::Consistency {
                store: "qa-cache".to_string(),
                index_len: self.index.len(),
                entry_len: self.entries.len(),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Answer `question`, consulting the cache before the oracle.
    pub async fn answer(
        &mut self,
        question: &str,
        oracle: &dyn AnswerOracle,
    ) -> Result<String, CoreError> {
        if let Some(answer) = self.entries.get(question) {
            return Ok(answer.clone());
        }

        let embedding = self.embedder.embed(question).await.map_err(CoreError::from)?;

        if !self.index.is_empty() {
            let hits = self.index.search(&embedding, 1);
            if let Some((cached_question, distance)) = hits.into_iter().next() {
                if distance < NEAR_DUPLICATE_DISTANCE {
                    tracing::info!(
                        "question matched cached near-duplicate (distance {:.4})",
                        distance
                    );
                    return self
                        .entries
                        .get(&cached_question)
                        .cloned()
                        .ok_or_else(|| CoreError::Consistency {
                            store: "qa-cache".to_string(),
                            index_len: self.index.len(),
                            entry_len: self.entries.len(),
                        });
                }
            }
        }

        let answer = oracle.ask(question).await.map_err(CoreError::from)?;

        // Map and index update as one logical unit.
        self.entries.insert(question.to_string(), answer.clone());
        self.index.add(question.to_string(), embedding);
        self.check_synced()?;
        storage::dump_json(&self.dir.join("qa_cache.json"), &self.entries).await?;
        self.index.persist().await?;

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::HashEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingOracle {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AnswerOracle for CountingOracle {
        async fn ask(&self, question: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("answer to: {question}"))
        }
    }

    #[tokio::test]
    async fn exact_hit_skips_oracle() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = QaCache::open(dir.path(), false, Arc::new(HashEmbedder::default()))
            .await
            .unwrap();
        let oracle = CountingOracle {
            calls: AtomicUsize::new(0),
        };

        let first = cache.answer("How do lists work?", &oracle).await.unwrap();
        let second = cache.answer("How do lists work?", &oracle).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    /// Embeds every text identically, so any later question is a
    /// near-duplicate of the first.
    struct ConstantEmbedder;

    #[async_trait]
    impl crate::oracle::Embedder for ConstantEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    #[tokio::test]
    async fn paraphrase_returns_cached_answer_without_oracle_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = QaCache::open(dir.path(), false, Arc::new(ConstantEmbedder))
            .await
            .unwrap();
        let oracle = CountingOracle {
            calls: AtomicUsize::new(0),
        };

        let first = cache.answer("How do I sort a list?", &oracle).await.unwrap();
        let second = cache
            .answer("How would one sort a list?", &oracle)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn distinct_questions_each_ask_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = QaCache::open(dir.path(), false, Arc::new(HashEmbedder::default()))
            .await
            .unwrap();
        let oracle = CountingOracle {
            calls: AtomicUsize::new(0),
        };

        cache.answer("What is recursion?", &oracle).await.unwrap();
        cache
            .answer("How does sorting stability matter?", &oracle)
            .await
            .unwrap();

        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn resume_restores_cache() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = CountingOracle {
            calls: AtomicUsize::new(0),
        };
        {
            let mut cache = QaCache::open(dir.path(), false, Arc::new(HashEmbedder::default()))
                .await
                .unwrap();
            cache.answer("What is a closure?", &oracle).await.unwrap();
        }

        let mut cache = QaCache::open(dir.path(), true, Arc::new(HashEmbedder::default()))
            .await
            .unwrap();
        let answer = cache.answer("What is a closure?", &oracle).await.unwrap();
        assert_eq!(answer, "answer to: What is a closure?");
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn desynced_snapshots_fail_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = QaCache::open(dir.path(), false, Arc::new(HashEmbedder::default()))
                .await
                .unwrap();
            let oracle = CountingOracle {
                calls: AtomicUsize::new(0),
            };
            cache.answer("q1", &oracle).await.unwrap();
            cache.answer("q2", &oracle).await.unwrap();
        }

        let cache_path = dir.path().join("curriculum").join("qa_cache.json");
        let mut entries: BTreeMap<String, String> =
            serde_json::from_slice(&std::fs::read(&cache_path).unwrap()).unwrap();
        entries.remove("q1");
        std::fs::write(&cache_path, serde_json::to_vec_pretty(&entries).unwrap()).unwrap();

        let err = QaCache::open(dir.path(), true, Arc::new(HashEmbedder::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Consistency { .. }));
    }
}
