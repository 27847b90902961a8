//! Completed/failed task ledgers with de-duplication rules.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::storage;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    tasks: Vec<String>,
}

/// Ordered lists of completed and failed task descriptions. `failed` may
/// contain repeated entries accumulated before a task eventually succeeds.
pub struct TaskLedger {
    dir: PathBuf,
    completed: Vec<String>,
    failed: Vec<String>,
}

impl TaskLedger {
    pub async fn open(root: &Path, resume: bool) -> Result<Self, CoreError> {
        let dir = root.join("curriculum");
        tokio::fs::create_dir_all(&dir).await?;

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        if resume {
            let completed_path = dir.join("completed_tasks.json");
            if completed_path.exists() {
                let file: LedgerFile = storage::load_json(&completed_path).await?;
                completed = file.tasks;
            }
            let failed_path = dir.join("failed_tasks.json");
            if failed_path.exists() {
                let file: LedgerFile = storage::load_json(&failed_path).await?;
                failed = file.tasks;
            }
        }

        Ok(Self {
            dir,
            completed,
            failed,
        })
    }

    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    /// Record one outcome, then clean up and persist both lists.
    pub async fn record(&mut self, task: &str, success: bool) -> Result<(), CoreError> {
        if success {
            tracing::info!("completed task: {task}");
            self.completed.push(task.to_string());
        } else {
            tracing::info!("failed task, skipping to next: {task}");
            self.failed.push(task.to_string());
        }
        tracing::info!(
            "{} completed tasks, {} failed tasks",
            self.completed.len(),
            self.failed.len()
        );
        self.clean_up();
        self.persist().await
    }

    /// Deduplicate `completed` (first occurrence wins, order preserved) and
    /// drop every completed task from `failed`.
    fn clean_up(&mut self) {
        let mut deduped: Vec<String> = Vec::with_capacity(self.completed.len());
        for task in &self.completed {
            if !deduped.contains(task) {
                deduped.push(task.clone());
            }
        }
        self.failed.retain(|task| !deduped.contains(task));
        self.completed = deduped;
    }

    async fn persist(&self) -> Result<(), CoreError> {
        storage::dump_json(
            &self.dir.join("completed_tasks.json"),
            &LedgerFile {
                tasks: self.completed.clone(),
            },
        )
        .await?;
        storage::dump_json(
            &self.dir.join("failed_tasks.json"),
            &LedgerFile {
                tasks: self.failed.clone(),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cleanup_dedupes_and_reconciles() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = TaskLedger::open(dir.path(), false).await.unwrap();
        ledger.completed = vec!["T1".into(), "T1".into(), "T2".into()];
        ledger.failed = vec!["T1".into(), "T3".into()];

        ledger.clean_up();

        assert_eq!(ledger.completed(), ["T1".to_string(), "T2".to_string()]);
        assert_eq!(ledger.failed(), ["T3".to_string()]);
    }

    #[tokio::test]
    async fn failure_then_success_clears_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = TaskLedger::open(dir.path(), false).await.unwrap();

        ledger.record("T", false).await.unwrap();
        ledger.record("T", false).await.unwrap();
        assert_eq!(ledger.failed().len(), 2);

        ledger.record("T", true).await.unwrap();
        assert_eq!(ledger.completed(), ["T".to_string()]);
        assert!(ledger.failed().is_empty());
    }

    #[tokio::test]
    async fn persists_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut ledger = TaskLedger::open(dir.path(), false).await.unwrap();
            ledger.record("T1", true).await.unwrap();
            ledger.record("T2", false).await.unwrap();
        }
        let ledger = TaskLedger::open(dir.path(), true).await.unwrap();
        assert_eq!(ledger.completed(), ["T1".to_string()]);
        assert_eq!(ledger.failed(), ["T2".to_string()]);
    }
}
