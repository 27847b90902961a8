//! Persisted, vector-indexed skill store.
//!
//! The metadata map (`entries.json`) and the similarity index
//! (`index.json`) are updated as a single logical unit; their cardinalities
//! must match at all times. A mismatch found at load time is a fatal
//! consistency error and is never repaired automatically.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analyzer;
use crate::error::CoreError;
use crate::oracle::Embedder;
use crate::storage;

use super::index::VectorIndex;
use super::types::{DuplicateSkillPolicy, NewSkill, Skill};

/// Owned store object for the skill library; never ambient global state.
pub struct SkillStore {
    dir: PathBuf,
    name: String,
    policy: DuplicateSkillPolicy,
    /// Mirror each skill as `code/<name>.py` and `description/<name>.txt`.
    mirror_files: bool,
    embedder: Arc<dyn Embedder>,
    entries: BTreeMap<String, Skill>,
    index: VectorIndex,
}

impl std::fmt::Debug for SkillStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkillStore")
            .field("dir", &self.dir)
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("mirror_files", &self.mirror_files)
            .field("embedder", &"<dyn Embedder>")
            .field("entries", &self.entries)
            .field("index", &self.index)
            .finish()
    }
}

impl SkillStore {
    /// Open the store named `name` under `root`. With `resume` set, loads
    /// the persisted snapshots and enforces the consistency gate before any
    /// further operation.
    pub async fn open(
        root: &Path,
        name: &str,
        resume: bool,
        policy: DuplicateSkillPolicy,
        mirror_files: bool,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, CoreError> {
        let dir = root.join(name);
        tokio::fs::create_dir_all(&dir).await?;

        let entries_path = dir.join("entries.json");
        let entries: BTreeMap<String, Skill> = if resume && entries_path.exists() {
            tracing::info!("loading {} store from {}", name, dir.display());
            storage::load_json(&entries_path).await?
        } else {
            BTreeMap::new()
        };
        let index = VectorIndex::open(dir.join("index.json"), resume).await?;

        let store = Self {
            dir,
            name: name.to_string(),
            policy,
            mirror_files,
            embedder,
            entries,
            index,
        };
        store.check_synced()?;
        Ok(store)
    }

    fn check_synced(&self) -> Result<(), CoreError> {
        if self.index.len() != self.entries.len() {
            return Err(CoreError::Consistency {
                store: self.name.clone(),
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

    /// All stored skill names, used to exclude claimed names from new task
    /// proposals.
    pub fn names(&self) -> std::collections::BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// The name→skill lookup table, consumed by the dependency resolver.
    pub fn entries(&self) -> &BTreeMap<String, Skill> {
        &self.entries
    }

    /// Archive a skill under a canonical name and return that name.
    ///
    /// Collisions: under skip-if-identical, a structurally identical body
    /// returns the existing name as a no-op; otherwise the smallest unused
    /// `_v{n}` suffix is chosen and the code's own header token is rewritten
    /// to match before storage.
    pub async fn add(&mut self, new: NewSkill, description: &str) -> Result<String, CoreError> {
        let original_name = if new.name.is_empty() {
            analyzer::primary_fn_name(&new.code)?
        } else {
            new.name.clone()
        };

        let mut name = original_name.clone();
        let mut code = new.code.clone();
        let old_header = format!("{original_name}(");
        let mut version = 1u32;
        while self.entries.contains_key(&name) {
            if self.policy == DuplicateSkillPolicy::SkipIfIdentical {
                // Compare bodies with the stored header token normalized
                // back to the unversioned name.
                let current_header = format!("{name}(");
                let stored = &self.entries[&name];
                if code == stored.code.replace(&current_header, &old_header) {
                    tracing::info!("{} already stored, skipping duplicate", name);
                    return Ok(name);
                }
            }
            version += 1;
            name = format!("{original_name}_v{version}");
        }
        if name != original_name {
            code = code.replace(&old_header, &format!("{name}("));
            tracing::info!(
                "{} exists with different code, storing as {}",
                original_name,
                name
            );
        }

        let embedding = self.embedder.embed(description).await.map_err(CoreError::from)?;

        let skill = Skill {
            code: code.clone(),
            dependencies: new.dependencies,
            task: new.task,
            description: description.to_string(),
        };
        self.index.add(name.clone(), embedding);
        self.entries.insert(name.clone(), skill);
        self.check_synced()?;

        // Metadata map and index snapshot together as one logical unit.
        storage::dump_json(&self.dir.join("entries.json"), &self.entries).await?;
        self.index.persist().await?;

        if self.mirror_files {
            storage::dump_text(&self.dir.join("code").join(format!("{name}.py")), &code).await?;
            storage::dump_text(
                &self.dir.join("description").join(format!("{name}.txt")),
                description,
            )
            .await?;
        }

        Ok(name)
    }

    /// The `k` stored skills nearest to `query` by description similarity.
    /// Returns fewer (or none) when the store is smaller; an empty store is
    /// not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(String, Skill)>, CoreError> {
        let k_eff = k.min(self.entries.len());
        if k_eff == 0 {
            return Ok(Vec::new());
        }

        tracing::info!("retrieving {} entries from {} store", k_eff, self.name);
        let query_embedding = self.embedder.embed(query).await.map_err(CoreError::from)?;
        let hits = self.index.search(&query_embedding, k_eff);

        let mut skills = Vec::with_capacity(hits.len());
        for (name, _distance) in hits {
            let skill = self.entries.get(&name).ok_or_else(|| CoreError::Consistency {
                store: self.name.clone(),
                index_len: self.index.len(),
                entry_len: self.entries.len(),
            })?;
            skills.push((name, skill.clone()));
        }
        Ok(skills)
    }
}
