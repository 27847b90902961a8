//! Types for the skill library.

use serde::{Deserialize, Serialize};

/// A named, persisted, previously accepted function solution.
///
/// Immutable once stored; the only rename happens during collision
/// resolution before first storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub code: String,
    /// Names of other skills this skill's code calls.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Description of the task the skill originated from.
    #[serde(default)]
    pub task: String,
    pub description: String,
}

/// Payload handed to the store when archiving an accepted candidate.
#[derive(Debug, Clone)]
pub struct NewSkill {
    /// Explicit name; when empty the store derives it from the code.
    pub name: String,
    pub code: String,
    pub dependencies: Vec<String>,
    pub task: String,
}

/// What to do when a new skill's name collides with a stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateSkillPolicy {
    /// Structurally identical bodies are skipped; different bodies get a
    /// versioned name.
    SkipIfIdentical,
    /// Always store under the next versioned name.
    Version,
}

impl std::str::FromStr for DuplicateSkillPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip-if-identical" | "skip_if_identical" => Ok(Self::SkipIfIdentical),
            "version" => Ok(Self::Version),
            _ => Err(format!("invalid duplicate skill policy: {s}")),
        }
    }
}
