//! Skill library: persisted, vector-indexed store of accepted solutions.

mod index;
mod store;
mod types;

pub use index::VectorIndex;
pub use store::SkillStore;
pub use types::{DuplicateSkillPolicy, NewSkill, Skill};
