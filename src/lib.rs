//! # skillforge
//!
//! A self-improving code-generation agent: it proposes small Python
//! programming tasks, generates candidate implementations through an
//! external generative oracle, executes and critiques them, and archives
//! accepted solutions as reusable skills retrievable by semantic
//! similarity.
//!
//! ## Architecture
//!
//! ```text
//!        ┌─────────────────────────────────────┐
//!        │          RolloutController          │
//!        │  retrieve → generate → validate →   │
//!        │      execute → critique → accept    │
//!        └──────┬──────────┬──────────┬────────┘
//!               │          │          │
//!               ▼          ▼          ▼
//!        ┌──────────┐ ┌─────────┐ ┌────────────┐
//!        │Curriculum│ │ Skill   │ │ Analyzer + │
//!        │ (tasks)  │ │ Library │ │ Resolver   │
//!        └──────────┘ └─────────┘ └────────────┘
//! ```
//!
//! ## Modules
//! - `analyzer`: static analysis of generated Python candidates
//! - `resolver`: dependency-closure assembly of executable units
//! - `library`: persisted, vector-indexed skill store
//! - `curriculum`: task proposal, QA cache and task ledgers
//! - `rollout`: the per-task attempt loop composing the above
//! - `oracle`: capability ports plus the OpenRouter adapter
//! - `executor`: subprocess execution collaborator

pub mod analyzer;
pub mod config;
pub mod curriculum;
pub mod error;
pub mod executor;
pub mod library;
pub mod oracle;
pub mod resolver;
pub mod rollout;
pub mod storage;

#[cfg(test)]
pub mod testutil;

pub use config::Config;
pub use error::CoreError;
pub use rollout::{RolloutConfig, RolloutController};
