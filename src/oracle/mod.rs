//! Capability ports the core depends on.
//!
//! The generative reasoning oracle, the answering oracle, the critic, the
//! sandboxed executor and the embedder are external collaborators. The core
//! consumes them through these traits only; production wires in the
//! OpenRouter-backed adapter, tests wire in deterministic fakes.

mod openrouter;

pub use openrouter::{OpenRouterEmbedder, OpenRouterOracle};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::curriculum::{Task, TaskDraft};
use crate::library::Skill;

/// Produces embedding vectors for similarity indexing.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Answers free-form questions.
#[async_trait]
pub trait AnswerOracle: Send + Sync {
    async fn ask(&self, question: &str) -> anyhow::Result<String>;
}

/// Drives the task-proposal pipeline: question brainstorming and task
/// synthesis. Implementations perform bounded internal parse retries and
/// return a typed failure on exhaustion.
#[async_trait]
pub trait CurriculumOracle: Send + Sync {
    async fn brainstorm(&self, observation: &str) -> anyhow::Result<Vec<String>>;

    /// Synthesize the next task. `feedback` carries the validation error
    /// from the previous synthesis attempt, if any.
    async fn synthesize_task(
        &self,
        observation: &str,
        feedback: Option<&str>,
    ) -> anyhow::Result<TaskDraft>;
}

/// Inputs to one generation attempt.
#[derive(Debug)]
pub struct GenerationContext<'a> {
    pub task_prompt: &'a str,
    pub context: &'a str,
    /// Skills retrieved for this attempt, name plus stored record.
    pub skills: &'a [(String, Skill)],
    /// Code from the previous attempt, empty on the first.
    pub prev_code: &'a str,
    pub env_feedback: &'a str,
    pub critique: &'a str,
}

/// Generates a candidate implementation; `None` means the oracle produced
/// no usable candidate and the attempt is consumed without progress.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, ctx: &GenerationContext<'_>) -> anyhow::Result<Option<String>>;
}

/// Result of running an assembled unit in the execution environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub feedback: String,
    pub reward: bool,
    #[serde(default)]
    pub info: serde_json::Value,
}

/// Runs candidate code against the task's tests.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Receive the task fixture before a rollout. Default no-op for
    /// executors configured out of band.
    async fn prepare(&self, _task: &Task) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute(&self, code: &str, use_public_tests: bool) -> anyhow::Result<Execution>;
}

/// Verdict on one attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Critique {
    pub success: bool,
    pub critique: String,
    pub reasoning: String,
}

/// Judges whether an attempt met the task requirements.
#[async_trait]
pub trait Critic: Send + Sync {
    async fn critique(
        &self,
        feedback: &str,
        reward: bool,
        code: &str,
        context: &str,
    ) -> anyhow::Result<Critique>;
}

/// Describes accepted code for archival and later retrieval.
#[async_trait]
pub trait SkillDescriber: Send + Sync {
    async fn describe(&self, code: &str, name: &str, task: &str) -> anyhow::Result<String>;
}
