//! Configuration management for skillforge.
//!
//! Configuration is read from environment variables:
//! - `OPENROUTER_API_KEY` - Required. Your OpenRouter API key.
//! - `GENERATION_MODEL` - Optional. Model for code generation, critique and
//!   task synthesis. Defaults to `anthropic/claude-sonnet-4.5`.
//! - `QA_MODEL` - Optional. Model for question answering. Defaults to the
//!   generation model.
//! - `EMBED_MODEL` - Optional. Embedding model. Defaults to
//!   `openai/text-embedding-3-small`.
//! - `CHECKPOINT_ROOT` - Optional. Root directory for persisted stores.
//!   Defaults to `ckpt`.
//! - `SKILL_STORE_NAME` - Optional. Namespace of the skill store. Defaults
//!   to `skill`.
//! - `RESUME` - Optional. Resume from persisted checkpoints. Defaults to
//!   `false`.
//! - `RETRIEVAL_TOP_K` - Optional. Skills retrieved per attempt. Defaults
//!   to `5`.
//! - `MAX_TASK_ATTEMPTS` - Optional. Attempts per task. Defaults to `4`.
//! - `MAX_PROPOSE_RETRIES` - Optional. Task synthesis retries. Defaults to
//!   `5`.
//! - `DUPLICATE_SKILL_POLICY` - Optional. `skip-if-identical` (default) or
//!   `version`.
//! - `ALLOWED_MODULES` - Optional. Comma-separated module allow-list
//!   overriding the default standard-library set.
//! - `CHECK_IMPORTS`, `REQUIRE_FUNCTIONS`, `ENFORCE_EXPECTED_NAME`,
//!   `REBUILD_FROM_ANALYSIS` - Optional policy flags, all default `true`.
//! - `EVAL_LATER` - Optional. Defer execution after validation. Defaults to
//!   `false`.
//! - `REWARD_IS_GROUND_TRUTH` - Optional. Trust the execution reward over
//!   the critic. Defaults to `false`.
//! - `SKILL_FILES` - Optional. Mirror skills as code/description files.
//!   Defaults to `true`.
//! - `TRAIN_STEPS` - Optional. Training steps to run. Defaults to `10`.
//! - `PYTHON_BIN` - Optional. Interpreter for the execution sandbox.
//!   Defaults to `python3`.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::analyzer::{self, AnalyzerPolicy};
use crate::library::DuplicateSkillPolicy;
use crate::rollout::RolloutConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key
    pub api_key: String,

    /// Model for generation, critique, description and task synthesis
    pub model: String,

    /// Model for question answering
    pub qa_model: String,

    /// Embedding model for the similarity indexes
    pub embed_model: String,

    /// Embedding dimension (must match the model output)
    pub embed_dimension: usize,

    /// Root directory for persisted stores
    pub checkpoint_root: PathBuf,

    /// Namespace of the skill store under the checkpoint root
    pub skill_store_name: String,

    /// Resume from persisted checkpoints
    pub resume: bool,

    /// Skills retrieved per generation attempt
    pub retrieval_top_k: usize,

    /// Maximum attempts per task
    pub max_task_attempts: usize,

    /// Maximum task synthesis retries per proposal round
    pub max_propose_retries: usize,

    /// Structured-output parse retries in the oracle adapter
    pub parse_retries: usize,

    /// Name-collision handling in the skill store
    pub duplicate_skill_policy: DuplicateSkillPolicy,

    /// Modules candidates and setup code may import
    pub allowed_modules: BTreeSet<String>,

    /// Reject candidates importing modules off the allow-list
    pub check_imports: bool,

    /// Reject candidates defining no functions
    pub require_functions: bool,

    /// Require candidates to end with the expected function
    pub enforce_expected_name: bool,

    /// Rebuild accepted code from the syntax tree
    pub rebuild_from_analysis: bool,

    /// Defer execution: stop after the first successful validation
    pub eval_later: bool,

    /// Trust the execution reward over the critic's verdict
    pub reward_is_ground_truth: bool,

    /// Mirror each skill as code and description files
    pub skill_files: bool,

    /// Training steps to run
    pub train_steps: usize,

    /// Python interpreter for the execution sandbox
    pub python_bin: String,

    /// Wall-clock limit per execution
    pub execution_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not
    /// set, or `ConfigError::InvalidValue` for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let model = std::env::var("GENERATION_MODEL")
            .unwrap_or_else(|_| "anthropic/claude-sonnet-4.5".to_string());
        let qa_model = std::env::var("QA_MODEL").unwrap_or_else(|_| model.clone());
        let embed_model = std::env::var("EMBED_MODEL")
            .unwrap_or_else(|_| "openai/text-embedding-3-small".to_string());

        let checkpoint_root = std::env::var("CHECKPOINT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("ckpt"));
        let skill_store_name =
            std::env::var("SKILL_STORE_NAME").unwrap_or_else(|_| "skill".to_string());

        let duplicate_skill_policy = match std::env::var("DUPLICATE_SKILL_POLICY") {
            Ok(value) => value.parse().map_err(|e: String| {
                ConfigError::InvalidValue("DUPLICATE_SKILL_POLICY".to_string(), e)
            })?,
            Err(_) => DuplicateSkillPolicy::SkipIfIdentical,
        };

        let allowed_modules = match std::env::var("ALLOWED_MODULES") {
            Ok(value) => value
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            Err(_) => analyzer::default_allowed_modules(),
        };

        Ok(Self {
            api_key,
            model,
            qa_model,
            embed_model,
            embed_dimension: env_usize("EMBED_DIMENSION", 1536)?,
            checkpoint_root,
            skill_store_name,
            resume: env_bool("RESUME", false)?,
            retrieval_top_k: env_usize("RETRIEVAL_TOP_K", 5)?,
            max_task_attempts: env_usize("MAX_TASK_ATTEMPTS", 4)?,
            max_propose_retries: env_usize("MAX_PROPOSE_RETRIES", 5)?,
            parse_retries: env_usize("PARSE_RETRIES", 3)?,
            duplicate_skill_policy,
            allowed_modules,
            check_imports: env_bool("CHECK_IMPORTS", true)?,
            require_functions: env_bool("REQUIRE_FUNCTIONS", true)?,
            enforce_expected_name: env_bool("ENFORCE_EXPECTED_NAME", true)?,
            rebuild_from_analysis: env_bool("REBUILD_FROM_ANALYSIS", true)?,
            eval_later: env_bool("EVAL_LATER", false)?,
            reward_is_ground_truth: env_bool("REWARD_IS_GROUND_TRUTH", false)?,
            skill_files: env_bool("SKILL_FILES", true)?,
            train_steps: env_usize("TRAIN_STEPS", 10)?,
            python_bin: std::env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".to_string()),
            execution_timeout: Duration::from_secs(env_usize("EXECUTION_TIMEOUT_SECS", 30)? as u64),
        })
    }

    /// Candidate validation policy derived from this configuration.
    pub fn analyzer_policy(&self) -> AnalyzerPolicy {
        AnalyzerPolicy {
            check_imports: self.check_imports,
            require_functions: self.require_functions,
            rebuild_from_tree: self.rebuild_from_analysis,
            allowed_modules: self.allowed_modules.clone(),
        }
    }

    /// Rollout loop configuration derived from this configuration.
    pub fn rollout_config(&self) -> RolloutConfig {
        RolloutConfig {
            max_attempts: self.max_task_attempts,
            retrieval_top_k: self.retrieval_top_k,
            eval_later: self.eval_later,
            reward_is_ground_truth: self.reward_is_ground_truth,
            enforce_expected_name: self.enforce_expected_name,
        }
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(ConfigError::InvalidValue(
                name.to_string(),
                other.to_string(),
            )),
        },
        Err(_) => Ok(default),
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{e}"))),
        Err(_) => Ok(default),
    }
}
