//! Per-task rollout controller.
//!
//! Drives one task through retrieve → generate → validate → execute →
//! critique, carrying (code, critique) across attempts. Candidate-level
//! failures become the next attempt's critique; anything else aborts the
//! task in isolation: the error is logged to a side channel and the last
//! known outcome is returned, so one task's crash never takes down a batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyzer::{self, AnalyzerPolicy, Candidate};
use crate::curriculum::{Curriculum, Task};
use crate::error::CoreError;
use crate::library::{NewSkill, SkillStore};
use crate::oracle::{
    CodeExecutor, CodeGenerator, Critic, Critique, GenerationContext, SkillDescriber,
};
use crate::resolver;
use crate::storage;

/// Knobs for the attempt loop.
#[derive(Debug, Clone)]
pub struct RolloutConfig {
    /// Maximum attempts per task before giving up.
    pub max_attempts: usize,
    /// Top-k skills retrieved per attempt.
    pub retrieval_top_k: usize,
    /// Defer execution: exit after the first successful validation.
    pub eval_later: bool,
    /// Take the execution reward as ground truth over the critic's verdict.
    pub reward_is_ground_truth: bool,
    /// Require candidates to end with the task's expected function.
    pub enforce_expected_name: bool,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            retrieval_top_k: 5,
            eval_later: false,
            reward_is_ground_truth: false,
            enforce_expected_name: true,
        }
    }
}

/// Terminal state of one rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    Success,
    Exhausted,
    Aborted,
}

/// Result of one rollout, returned to the driver.
#[derive(Debug, Clone)]
pub struct RolloutOutcome {
    pub state: TerminalState,
    pub success: bool,
    pub candidate: Option<Candidate>,
    pub assembled_code: String,
    pub critique: Critique,
}

/// Persisted record of one attempted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutRecord {
    pub task_id: Uuid,
    pub env_feedback: String,
    pub code: String,
    pub full_code: String,
    pub success: bool,
    pub critique: String,
    pub reasoning: String,
    pub created_at: String,
}

/// State carried attempt-to-attempt within one rollout.
#[derive(Default)]
struct AttemptState {
    context: String,
    code: String,
    assembled: String,
    feedback: String,
    critique: Critique,
    candidate: Option<Candidate>,
    accepted: bool,
}

pub struct RolloutController {
    root: PathBuf,
    config: RolloutConfig,
    policy: AnalyzerPolicy,
    library: SkillStore,
    curriculum: Curriculum,
    generator: Arc<dyn CodeGenerator>,
    executor: Arc<dyn CodeExecutor>,
    critic: Arc<dyn Critic>,
    describer: Arc<dyn SkillDescriber>,
}

impl RolloutController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root: &Path,
        config: RolloutConfig,
        policy: AnalyzerPolicy,
        library: SkillStore,
        curriculum: Curriculum,
        generator: Arc<dyn CodeGenerator>,
        executor: Arc<dyn CodeExecutor>,
        critic: Arc<dyn Critic>,
        describer: Arc<dyn SkillDescriber>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            config,
            policy,
            library,
            curriculum,
            generator,
            executor,
            critic,
            describer,
        }
    }

    pub fn library(&self) -> &SkillStore {
        &self.library
    }

    pub fn curriculum(&self) -> &Curriculum {
        &self.curriculum
    }

    /// One full training step: propose a task, roll it out, archive the
    /// accepted skill, record the outcome. Proposal exhaustion propagates;
    /// rollout failures are ordinary `false` results.
    pub async fn train_step(&mut self) -> Result<bool, CoreError> {
        let excluded_names = self.library.names();
        let task = self.curriculum.propose_task(&excluded_names).await?;

        let outcome = self.run_task(&task, false).await;

        if outcome.success {
            if let Some(candidate) = &outcome.candidate {
                let description = self
                    .describer
                    .describe(&candidate.code, &candidate.fn_name, &task.description)
                    .await
                    .map_err(CoreError::from)?;
                let new_skill = NewSkill {
                    name: candidate.fn_name.clone(),
                    code: candidate.code.clone(),
                    dependencies: candidate.dependency_names.iter().cloned().collect(),
                    task: task.description.clone(),
                };
                let stored_name = self.library.add(new_skill, &description).await?;
                tracing::info!("archived skill {stored_name}");
            }
        }

        self.curriculum.record_outcome(&task, outcome.success).await?;
        Ok(outcome.success)
    }

    /// Roll out one task to a terminal state. Never returns an error: aborts
    /// are logged and folded into the outcome.
    pub async fn run_task(&mut self, task: &Task, use_public_tests: bool) -> RolloutOutcome {
        tracing::info!("attempting task {}", task.id);

        let mut state = AttemptState::default();
        let aborted = match self.attempt_loop(task, use_public_tests, &mut state).await {
            Ok(()) => false,
            Err(err) => {
                self.log_abort(task, &err).await;
                true
            }
        };

        let record = RolloutRecord {
            task_id: task.id,
            env_feedback: state.feedback.clone(),
            code: state.code.clone(),
            full_code: state.assembled.clone(),
            success: state.critique.success,
            critique: state.critique.critique.clone(),
            reasoning: state.critique.reasoning.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let record_path = self
            .root
            .join("records")
            .join(task.id.to_string())
            .join("output.json");
        if let Err(err) = storage::dump_json(&record_path, &record).await {
            tracing::warn!("failed to persist rollout record: {err}");
        }
        tracing::info!("[task_id]: {} [result]: {}", task.id, state.critique.success);

        let terminal = if aborted {
            TerminalState::Aborted
        } else if state.accepted {
            TerminalState::Success
        } else {
            TerminalState::Exhausted
        };
        RolloutOutcome {
            state: terminal,
            success: state.critique.success,
            candidate: state.candidate,
            assembled_code: state.assembled,
            critique: state.critique,
        }
    }

    async fn attempt_loop(
        &mut self,
        task: &Task,
        use_public_tests: bool,
        state: &mut AttemptState,
    ) -> Result<(), CoreError> {
        state.context = self.curriculum.task_context(&task.description).await?;
        self.executor.prepare(task).await.map_err(CoreError::from)?;

        let expected_fn_name = if self.config.enforce_expected_name {
            task.expected_fn_name.as_str()
        } else {
            ""
        };

        for attempt in 1..=self.config.max_attempts {
            tracing::info!("rollout attempt {}/{}", attempt, self.config.max_attempts);

            // RETRIEVE: cue from task context plus the previous critique.
            let cue = format!("{}\n\n{}", state.context, state.critique.critique);
            let skills = self
                .library
                .retrieve(&cue, self.config.retrieval_top_k)
                .await?;

            // GENERATE
            let generation = GenerationContext {
                task_prompt: &task.prompt,
                context: &state.context,
                skills: &skills,
                prev_code: &state.code,
                env_feedback: &state.feedback,
                critique: &state.critique.critique,
            };
            let raw = match self
                .generator
                .generate(&generation)
                .await
                .map_err(CoreError::from)?
            {
                Some(raw) => raw,
                None => {
                    // Attempt consumed; state carries forward unchanged.
                    tracing::warn!("generation produced no usable candidate");
                    continue;
                }
            };

            // VALIDATE: candidate-level failures become the next critique.
            let candidate =
                match analyzer::parse_candidate(&raw, expected_fn_name, &self.policy) {
                    Ok(candidate) => candidate,
                    Err(err) if err.is_corrective() => {
                        tracing::warn!("candidate rejected: {err}");
                        state.critique = Critique {
                            success: false,
                            critique: err.to_string(),
                            reasoning: String::new(),
                        };
                        continue;
                    }
                    Err(err) => return Err(err),
                };

            state.code = candidate.code.clone();
            state.assembled = resolver::assemble_unit(
                &candidate.code,
                &candidate.dependency_names,
                &[self.library.entries()],
            );
            state.candidate = Some(candidate);

            if self.config.eval_later && !use_public_tests {
                break;
            }

            // EXECUTE
            let execution = self
                .executor
                .execute(&state.assembled, use_public_tests)
                .await
                .map_err(CoreError::from)?;
            state.feedback = execution.feedback;

            // CRITIQUE
            let mut critique = self
                .critic
                .critique(&state.feedback, execution.reward, &state.code, &state.context)
                .await
                .map_err(CoreError::from)?;
            if self.config.reward_is_ground_truth {
                critique.success = execution.reward;
            }
            state.critique = critique;

            if state.critique.success {
                state.accepted = true;
                break;
            }
        }
        Ok(())
    }

    async fn log_abort(&self, task: &Task, err: &CoreError) {
        tracing::error!("error in rollout for task {}: {err}", task.id);
        let line = format!("[task_id]: {} [unhandled error] {err}\n", task.id);
        if let Err(write_err) = storage::append_text(&self.root.join("error.txt"), &line).await {
            tracing::warn!("failed to write rollout error log: {write_err}");
        }
    }
}
