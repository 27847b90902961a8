//! Curriculum: proposes the next task and tracks task history.
//!
//! The proposal pipeline brainstorms questions about what to attempt next,
//! answers them through the memoized QA cache, then synthesizes a task and
//! validates it. Validation failures are fed back into the next synthesis
//! attempt as corrective feedback; exhausting the bounded retries is fatal
//! for the proposal round.

mod ledger;
mod qa_cache;

pub use ledger::TaskLedger;
pub use qa_cache::QaCache;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyzer;
use crate::error::CoreError;
use crate::oracle::{AnswerOracle, CurriculumOracle, Embedder};

/// Raw task synthesis output before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub task: String,
    /// Expected name of the single function the task asks for.
    pub fn_name: String,
    #[serde(default)]
    pub setup_code: String,
    /// Single-line assert statements exercising the function.
    pub test_cases: Vec<String>,
}

/// A validated task, immutable once proposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub expected_fn_name: String,
    pub setup_code: String,
    pub test_cases: Vec<String>,
    /// Description plus the function-name directive handed to generation.
    pub prompt: String,
}

pub struct Curriculum {
    qa: QaCache,
    ledger: TaskLedger,
    oracle: Arc<dyn CurriculumOracle>,
    answerer: Arc<dyn AnswerOracle>,
    previous_task: String,
    max_propose_retries: usize,
    allowed_modules: BTreeSet<String>,
}

impl Curriculum {
    pub async fn open(
        root: &Path,
        resume: bool,
        max_propose_retries: usize,
        allowed_modules: BTreeSet<String>,
        embedder: Arc<dyn Embedder>,
        oracle: Arc<dyn CurriculumOracle>,
        answerer: Arc<dyn AnswerOracle>,
    ) -> Result<Self, CoreError> {
        let qa = QaCache::open(root, resume, embedder).await?;
        let ledger = TaskLedger::open(root, resume).await?;
        Ok(Self {
            qa,
            ledger,
            oracle,
            answerer,
            previous_task: String::new(),
            max_propose_retries,
            allowed_modules,
        })
    }

    pub fn completed(&self) -> &[String] {
        self.ledger.completed()
    }

    pub fn failed(&self) -> &[String] {
        self.ledger.failed()
    }

    fn render_observation(&self) -> String {
        let completed = if self.ledger.completed().is_empty() {
            "None".to_string()
        } else {
            format!("\n\t{}", self.ledger.completed().join("\n\t"))
        };
        let failed = if self.ledger.failed().is_empty() {
            "None".to_string()
        } else {
            format!("\n\t{}", self.ledger.failed().join("\n\t"))
        };
        format!(
            "Completed tasks so far (do not give me these tasks again!): {completed}\n\n\
             Failed tasks that are too hard: {failed}\n\n"
        )
    }

    async fn run_qa(&mut self, observation: &str) -> Result<Vec<(String, String)>, CoreError> {
        let questions = self
            .oracle
            .brainstorm(observation)
            .await
            .map_err(CoreError::from)?;
        let mut pairs = Vec::with_capacity(questions.len());
        for question in questions {
            let answer = self.qa.answer(&question, self.answerer.as_ref()).await?;
            pairs.push((question, answer));
        }
        Ok(pairs)
    }

    /// Format QA pairs and the ledger observation for task synthesis,
    /// dropping unhelpful answers and capping at five questions.
    fn render_proposal_context(pairs: &[(String, String)], observation: &str) -> String {
        let mut context = String::new();
        let mut index = 1;
        for (question, answer) in pairs {
            if answer.contains("Answer: Unknown") || answer.contains("language model") {
                continue;
            }
            context.push_str(&format!("Question {index}: {question}\n{answer}\n\n"));
            index += 1;
            if index > 5 {
                break;
            }
        }
        format!("{context}{observation}")
    }

    fn validate_draft(&self, draft: &TaskDraft) -> Result<(), CoreError> {
        if draft.task.trim().is_empty() {
            return Err(CoreError::Policy("task not found!".to_string()));
        }
        if self.ledger.completed().contains(&draft.task) {
            return Err(CoreError::Policy(
                "the task proposed has already been completed previously! \
                 Give a new task that has not been completed before"
                    .to_string(),
            ));
        }
        if draft.task == self.previous_task {
            return Err(CoreError::Policy(
                "the task you proposed is the previous task. Issue a different task.".to_string(),
            ));
        }

        if !draft.setup_code.trim().is_empty() {
            let analysis = analyzer::analyze(&draft.setup_code)?;
            analyzer::assert_modules_allowed(&analysis.imported_modules, &self.allowed_modules)?;
        }

        if draft.fn_name.trim().is_empty() {
            return Err(CoreError::Policy("expected function name not found!".to_string()));
        }
        let token_count = draft.fn_name.split_whitespace().count();
        if token_count != 1 {
            return Err(CoreError::Policy(format!(
                "you can only request ONE function to be written! found {token_count} functions"
            )));
        }

        if draft.test_cases.is_empty() {
            return Err(CoreError::Policy("test cases not found!".to_string()));
        }
        for test_case in &draft.test_cases {
            let trimmed = test_case.trim();
            if !trimmed.starts_with("assert") || trimmed.contains('\n') {
                return Err(CoreError::Policy(format!(
                    "this test case does not start with assert: {test_case}\n\
                     Make sure that each test case starts with assert and only contains one line"
                )));
            }
            let call = analyzer::call_str(trimmed)?;
            if !call.contains(&draft.fn_name) {
                return Err(CoreError::Policy(format!(
                    "test case called {call} but it did not contain the expected function name {}",
                    draft.fn_name
                )));
            }
        }
        Ok(())
    }

    /// Rename the draft's function when the name is already claimed,
    /// appending the smallest unused `_v{n}` suffix and propagating the
    /// rename through the description, setup code and test cases.
    fn rename_for_exclusions(draft: &mut TaskDraft, excluded_names: &BTreeSet<String>) {
        if !excluded_names.contains(&draft.fn_name) {
            return;
        }
        let base = draft.fn_name.clone();
        let mut version = 1u32;
        let mut renamed = base.clone();
        while excluded_names.contains(&renamed) {
            version += 1;
            renamed = format!("{base}_v{version}");
        }
        tracing::info!("function name {base} is claimed, renaming task to use {renamed}");

        draft.task = draft.task.replace(&base, &renamed);
        draft.setup_code = draft.setup_code.replace(&base, &renamed);
        for test_case in &mut draft.test_cases {
            *test_case = test_case.replace(&base, &renamed);
        }
        draft.fn_name = renamed;
    }

    /// Propose the next task, retrying synthesis on validation failures.
    pub async fn propose_task(
        &mut self,
        excluded_names: &BTreeSet<String>,
    ) -> Result<Task, CoreError> {
        let observation = self.render_observation();
        let qa_pairs = self.run_qa(&observation).await?;
        let content = Self::render_proposal_context(&qa_pairs, &observation);

        let mut feedback: Option<String> = None;
        for attempt in 1..=self.max_propose_retries {
            tracing::info!(
                "task synthesis attempt {}/{}",
                attempt,
                self.max_propose_retries
            );
            let mut draft = self
                .oracle
                .synthesize_task(&content, feedback.as_deref())
                .await
                .map_err(CoreError::from)?;

            match self.validate_draft(&draft) {
                Ok(()) => {
                    Self::rename_for_exclusions(&mut draft, excluded_names);
                    let prompt = format!(
                        "{}\nYou must strictly follow the function name: {}",
                        draft.task, draft.fn_name
                    );
                    return Ok(Task {
                        id: Uuid::new_v4(),
                        description: draft.task,
                        expected_fn_name: draft.fn_name,
                        setup_code: draft.setup_code,
                        test_cases: draft.test_cases,
                        prompt,
                    });
                }
                Err(err) if err.is_corrective() => {
                    tracing::warn!("proposed task rejected: {err}");
                    feedback = Some(format!(
                        "Error! {err}\n\
                         Check your response again, and fix the error above to follow the \
                         required format.\n\
                         If the same type of error repeats, give a different task which avoids \
                         the error above.\n"
                    ));
                }
                Err(err) => return Err(err),
            }
        }
        Err(CoreError::ProposalExhausted)
    }

    /// Memoized conceptual plan for a task, injected into generation context.
    pub async fn task_context(&mut self, task: &str) -> Result<String, CoreError> {
        let question = format!(
            "Explain at a conceptual level, how to accomplish the below task in Python \
             programming?\n{task}"
        );
        let answer = self.qa.answer(&question, self.answerer.as_ref()).await?;
        Ok(format!(
            "Rough plan to accomplish the task (can be wrong): \n{answer}\n"
        ))
    }

    /// Record one rollout outcome and remember the task to reject an
    /// immediate re-proposal.
    pub async fn record_outcome(&mut self, task: &Task, success: bool) -> Result<(), CoreError> {
        self.ledger.record(&task.description, success).await?;
        self.previous_task = task.description.clone();
        Ok(())
    }
}
