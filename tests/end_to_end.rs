//! End-to-end training steps against deterministic fake collaborators.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use skillforge::analyzer::{self, AnalyzerPolicy};
use skillforge::curriculum::{Curriculum, TaskDraft};
use skillforge::library::{DuplicateSkillPolicy, SkillStore};
use skillforge::oracle::{
    AnswerOracle, CodeExecutor, CodeGenerator, Critic, Critique, CurriculumOracle, Embedder,
    Execution, GenerationContext, SkillDescriber,
};
use skillforge::rollout::{RolloutConfig, RolloutController};

/// Deterministic byte-frequency embedder: identical texts embed identically.
struct FakeEmbedder;

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vector = vec![0.0f32; 32];
        for (position, byte) in text.bytes().enumerate() {
            vector[(byte as usize).wrapping_add(position * 7) % 32] += 1.0;
        }
        Ok(vector)
    }
}

struct EchoAnswerer;

#[async_trait]
impl AnswerOracle for EchoAnswerer {
    async fn ask(&self, question: &str) -> anyhow::Result<String> {
        Ok(format!("Answer: a short plan for {question}"))
    }
}

/// Proposes scripted drafts in order, repeating the last one.
struct ScriptedCurriculumOracle {
    drafts: Mutex<Vec<TaskDraft>>,
}

#[async_trait]
impl CurriculumOracle for ScriptedCurriculumOracle {
    async fn brainstorm(&self, _observation: &str) -> anyhow::Result<Vec<String>> {
        Ok(vec!["What basic arithmetic helper is missing?".to_string()])
    }

    async fn synthesize_task(
        &self,
        _observation: &str,
        _feedback: Option<&str>,
    ) -> anyhow::Result<TaskDraft> {
        let mut drafts = self.drafts.lock().unwrap();
        if drafts.len() > 1 {
            Ok(drafts.remove(0))
        } else {
            Ok(drafts[0].clone())
        }
    }
}

/// Emits scripted candidate sources in order, then `None`.
struct ScriptedGenerator {
    outputs: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, _ctx: &GenerationContext<'_>) -> anyhow::Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut outputs = self.outputs.lock().unwrap();
        if outputs.is_empty() {
            Ok(None)
        } else {
            Ok(Some(outputs.remove(0)))
        }
    }
}

struct PassExecutor;

#[async_trait]
impl CodeExecutor for PassExecutor {
    async fn execute(&self, _code: &str, _public: bool) -> anyhow::Result<Execution> {
        Ok(Execution {
            feedback: "all test cases passed".to_string(),
            reward: true,
            info: serde_json::Value::Null,
        })
    }
}

struct MirrorCritic;

#[async_trait]
impl Critic for MirrorCritic {
    async fn critique(
        &self,
        feedback: &str,
        reward: bool,
        _code: &str,
        _context: &str,
    ) -> anyhow::Result<Critique> {
        Ok(Critique {
            success: reward,
            critique: if reward { String::new() } else { feedback.to_string() },
            reasoning: "mirrors the execution reward".to_string(),
        })
    }
}

struct StaticDescriber;

#[async_trait]
impl SkillDescriber for StaticDescriber {
    async fn describe(&self, _code: &str, name: &str, task: &str) -> anyhow::Result<String> {
        Ok(format!("function {name}, written for: {task}"))
    }
}

fn add_one_draft() -> TaskDraft {
    TaskDraft {
        task: "Write a function add_one that adds 1 to an integer".to_string(),
        fn_name: "add_one".to_string(),
        setup_code: String::new(),
        test_cases: vec![
            "assert add_one(1) == 2".to_string(),
            "assert add_one(0) == 1".to_string(),
            "assert add_one(-1) == 0".to_string(),
        ],
    }
}

fn add_two_draft() -> TaskDraft {
    TaskDraft {
        task: "Write a function add_two that adds 2 to an integer".to_string(),
        fn_name: "add_two".to_string(),
        setup_code: String::new(),
        test_cases: vec![
            "assert add_two(1) == 3".to_string(),
            "assert add_two(0) == 2".to_string(),
            "assert add_two(-2) == 0".to_string(),
        ],
    }
}

async fn build_controller(
    root: &Path,
    drafts: Vec<TaskDraft>,
    generated: Vec<String>,
) -> (RolloutController, Arc<ScriptedGenerator>) {
    let embedder: Arc<dyn Embedder> = Arc::new(FakeEmbedder);

    let library = SkillStore::open(
        root,
        "skill",
        false,
        DuplicateSkillPolicy::SkipIfIdentical,
        true,
        embedder.clone(),
    )
    .await
    .unwrap();

    let curriculum = Curriculum::open(
        root,
        false,
        5,
        analyzer::default_allowed_modules(),
        embedder,
        Arc::new(ScriptedCurriculumOracle {
            drafts: Mutex::new(drafts),
        }),
        Arc::new(EchoAnswerer),
    )
    .await
    .unwrap();

    let generator = Arc::new(ScriptedGenerator {
        outputs: Mutex::new(generated),
        calls: AtomicUsize::new(0),
    });

    let controller = RolloutController::new(
        root,
        RolloutConfig::default(),
        AnalyzerPolicy::default(),
        library,
        curriculum,
        generator.clone(),
        Arc::new(PassExecutor),
        Arc::new(MirrorCritic),
        Arc::new(StaticDescriber),
    );
    (controller, generator)
}

#[tokio::test]
async fn failed_attempt_then_success_archives_the_skill() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, generator) = build_controller(
        dir.path(),
        vec![add_one_draft()],
        vec![
            // Attempt 1: defines no function, rejected by policy.
            "x = 1\n".to_string(),
            // Attempt 2: matches the expected name.
            "def add_one(n):\n    return n + 1\n".to_string(),
        ],
    )
    .await;

    let success = controller.train_step().await.unwrap();
    assert!(success);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);

    // Ledger gained the task in completed.
    assert_eq!(
        controller.curriculum().completed(),
        ["Write a function add_one that adds 1 to an integer".to_string()]
    );
    assert!(controller.curriculum().failed().is_empty());

    // Skill store gained add_one, retrievable by its description.
    assert_eq!(controller.library().len(), 1);
    let hits = controller
        .library()
        .retrieve("function add_one, written for: Write a function add_one that adds 1 to an integer", 1)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "add_one");
    assert!(hits[0].1.code.contains("def add_one"));

    // A rollout record was persisted.
    let records: Vec<_> = std::fs::read_dir(dir.path().join("records"))
        .unwrap()
        .collect();
    assert_eq!(records.len(), 1);

    // Persisted snapshots stay in lockstep.
    let entries: serde_json::Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("skill/entries.json")).unwrap(),
    )
    .unwrap();
    let index: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("skill/index.json")).unwrap())
            .unwrap();
    assert_eq!(
        entries.as_object().unwrap().len(),
        index.as_array().unwrap().len()
    );
}

#[tokio::test]
async fn second_task_reuses_the_archived_skill() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, _generator) = build_controller(
        dir.path(),
        vec![add_one_draft(), add_two_draft()],
        vec![
            "def add_one(n):\n    return n + 1\n".to_string(),
            "def add_two(n):\n    return add_one(add_one(n))\n".to_string(),
        ],
    )
    .await;

    assert!(controller.train_step().await.unwrap());
    assert!(controller.train_step().await.unwrap());

    assert_eq!(controller.library().len(), 2);
    let add_two = &controller.library().entries()["add_two"];
    assert_eq!(add_two.dependencies, vec!["add_one".to_string()]);

    // The persisted record for add_two carries the assembled unit with the
    // dependency's body first.
    let mut assembled = None;
    for entry in std::fs::read_dir(dir.path().join("records")).unwrap() {
        let record: serde_json::Value = serde_json::from_slice(
            &std::fs::read(entry.unwrap().path().join("output.json")).unwrap(),
        )
        .unwrap();
        let full_code = record["full_code"].as_str().unwrap().to_string();
        if full_code.contains("def add_two") {
            assembled = Some(full_code);
        }
    }
    let assembled = assembled.expect("record with add_two not found");
    let dep_pos = assembled.find("def add_one").unwrap();
    let main_pos = assembled.find("def add_two").unwrap();
    assert!(dep_pos < main_pos);
}

#[tokio::test]
async fn claimed_name_forces_versioned_task() {
    // A different task that claims the same function name.
    let clashing_draft = TaskDraft {
        task: "Write a function add_one that increments a number by one".to_string(),
        fn_name: "add_one".to_string(),
        setup_code: String::new(),
        test_cases: vec![
            "assert add_one(5) == 6".to_string(),
            "assert add_one(9) == 10".to_string(),
            "assert add_one(-5) == -4".to_string(),
        ],
    };

    let dir = tempfile::tempdir().unwrap();
    let (mut controller, _generator) = build_controller(
        dir.path(),
        vec![add_one_draft(), clashing_draft],
        vec![
            "def add_one(n):\n    return n + 1\n".to_string(),
            "def add_one_v2(n):\n    return n + 1\n".to_string(),
        ],
    )
    .await;

    assert!(controller.train_step().await.unwrap());
    // The second proposal re-uses the claimed name; the curriculum renames
    // the task to add_one_v2 before generation.
    assert!(controller.train_step().await.unwrap());

    let names: BTreeSet<String> = controller.library().names();
    assert!(names.contains("add_one"));
    assert!(names.contains("add_one_v2"));
}
