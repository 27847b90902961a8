//! skillforge - training loop entry point.
//!
//! Proposes tasks, rolls them out and grows the skill library, one task at
//! a time.

use std::sync::Arc;

use skillforge::config::Config;
use skillforge::curriculum::Curriculum;
use skillforge::error::CoreError;
use skillforge::executor::PythonSandbox;
use skillforge::library::SkillStore;
use skillforge::oracle::{Embedder, OpenRouterEmbedder, OpenRouterOracle};
use skillforge::rollout::RolloutController;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skillforge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "loaded configuration: model={}, checkpoint_root={}, resume={}",
        config.model,
        config.checkpoint_root.display(),
        config.resume
    );

    let oracle = Arc::new(OpenRouterOracle::new(
        config.api_key.clone(),
        config.model.clone(),
        config.qa_model.clone(),
        config.parse_retries,
    ));
    let embedder: Arc<dyn Embedder> = Arc::new(OpenRouterEmbedder::new(
        config.api_key.clone(),
        config.embed_model.clone(),
        config.embed_dimension,
    ));
    let sandbox = Arc::new(PythonSandbox::new(
        config.python_bin.clone(),
        config.execution_timeout,
    ));

    let library = SkillStore::open(
        &config.checkpoint_root,
        &config.skill_store_name,
        config.resume,
        config.duplicate_skill_policy,
        config.skill_files,
        embedder.clone(),
    )
    .await?;
    info!("skill store open with {} skills", library.len());

    let curriculum = Curriculum::open(
        &config.checkpoint_root,
        config.resume,
        config.max_propose_retries,
        config.allowed_modules.clone(),
        embedder,
        oracle.clone(),
        oracle.clone(),
    )
    .await?;

    let mut controller = RolloutController::new(
        &config.checkpoint_root,
        config.rollout_config(),
        config.analyzer_policy(),
        library,
        curriculum,
        oracle.clone(),
        sandbox,
        oracle.clone(),
        oracle,
    );

    for step in 1..=config.train_steps {
        info!("train step {step}/{}", config.train_steps);
        match controller.train_step().await {
            Ok(success) => {
                info!(
                    "train step {step} finished: {}",
                    if success { "task completed" } else { "task failed" }
                );
            }
            Err(err @ CoreError::ProposalExhausted) => {
                error!("stopping run: {err}");
                return Err(err.into());
            }
            Err(err) => {
                error!("stopping run on store error: {err}");
                return Err(err.into());
            }
        }
    }

    info!(
        "run finished: {} skills stored, {} tasks completed, {} failed",
        controller.library().len(),
        controller.curriculum().completed().len(),
        controller.curriculum().failed().len()
    );
    Ok(())
}
