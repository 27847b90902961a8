//! Error taxonomy for the agent core.
//!
//! Candidate-level failures (`Parse`, `Policy`) are corrective: they are fed
//! back into the next generation attempt as critique text instead of being
//! raised. Store corruption (`Consistency`) and proposal exhaustion are the
//! only errors surfaced to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Candidate or setup code could not be parsed into a syntax tree.
    #[error("could not parse code to a syntax tree, check syntax and try again. error: {0}")]
    Parse(String),

    /// Candidate or proposed task violated a validation policy.
    #[error("{0}")]
    Policy(String),

    /// A persisted store's similarity index and metadata map disagree.
    /// Fatal: halts the affected store, requires manual repair.
    #[error(
        "{store} store is not synced: {index_len} entries in the similarity index but \
         {entry_len} entries in the metadata map. You may need to manually delete the \
         store directory to run from scratch."
    )]
    Consistency {
        store: String,
        index_len: usize,
        entry_len: usize,
    },

    /// Task synthesis retries exhausted without a valid proposal.
    #[error("max retries reached, failed to propose a task")]
    ProposalExhausted,

    /// An external collaborator (oracle, embedder, executor) failed.
    #[error("oracle call failed: {0}")]
    Oracle(anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether this error should be converted into corrective feedback for
    /// the next attempt rather than raised.
    pub fn is_corrective(&self) -> bool {
        matches!(self, CoreError::Parse(_) | CoreError::Policy(_))
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Oracle(err)
    }
}
