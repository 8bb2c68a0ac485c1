use crate::state::Stage;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Operations the session controller rejects.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("no session with id {0:?}")]
    SessionNotFound(String),

    #[error("session {0:?} is still in progress")]
    SessionActive(String),

    #[error("session {0:?} has already terminated")]
    SessionClosed(String),

    #[error("a revision request needs non-empty feedback text")]
    InvalidDecision,

    #[error("the brief must not be empty")]
    EmptyBrief,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("session store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Misuse of the transition table. The controller never triggers these for a
/// well-formed record; they guard hand-driven use of [`crate::Engine`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("stage output does not belong to the {stage} stage")]
    UnexpectedOutput { stage: Stage },

    #[error("session is at the {stage} stage, not waiting for a human decision")]
    NotAwaitingHuman { stage: Stage },

    #[error("a revision request needs non-empty feedback text")]
    InvalidDecision,
}
