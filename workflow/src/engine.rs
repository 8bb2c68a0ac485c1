//! The transition table.
//!
//! ```text
//! START ─► Draft ─► Review ─┬─(approved or revisions exhausted)─► HumanCheckpoint ─┬─(approved)─► Terminated
//!            ▲              │                                                      │
//!            │              └─(needs revision)─► Increment ◄─(revision request)────┘
//!            └───────────────────────────────────────┘
//! ```
//!
//! [`Engine::advance`] is a pure function of the state, the cursor and the
//! output of the stage at the cursor. It never calls a stage itself and it
//! never crosses the human checkpoint on its own: only
//! [`Engine::resume_after_human`] does.

use crate::error::EngineError;
use crate::stages::DraftFailure;
use crate::stages::ReviewFailure;
use crate::stages::ReviewOutcome;
use crate::state::Artifact;
use crate::state::ReviewVerdict;
use crate::state::Stage;
use crate::state::WorkflowState;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub const DEFAULT_MAX_REVISIONS: u32 = 3;

const APPROVAL_REPLIES: &[&str] = &[
    "ok", "ок", "okay", "хорошо", "спасибо", "approve", "approved", "lgtm",
];

/// How the revision limit is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionPolicy {
    /// One budget for the whole session. After it is spent, every human
    /// revision request buys exactly one more draft/review pass.
    #[default]
    Global,
    /// A fresh budget each time a human asks for changes.
    PerHumanRound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_revisions: u32,
    pub policy: RevisionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_revisions: DEFAULT_MAX_REVISIONS,
            policy: RevisionPolicy::Global,
        }
    }
}

/// What the stage at the cursor produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    Drafted(Result<Artifact, DraftFailure>),
    Reviewed(Result<ReviewOutcome, ReviewFailure>),
    Incremented,
}

impl StageOutput {
    fn stage(&self) -> Stage {
        match self {
            StageOutput::Drafted(_) => Stage::Draft,
            StageOutput::Reviewed(_) => Stage::Review,
            StageOutput::Incremented => Stage::Increment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanDecision {
    pub approved: bool,
    #[serde(default)]
    pub feedback_text: String,
}

impl HumanDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            feedback_text: String::new(),
        }
    }

    pub fn revise(feedback_text: impl Into<String>) -> Self {
        Self {
            approved: false,
            feedback_text: feedback_text.into(),
        }
    }

    /// Reads a free-text chat reply: blank or an approval word approves,
    /// anything else asks for changes.
    pub fn from_reply(reply: &str) -> Self {
        let reply = reply.trim();
        let lowered = reply.to_lowercase();
        if reply.is_empty() || APPROVAL_REPLIES.contains(&lowered.as_str()) {
            Self::approve()
        } else {
            Self::revise(reply)
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.approved && self.feedback_text.trim().is_empty() {
            return Err(EngineError::InvalidDecision);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Applies the output of the stage at `cursor` and picks the next stage.
    pub fn advance(
        &self,
        mut state: WorkflowState,
        cursor: Stage,
        output: StageOutput,
    ) -> Result<(WorkflowState, Stage), EngineError> {
        if output.stage() != cursor {
            return Err(EngineError::UnexpectedOutput { stage: cursor });
        }

        let next = match output {
            StageOutput::Drafted(Ok(artifact)) => {
                state.artifact = Some(artifact);
                Stage::Review
            }
            StageOutput::Drafted(Err(failure)) => {
                warn!(%failure, "draft stage failed; clearing the artifact");
                state.artifact = None;
                Stage::Review
            }
            StageOutput::Reviewed(result) => {
                let outcome = result.unwrap_or_else(|failure| {
                    warn!(%failure, "review stage failed; treating as needs revision");
                    ReviewOutcome::needs_revision(format!(
                        "Review failed with a technical error: {failure}"
                    ))
                });
                state.review_verdict = Some(outcome.verdict);
                state.review_feedback = outcome.feedback;
                self.route_after_review(&state)
            }
            StageOutput::Incremented => {
                state.revision_count += 1;
                Stage::Draft
            }
        };

        debug!(
            from = %cursor,
            to = %next,
            revision_count = state.revision_count,
            "transition"
        );
        Ok((state, next))
    }

    /// Crosses the human checkpoint. The decision is validated before the
    /// state is touched.
    pub fn resume_after_human(
        &self,
        mut state: WorkflowState,
        cursor: Stage,
        decision: &HumanDecision,
    ) -> Result<(WorkflowState, Stage), EngineError> {
        if cursor != Stage::HumanCheckpoint {
            return Err(EngineError::NotAwaitingHuman { stage: cursor });
        }
        decision.validate()?;

        if decision.approved {
            state.human_gave_feedback = false;
            state.human_feedback.clear();
        } else {
            state.human_gave_feedback = true;
            state.human_feedback = decision.feedback_text.trim().to_string();
            state.round_base = state.revision_count;
        }

        let next = route_after_human(&state);
        debug!(
            from = %cursor,
            to = %next,
            revision_count = state.revision_count,
            "human decision applied"
        );
        Ok((state, next))
    }

    pub fn revisions_exhausted(&self, state: &WorkflowState) -> bool {
        let spent = match self.config.policy {
            RevisionPolicy::Global => state.revision_count,
            RevisionPolicy::PerHumanRound => state.revisions_this_round(),
        };
        spent >= self.config.max_revisions
    }

    pub fn route_after_review(&self, state: &WorkflowState) -> Stage {
        if state.review_verdict == Some(ReviewVerdict::Approved) {
            return Stage::HumanCheckpoint;
        }
        if self.revisions_exhausted(state) {
            info!(
                revision_count = state.revision_count,
                max_revisions = self.config.max_revisions,
                "revision limit reached; handing over to the human"
            );
            return Stage::HumanCheckpoint;
        }
        Stage::Increment
    }
}

pub fn route_after_human(state: &WorkflowState) -> Stage {
    if state.human_gave_feedback {
        Stage::Increment
    } else {
        Stage::Terminated
    }
}
