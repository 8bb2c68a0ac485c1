//! Draft and review stage contracts.
//!
//! Both stages are opaque to the engine: it hands them the current
//! [`WorkflowState`] and only looks at what comes back. Failures are values,
//! not panics, so the engine can turn them into state the routers act on.

use crate::state::Artifact;
use crate::state::ReviewVerdict;
use crate::state::WorkflowState;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Feedback recorded when review finds no artifact to judge.
pub const EMPTY_ARTIFACT_FEEDBACK: &str = "The artifact is empty or was not generated.";

const MISSING_REVISION_FEEDBACK: &str =
    "The reviewer requested a revision without explaining the defect.";

#[async_trait]
pub trait Drafter: Send + Sync {
    async fn draft(&self, state: &WorkflowState) -> Result<Artifact, DraftFailure>;
}

#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, state: &WorkflowState) -> Result<ReviewOutcome, ReviewFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftFailure {
    #[error("drafter failed: {0}")]
    Adapter(String),
    #[error("drafter produced an invalid artifact: {0}")]
    InvalidArtifact(String),
    #[error("drafter timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewFailure {
    #[error("reviewer failed: {0}")]
    Adapter(String),
    #[error("reviewer produced an unreadable verdict: {0}")]
    InvalidVerdict(String),
    #[error("reviewer timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub verdict: ReviewVerdict,
    #[serde(default, alias = "critique")]
    pub feedback: String,
}

impl ReviewOutcome {
    pub fn approved() -> Self {
        Self {
            verdict: ReviewVerdict::Approved,
            feedback: String::new(),
        }
    }

    pub fn needs_revision(feedback: impl Into<String>) -> Self {
        Self {
            verdict: ReviewVerdict::NeedsRevision,
            feedback: feedback.into(),
        }
    }

    /// Approved carries no feedback; a revision request always carries some.
    pub fn normalized(self) -> Self {
        match self.verdict {
            ReviewVerdict::Approved => Self::approved(),
            ReviewVerdict::NeedsRevision if self.feedback.trim().is_empty() => {
                Self::needs_revision(MISSING_REVISION_FEEDBACK)
            }
            ReviewVerdict::NeedsRevision => self,
        }
    }
}

/// Calls the drafter, bounded by `timeout`.
pub async fn run_draft(
    drafter: &dyn Drafter,
    state: &WorkflowState,
    timeout: Duration,
) -> Result<Artifact, DraftFailure> {
    let artifact = match tokio::time::timeout(timeout, drafter.draft(state)).await {
        Ok(result) => result?,
        Err(_) => return Err(DraftFailure::Timeout(timeout)),
    };
    artifact
        .validate()
        .map_err(|err| DraftFailure::InvalidArtifact(err.to_string()))?;
    Ok(artifact)
}

/// Calls the reviewer, bounded by `timeout`. An absent artifact is judged
/// here without consulting the reviewer.
pub async fn run_review(
    reviewer: &dyn Reviewer,
    state: &WorkflowState,
    timeout: Duration,
) -> Result<ReviewOutcome, ReviewFailure> {
    if state.artifact.is_none() {
        warn!("reviewing an absent artifact; skipping the reviewer");
        return Ok(ReviewOutcome::needs_revision(EMPTY_ARTIFACT_FEEDBACK));
    }
    match tokio::time::timeout(timeout, reviewer.review(state)).await {
        Ok(result) => result.map(ReviewOutcome::normalized),
        Err(_) => Err(ReviewFailure::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Requirement;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    struct CountingReviewer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Reviewer for CountingReviewer {
        async fn review(&self, _state: &WorkflowState) -> Result<ReviewOutcome, ReviewFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ReviewOutcome {
                verdict: ReviewVerdict::NeedsRevision,
                feedback: "  ".into(),
            })
        }
    }

    struct SlowDrafter;

    #[async_trait]
    impl Drafter for SlowDrafter {
        async fn draft(&self, _state: &WorkflowState) -> Result<Artifact, DraftFailure> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(DraftFailure::Adapter("unreachable".into()))
        }
    }

    struct DuplicateIdDrafter;

    #[async_trait]
    impl Drafter for DuplicateIdDrafter {
        async fn draft(&self, _state: &WorkflowState) -> Result<Artifact, DraftFailure> {
            let requirement = Requirement {
                id: "FR-1".into(),
                description: "Customer orders a parcel".into(),
            };
            Ok(Artifact {
                title: "Drones".into(),
                summary: String::new(),
                goals: vec![],
                requirements: vec![requirement.clone(), requirement],
            })
        }
    }

    #[tokio::test]
    async fn absent_artifact_is_judged_without_the_reviewer() {
        let reviewer = CountingReviewer {
            calls: AtomicUsize::new(0),
        };
        let state = WorkflowState::initialize("brief");
        for _ in 0..3 {
            let outcome = run_review(&reviewer, &state, Duration::from_secs(1))
                .await
                .expect("review");
            assert_eq!(outcome, ReviewOutcome::needs_revision(EMPTY_ARTIFACT_FEEDBACK));
        }
        assert_eq!(reviewer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_revision_feedback_is_filled_in() {
        let reviewer = CountingReviewer {
            calls: AtomicUsize::new(0),
        };
        let mut state = WorkflowState::initialize("brief");
        state.artifact = Some(Artifact {
            title: "t".into(),
            summary: "s".into(),
            goals: vec![],
            requirements: vec![],
        });
        let outcome = run_review(&reviewer, &state, Duration::from_secs(1))
            .await
            .expect("review");
        assert_eq!(outcome.verdict, ReviewVerdict::NeedsRevision);
        assert_eq!(outcome.feedback, MISSING_REVISION_FEEDBACK);
        assert_eq!(reviewer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn approval_drops_feedback() {
        let outcome = ReviewOutcome {
            verdict: ReviewVerdict::Approved,
            feedback: "nice".into(),
        };
        assert_eq!(outcome.normalized(), ReviewOutcome::approved());
    }

    #[tokio::test]
    async fn slow_drafter_times_out() {
        let state = WorkflowState::initialize("brief");
        let timeout = Duration::from_millis(20);
        let err = run_draft(&SlowDrafter, &state, timeout)
            .await
            .expect_err("timeout");
        assert_eq!(err, DraftFailure::Timeout(timeout));
    }

    #[tokio::test]
    async fn invalid_artifact_is_a_draft_failure() {
        let state = WorkflowState::initialize("brief");
        let err = run_draft(&DuplicateIdDrafter, &state, Duration::from_secs(1))
            .await
            .expect_err("invalid");
        assert!(matches!(err, DraftFailure::InvalidArtifact(_)));
    }
}
