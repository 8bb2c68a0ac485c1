//! Public entry points for front-ends.
//!
//! The controller binds a session id to a run of the engine. It calls the
//! stage adapters, feeds their output to the engine and persists the record
//! after every transition, so a crash loses at most the stage call in
//! flight. Calls for one session id are serialized; distinct sessions run
//! independently.

use crate::engine::Engine;
use crate::engine::HumanDecision;
use crate::engine::StageOutput;
use crate::error::EngineError;
use crate::error::Result;
use crate::error::WorkflowError;
use crate::stages::Drafter;
use crate::stages::Reviewer;
use crate::stages::run_draft;
use crate::stages::run_review;
use crate::state::Artifact;
use crate::state::ReviewVerdict;
use crate::state::SessionRecord;
use crate::state::Stage;
use crate::store::StateStore;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// What a front-end shows between turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendedView {
    pub artifact: Option<Artifact>,
    pub awaiting_human: bool,
    pub terminated: bool,
    pub revision_count: u32,
    pub review_verdict: Option<ReviewVerdict>,
    pub review_feedback: String,
}

impl SuspendedView {
    fn from_record(record: &SessionRecord) -> Self {
        Self {
            artifact: record.state.artifact.clone(),
            awaiting_human: record.cursor == Stage::HumanCheckpoint,
            terminated: record.is_terminated(),
            revision_count: record.state.revision_count,
            review_verdict: record.state.review_verdict,
            review_feedback: record.state.review_feedback.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    Suspended(SuspendedView),
    Terminated(SuspendedView),
    /// The session had been interrupted between stages. It was run on to the
    /// checkpoint and the decision was not applied, since the human has not
    /// seen this artifact yet.
    Recovered(SuspendedView),
}

impl ResumeOutcome {
    pub fn view(&self) -> &SuspendedView {
        match self {
            ResumeOutcome::Suspended(view)
            | ResumeOutcome::Terminated(view)
            | ResumeOutcome::Recovered(view) => view,
        }
    }
}

pub struct SessionController {
    engine: Engine,
    store: Arc<dyn StateStore>,
    drafter: Arc<dyn Drafter>,
    reviewer: Arc<dyn Reviewer>,
    stage_timeout: Duration,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionController {
    pub fn new(
        engine: Engine,
        store: Arc<dyn StateStore>,
        drafter: Arc<dyn Drafter>,
        reviewer: Arc<dyn Reviewer>,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            drafter,
            reviewer,
            stage_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the session and runs it to the first human checkpoint.
    pub async fn start(&self, session_id: &str, brief: &str) -> Result<SuspendedView> {
        let brief = brief.trim();
        if brief.is_empty() {
            return Err(WorkflowError::EmptyBrief);
        }
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.store.get(session_id)?
            && !existing.is_terminated()
        {
            return Err(WorkflowError::SessionActive(session_id.to_string()));
        }

        info!(session_id, "starting session");
        let record = SessionRecord::new(session_id, brief);
        self.store.put(&record)?;
        let record = self.drive(record).await?;
        Ok(SuspendedView::from_record(&record))
    }

    /// Feeds a human decision across the checkpoint and runs to the next
    /// checkpoint or to termination. A session left between stages by a
    /// crash is first run on to its checkpoint.
    pub async fn resume(&self, session_id: &str, decision: HumanDecision) -> Result<ResumeOutcome> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let mut record = match self.load(session_id) {
            Ok(record) => record,
            Err(err) => {
                self.release_lock(session_id, &lock);
                return Err(err);
            }
        };
        if record.is_terminated() {
            return Err(WorkflowError::SessionClosed(session_id.to_string()));
        }
        if !record.cursor.is_stopping_point() {
            warn!(session_id, cursor = %record.cursor, "recovering interrupted session");
            let record = self.drive(record).await?;
            return Ok(ResumeOutcome::Recovered(SuspendedView::from_record(&record)));
        }

        // Nothing is written unless the engine accepts the decision.
        let (state, next) = self
            .engine
            .resume_after_human(record.state.clone(), record.cursor, &decision)
            .map_err(|err| match err {
                EngineError::InvalidDecision => WorkflowError::InvalidDecision,
                other => WorkflowError::Engine(other),
            })?;
        info!(
            session_id,
            approved = decision.approved,
            revision_count = state.revision_count,
            "human decision received"
        );

        record.state = state;
        record.cursor = next;
        self.persist(&mut record)?;
        let record = self.drive(record).await?;

        let view = SuspendedView::from_record(&record);
        if record.is_terminated() {
            info!(session_id, "session terminated");
            Ok(ResumeOutcome::Terminated(view))
        } else {
            Ok(ResumeOutcome::Suspended(view))
        }
    }

    pub async fn current_view(&self, session_id: &str) -> Result<SuspendedView> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        let record = self.load(session_id);
        if record.is_err() {
            self.release_lock(session_id, &lock);
        }
        Ok(SuspendedView::from_record(&record?))
    }

    /// Drops the session record.
    pub async fn end(&self, session_id: &str) -> Result<()> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        let removed = self.store.delete(session_id);
        self.release_lock(session_id, &lock);
        if !removed? {
            return Err(WorkflowError::SessionNotFound(session_id.to_string()));
        }
        info!(session_id, "session ended");
        Ok(())
    }

    /// Runs stages until the cursor reaches a stopping point.
    async fn drive(&self, mut record: SessionRecord) -> Result<SessionRecord> {
        while !record.cursor.is_stopping_point() {
            let output = match record.cursor {
                Stage::Draft => StageOutput::Drafted(
                    run_draft(self.drafter.as_ref(), &record.state, self.stage_timeout).await,
                ),
                Stage::Review => StageOutput::Reviewed(
                    run_review(self.reviewer.as_ref(), &record.state, self.stage_timeout).await,
                ),
                Stage::Increment => StageOutput::Incremented,
                Stage::HumanCheckpoint | Stage::Terminated => break,
            };
            let (state, next) = self.engine.advance(record.state, record.cursor, output)?;
            record.state = state;
            record.cursor = next;
            self.persist(&mut record)?;
        }
        Ok(record)
    }

    fn persist(&self, record: &mut SessionRecord) -> Result<()> {
        record.touch();
        self.store.put(record)?;
        debug!(
            session_id = %record.session_id,
            cursor = %record.cursor,
            revision_count = record.state.revision_count,
            "session persisted"
        );
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<SessionRecord> {
        self.store
            .get(session_id)?
            .ok_or_else(|| WorkflowError::SessionNotFound(session_id.to_string()))
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Forgets the lock for `session_id` unless another call is holding or
    /// waiting on it. Callers hold `lock` themselves.
    fn release_lock(&self, session_id: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = locks.get(session_id)
            && Arc::ptr_eq(entry, lock)
            && Arc::strong_count(lock) == 2
        {
            locks.remove(session_id);
        }
    }
}
