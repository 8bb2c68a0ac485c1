mod config;
mod controller;
mod engine;
mod error;
mod layout;
mod session;
mod stages;
mod state;
mod store;

pub use config::WorkflowConfig;
pub use controller::ResumeOutcome;
pub use controller::SessionController;
pub use controller::SuspendedView;
pub use engine::DEFAULT_MAX_REVISIONS;
pub use engine::Engine;
pub use engine::EngineConfig;
pub use engine::HumanDecision;
pub use engine::RevisionPolicy;
pub use engine::StageOutput;
pub use engine::route_after_human;
pub use error::EngineError;
pub use error::WorkflowError;
pub use layout::StoreLayout;
pub use session::CommandDrafter;
pub use session::CommandReviewer;
pub use session::CommandSpec;
pub use session::StageLauncher;
pub use session::build_draft_prompt;
pub use session::build_review_prompt;
pub use stages::DraftFailure;
pub use stages::Drafter;
pub use stages::EMPTY_ARTIFACT_FEEDBACK;
pub use stages::ReviewFailure;
pub use stages::ReviewOutcome;
pub use stages::Reviewer;
pub use stages::run_draft;
pub use stages::run_review;
pub use state::Artifact;
pub use state::Requirement;
pub use state::ReviewVerdict;
pub use state::SessionRecord;
pub use state::Stage;
pub use state::WorkflowState;
pub use store::FileStore;
pub use store::InMemoryStore;
pub use store::StateStore;
