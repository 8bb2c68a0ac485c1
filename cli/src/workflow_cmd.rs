use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use clap::Subcommand;
use draftloop_workflow::Artifact;
use draftloop_workflow::CommandDrafter;
use draftloop_workflow::CommandReviewer;
use draftloop_workflow::CommandSpec;
use draftloop_workflow::DraftFailure;
use draftloop_workflow::Drafter;
use draftloop_workflow::Engine;
use draftloop_workflow::FileStore;
use draftloop_workflow::HumanDecision;
use draftloop_workflow::ResumeOutcome;
use draftloop_workflow::ReviewFailure;
use draftloop_workflow::ReviewOutcome;
use draftloop_workflow::Reviewer;
use draftloop_workflow::SessionController;
use draftloop_workflow::StageLauncher;
use draftloop_workflow::StoreLayout;
use draftloop_workflow::SuspendedView;
use draftloop_workflow::WorkflowConfig;
use draftloop_workflow::WorkflowState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_STORE_DIR: &str = ".draftloop/sessions";

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Workflow config (YAML or TOML) naming the drafter and reviewer commands.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding session records. Overrides `store_dir` from the config.
    #[arg(long = "store-dir", global = true, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,

    /// Print views as JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum WorkflowSubcommand {
    /// Start a session from a brief and run it to the first human checkpoint.
    Start(StartArgs),
    /// Approve the current draft or request changes.
    Resume(ResumeArgs),
    /// Answer with free text: `ok` (or nothing) approves, anything else asks for changes.
    Reply(ReplyArgs),
    /// Show the current state of a session.
    Show(SessionArgs),
    /// Delete a session.
    End(SessionArgs),
}

#[derive(Debug, Args)]
pub struct SessionArgs {
    #[arg(value_name = "SESSION")]
    pub session: String,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    #[arg(value_name = "SESSION")]
    pub session: String,

    /// Natural-language description of the project.
    #[arg(value_name = "BRIEF")]
    pub brief: String,
}

#[derive(Debug, Args)]
pub struct ResumeArgs {
    #[arg(value_name = "SESSION")]
    pub session: String,

    /// Accept the current draft and finish the session.
    #[arg(long, conflicts_with = "feedback", required_unless_present = "feedback")]
    pub approve: bool,

    /// Changes to make before the next checkpoint.
    #[arg(long, value_name = "TEXT")]
    pub feedback: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReplyArgs {
    #[arg(value_name = "SESSION")]
    pub session: String,

    #[arg(value_name = "TEXT", default_value = "")]
    pub text: String,
}

impl ResumeArgs {
    fn decision(&self) -> HumanDecision {
        match &self.feedback {
            Some(text) if !self.approve => HumanDecision::revise(text.clone()),
            _ => HumanDecision::approve(),
        }
    }
}

pub async fn execute(global: GlobalArgs, action: WorkflowSubcommand) -> Result<()> {
    let config = match &global.config {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::default(),
    };
    let needs_stages = matches!(
        action,
        WorkflowSubcommand::Start(_) | WorkflowSubcommand::Resume(_) | WorkflowSubcommand::Reply(_)
    );
    let session_id = match &action {
        WorkflowSubcommand::Start(args) => &args.session,
        WorkflowSubcommand::Resume(args) => &args.session,
        WorkflowSubcommand::Reply(args) => &args.session,
        WorkflowSubcommand::Show(args) | WorkflowSubcommand::End(args) => &args.session,
    };
    let controller = build_controller(&global, &config, session_id, needs_stages)?;

    match action {
        WorkflowSubcommand::Start(args) => {
            let view = controller.start(&args.session, &args.brief).await?;
            print_view(&args.session, &view, global.json)
        }
        WorkflowSubcommand::Resume(args) => {
            let outcome = controller.resume(&args.session, args.decision()).await?;
            print_outcome(&args.session, &outcome, global.json)
        }
        WorkflowSubcommand::Reply(args) => {
            let decision = HumanDecision::from_reply(&args.text);
            let outcome = controller.resume(&args.session, decision).await?;
            print_outcome(&args.session, &outcome, global.json)
        }
        WorkflowSubcommand::Show(args) => {
            let view = controller.current_view(&args.session).await?;
            print_view(&args.session, &view, global.json)
        }
        WorkflowSubcommand::End(args) => {
            controller.end(&args.session).await?;
            println!("Session {} removed.", args.session);
            Ok(())
        }
    }
}

fn build_controller(
    global: &GlobalArgs,
    config: &WorkflowConfig,
    session_id: &str,
    needs_stages: bool,
) -> Result<SessionController> {
    let store_dir = global
        .store_dir
        .clone()
        .or_else(|| config.store_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
    let mut layout = StoreLayout::new(store_dir);
    if let Some(log_dir) = &config.log_dir {
        layout = layout.with_log_root(log_dir.clone());
    }
    let log_dir = layout.session_log_dir(session_id);
    debug!(store = %layout.root().display(), "opening session store");
    let store = FileStore::open(layout).context("open session store")?;

    let (drafter, reviewer): (Arc<dyn Drafter>, Arc<dyn Reviewer>) = if needs_stages {
        let drafter = required_command(config.drafter.as_ref(), "drafter")?;
        let reviewer = required_command(config.reviewer.as_ref(), "reviewer")?;
        (
            Arc::new(CommandDrafter::new(
                StageLauncher::new(drafter).with_log_dir(log_dir.clone()),
            )),
            Arc::new(CommandReviewer::new(
                StageLauncher::new(reviewer).with_log_dir(log_dir),
            )),
        )
    } else {
        (Arc::new(MissingCommand), Arc::new(MissingCommand))
    };

    Ok(SessionController::new(
        Engine::new(config.engine_config()),
        Arc::new(store),
        drafter,
        reviewer,
        config.stage_timeout(),
    ))
}

fn required_command(command: Option<&CommandSpec>, name: &str) -> Result<CommandSpec> {
    command.cloned().with_context(|| {
        format!("no {name} command configured; pass --config with a `{name}` entry")
    })
}

fn print_outcome(session_id: &str, outcome: &ResumeOutcome, json: bool) -> Result<()> {
    if matches!(outcome, ResumeOutcome::Recovered(_)) && !json {
        eprintln!(
            "Session {session_id} was interrupted before its checkpoint and has been resumed. \
            Your answer was not applied; review the draft below and answer again."
        );
    }
    print_view(session_id, outcome.view(), json)
}

fn print_view(session_id: &str, view: &SuspendedView, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(view)?);
    } else {
        print!("{}", render_view(session_id, view));
    }
    Ok(())
}

fn render_view(session_id: &str, view: &SuspendedView) -> String {
    let mut out = String::new();
    match &view.artifact {
        Some(artifact) => {
            out.push_str(&format!("# {}\n\n", artifact.title));
            if !artifact.summary.is_empty() {
                out.push_str(&format!("{}\n\n", artifact.summary));
            }
            out.push_str("## Goals\n");
            for goal in &artifact.goals {
                out.push_str(&format!("- {goal}\n"));
            }
            out.push_str("\n## Functional requirements\n");
            for requirement in &artifact.requirements {
                out.push_str(&format!("- {}: {}\n", requirement.id, requirement.description));
            }
            out.push('\n');
        }
        None => {
            out.push_str(&format!(
                "No draft could be produced this time. Try again with \
                `draftloop resume {session_id} --feedback \"...\"`.\n\n"
            ));
        }
    }

    if view.terminated {
        out.push_str("Approved. The version above is final.\n");
    } else if !view.awaiting_human {
        out.push_str(&format!(
            "This session was interrupted before reaching a checkpoint. Continue it with \
            `draftloop reply {session_id}`.\n"
        ));
    } else if view.awaiting_human {
        if !view.review_feedback.is_empty() {
            out.push_str(&format!(
                "Reviewer notes (revision {}): {}\n",
                view.revision_count, view.review_feedback
            ));
        }
        out.push_str(&format!(
            "Waiting for your decision. Approve with `draftloop reply {session_id} ok`, or \
            describe the changes with `draftloop reply {session_id} \"...\"`.\n"
        ));
    }
    out
}

/// Stands in for the stage commands when a subcommand never runs a stage.
struct MissingCommand;

#[async_trait]
impl Drafter for MissingCommand {
    async fn draft(&self, _state: &WorkflowState) -> std::result::Result<Artifact, DraftFailure> {
        Err(DraftFailure::Adapter("no drafter command configured".into()))
    }
}

#[async_trait]
impl Reviewer for MissingCommand {
    async fn review(
        &self,
        _state: &WorkflowState,
    ) -> std::result::Result<ReviewOutcome, ReviewFailure> {
        Err(ReviewFailure::Adapter("no reviewer command configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use draftloop_workflow::Requirement;
    use draftloop_workflow::ReviewVerdict;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[clap(flatten)]
        global: GlobalArgs,

        #[command(subcommand)]
        action: WorkflowSubcommand,
    }

    fn parse(args: &[&str]) -> Result<TestCli, clap::Error> {
        TestCli::try_parse_from(std::iter::once("draftloop").chain(args.iter().copied()))
    }

    fn view(artifact: Option<Artifact>, awaiting_human: bool, terminated: bool) -> SuspendedView {
        SuspendedView {
            artifact,
            awaiting_human,
            terminated,
            revision_count: 1,
            review_verdict: Some(ReviewVerdict::Approved),
            review_feedback: String::new(),
        }
    }

    fn artifact() -> Artifact {
        Artifact {
            title: "Drone delivery".into(),
            summary: "Parcels by air.".into(),
            goals: vec!["Same-day delivery".into()],
            requirements: vec![Requirement {
                id: "FR-1".into(),
                description: "Track each parcel".into(),
            }],
        }
    }

    #[test]
    fn resume_requires_a_decision() {
        assert!(parse(&["resume", "s1"]).is_err());
        assert!(parse(&["resume", "s1", "--approve", "--feedback", "more"]).is_err());
    }

    #[test]
    fn resume_flags_map_to_decisions() {
        let cli = parse(&["resume", "s1", "--feedback", "add pricing"]).expect("parse");
        let WorkflowSubcommand::Resume(args) = cli.action else {
            panic!("expected resume");
        };
        assert_eq!(args.decision(), HumanDecision::revise("add pricing"));

        let cli = parse(&["resume", "s1", "--approve"]).expect("parse");
        let WorkflowSubcommand::Resume(args) = cli.action else {
            panic!("expected resume");
        };
        assert_eq!(args.decision(), HumanDecision::approve());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = parse(&["show", "s1", "--json", "--store-dir", "/tmp/sessions"]).expect("parse");
        assert!(cli.global.json);
        assert_eq!(cli.global.store_dir, Some(PathBuf::from("/tmp/sessions")));
        assert!(matches!(cli.action, WorkflowSubcommand::Show(args) if args.session == "s1"));
    }

    #[test]
    fn reply_text_defaults_to_empty() {
        let cli = parse(&["reply", "s1"]).expect("parse");
        let WorkflowSubcommand::Reply(args) = cli.action else {
            panic!("expected reply");
        };
        assert_eq!(args.text, "");
    }

    #[test]
    fn renders_checkpoint_with_reviewer_notes() {
        let mut view = view(Some(artifact()), true, false);
        view.review_feedback = "Tighten the goals.".into();
        let rendered = render_view("s1", &view);
        assert_eq!(
            rendered,
            "# Drone delivery\n\n\
            Parcels by air.\n\n\
            ## Goals\n\
            - Same-day delivery\n\n\
            ## Functional requirements\n\
            - FR-1: Track each parcel\n\n\
            Reviewer notes (revision 1): Tighten the goals.\n\
            Waiting for your decision. Approve with `draftloop reply s1 ok`, or \
            describe the changes with `draftloop reply s1 \"...\"`.\n"
        );
    }

    #[test]
    fn renders_missing_artifact_as_retry_prompt() {
        let rendered = render_view("s1", &view(None, true, false));
        assert!(rendered.starts_with("No draft could be produced this time."));
        assert!(rendered.contains("draftloop resume s1 --feedback"));
    }

    #[test]
    fn renders_terminated_session_as_final() {
        let rendered = render_view("s1", &view(Some(artifact()), false, true));
        assert!(rendered.ends_with("Approved. The version above is final.\n"));
        assert!(!rendered.contains("Waiting for your decision"));
    }

    #[test]
    fn renders_interrupted_session_with_a_way_forward() {
        let rendered = render_view("s1", &view(Some(artifact()), false, false));
        assert!(rendered.ends_with(
            "This session was interrupted before reaching a checkpoint. Continue it with \
            `draftloop reply s1`.\n"
        ));
    }

    #[tokio::test]
    async fn missing_command_reports_configuration() {
        let state = WorkflowState::initialize("brief");
        let err = MissingCommand.draft(&state).await.unwrap_err();
        assert_eq!(
            err,
            DraftFailure::Adapter("no drafter command configured".into())
        );
    }

    #[test]
    fn required_command_names_the_missing_stage() {
        let err = required_command(None, "reviewer").unwrap_err();
        assert!(err.to_string().contains("no reviewer command configured"));
    }
}
