use clap::Parser;
use tracing_subscriber::EnvFilter;

mod workflow_cmd;

use workflow_cmd::GlobalArgs;
use workflow_cmd::WorkflowSubcommand;

/// Drafts a project description from a brief, has it reviewed automatically,
/// and hands it to you for approval.
#[derive(Debug, Parser)]
#[command(name = "draftloop", version)]
struct Cli {
    #[clap(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    action: WorkflowSubcommand,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    workflow_cmd::execute(cli.global, cli.action).await
}
