//! Stage adapters backed by an external program.
//!
//! Each call spawns the configured command, writes one JSON request to its
//! stdin and reads one JSON response from its stdout. Whatever the program
//! does to produce the answer (call a model, ask a script) is its business.

use crate::stages::DraftFailure;
use crate::stages::Drafter;
use crate::stages::ReviewFailure;
use crate::stages::ReviewOutcome;
use crate::stages::Reviewer;
use crate::state::Artifact;
use crate::state::Stage;
use crate::state::WorkflowState;
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use textwrap::wrap;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use tracing::warn;

/// Program and arguments for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct StageLauncher {
    command: CommandSpec,
    log_dir: Option<PathBuf>,
}

impl StageLauncher {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            log_dir: None,
        }
    }

    /// Write a transcript of every call under `log_dir`.
    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.log_dir = Some(log_dir);
        self
    }

    pub async fn run(&self, request: StageRequest<'_>) -> anyhow::Result<StageResult> {
        let program = &self.command.program;
        let payload = serde_json::to_vec(&request).context("serialize stage request")?;

        let mut cmd = Command::new(program);
        cmd.args(&self.command.args);
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to run {}", program.display()))?;
        // Stdin is fed while stdout is drained. A program may answer without
        // reading its request at all.
        let stdin = child.stdin.take();
        let write_request = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&payload).await {
                Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };
        let (written, output) = tokio::join!(write_request, child.wait_with_output());
        let output = output.with_context(|| format!("failed to wait for {}", program.display()))?;
        written.with_context(|| format!("failed to write request to {}", program.display()))?;

        if let Some(log_dir) = &self.log_dir {
            let log_path = stage_log_file(log_dir, request.stage, request.revision);
            if let Err(err) = write_log(&log_path, request.prompt, &output) {
                warn!(path = %log_path.display(), "failed to write stage log: {err:#}");
            }
        }

        let status_code = output.status.code();
        debug!(
            program = %program.display(),
            stage = %request.stage,
            ?status_code,
            "stage command finished"
        );
        Ok(StageResult {
            success: output.status.success(),
            status_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

fn stage_log_file(log_dir: &Path, stage: Stage, revision: u32) -> PathBuf {
    log_dir.join(format!("{stage}-{revision:03}.log"))
}

fn write_log(log_path: &Path, prompt: &str, output: &std::process::Output) -> anyhow::Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    // Appended: a session id reused after termination keeps earlier runs.
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;
    use std::io::Write;
    writeln!(file, "# Run at {}", Utc::now().to_rfc3339())?;
    writeln!(file)?;
    writeln!(file, "# Prompt")?;
    writeln!(file, "{prompt}")?;
    writeln!(file)?;
    writeln!(file, "# Exit Status: {:?}", output.status.code())?;
    writeln!(file)?;
    writeln!(file, "## STDOUT")?;
    file.write_all(&output.stdout)?;
    if !output.stdout.ends_with(b"\n") {
        writeln!(file)?;
    }
    writeln!(file)?;
    writeln!(file, "## STDERR")?;
    file.write_all(&output.stderr)?;
    writeln!(file)?;
    Ok(())
}

/// Body written to the stage program's stdin.
#[derive(Debug, Serialize)]
pub struct StageRequest<'a> {
    pub stage: Stage,
    pub revision: u32,
    pub prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<&'a WorkflowState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<&'a Artifact>,
}

#[derive(Debug, Clone)]
pub struct StageResult {
    pub success: bool,
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StageResult {
    fn failure_summary(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exited with status {:?}", self.status_code)
        } else {
            format!("exited with status {:?}: {stderr}", self.status_code)
        }
    }
}

/// Parses the JSON object a stage printed. Text around the outermost braces
/// is ignored, since wrappers around model CLIs tend to chatter.
fn parse_response<T: DeserializeOwned>(stdout: &str) -> anyhow::Result<T> {
    let trimmed = stdout.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str(&trimmed[start..=end]).context("parse stage response json")
        }
        _ => anyhow::bail!("stage printed no JSON object"),
    }
}

#[derive(Debug, Clone)]
pub struct CommandDrafter {
    launcher: StageLauncher,
}

impl CommandDrafter {
    pub fn new(launcher: StageLauncher) -> Self {
        Self { launcher }
    }
}

#[async_trait]
impl Drafter for CommandDrafter {
    async fn draft(&self, state: &WorkflowState) -> Result<Artifact, DraftFailure> {
        let prompt = build_draft_prompt(state);
        let request = StageRequest {
            stage: Stage::Draft,
            revision: state.revision_count,
            prompt: &prompt,
            state: Some(state),
            artifact: None,
        };
        let result = self
            .launcher
            .run(request)
            .await
            .map_err(|err| DraftFailure::Adapter(format!("{err:#}")))?;
        if !result.success {
            return Err(DraftFailure::Adapter(result.failure_summary()));
        }
        parse_response(&result.stdout)
            .map_err(|err| DraftFailure::InvalidArtifact(format!("{err:#}")))
    }
}

#[derive(Debug, Clone)]
pub struct CommandReviewer {
    launcher: StageLauncher,
}

impl CommandReviewer {
    pub fn new(launcher: StageLauncher) -> Self {
        Self { launcher }
    }
}

#[async_trait]
impl Reviewer for CommandReviewer {
    async fn review(&self, state: &WorkflowState) -> Result<ReviewOutcome, ReviewFailure> {
        let Some(artifact) = state.artifact.as_ref() else {
            return Err(ReviewFailure::Adapter("no artifact to review".to_string()));
        };
        let prompt = build_review_prompt(artifact);
        let request = StageRequest {
            stage: Stage::Review,
            revision: state.revision_count,
            prompt: &prompt,
            state: None,
            artifact: Some(artifact),
        };
        let result = self
            .launcher
            .run(request)
            .await
            .map_err(|err| ReviewFailure::Adapter(format!("{err:#}")))?;
        if !result.success {
            return Err(ReviewFailure::Adapter(result.failure_summary()));
        }
        parse_response(&result.stdout)
            .map_err(|err| ReviewFailure::InvalidVerdict(format!("{err:#}")))
    }
}

pub fn build_draft_prompt(state: &WorkflowState) -> String {
    let mut sections = vec![
        "You are an experienced business analyst. Turn the project idea below into a \
        structured description: a title, a short summary, one or two measurable goals, and \
        functional requirements with ids FR-1, FR-2, ... Requirements describe what the \
        system does for its users, never how it is implemented."
            .to_string(),
        format!("Project idea:\n{}", state.brief),
    ];
    if state.artifact.is_some() {
        sections.push(
            "Update the current version below to address the remarks that follow. Do not \
            rewrite it from scratch. Keep every requirement, and its id, that the remarks do \
            not contradict."
                .to_string(),
        );
    }
    if !state.review_feedback.trim().is_empty() {
        sections.push(format!(
            "The previous version was rejected by the reviewer.\nReviewer remarks: {}",
            state.review_feedback.trim()
        ));
    }
    if !state.human_feedback.trim().is_empty() {
        sections.push(format!(
            "Comment from the user: {}\nApply the changes the user asked for.",
            state.human_feedback.trim()
        ));
    }
    sections.push(
        "Reply with a single JSON object with the fields title, summary, goals and \
        requirements (a list of objects with id and description)."
            .to_string(),
    );

    let mut prompt = wrap_sections(&sections);
    if let Some(artifact) = &state.artifact {
        prompt.push_str("\n\nCurrent version:\n");
        prompt.push_str(&artifact_json(artifact));
    }
    prompt
}

pub fn build_review_prompt(artifact: &Artifact) -> String {
    let sections = vec![
        "You are a senior business analyst validating the functional requirements of a \
        project. Requirements must describe behaviour of the system, not its implementation."
            .to_string(),
        "Ask for a revision if any requirement names technologies or implementation details \
        (databases, programming languages, endpoints, data formats on the wire), if it uses \
        vague wording such as \"fast\", \"convenient\" or \"nice looking\" instead of a \
        concrete scenario or measurable criterion, or if any section (title, summary, goals, \
        requirements) is empty."
            .to_string(),
        "Reply with a single JSON object: {\"verdict\": \"approved\"} when every rule holds, \
        otherwise {\"verdict\": \"needs_revision\", \"feedback\": \"...\"} explaining each \
        defect."
            .to_string(),
    ];
    let mut prompt = wrap_sections(&sections);
    prompt.push_str("\n\nArtifact:\n");
    prompt.push_str(&artifact_json(artifact));
    prompt
}

fn artifact_json(artifact: &Artifact) -> String {
    serde_json::to_string_pretty(artifact).unwrap_or_else(|_| format!("{artifact:?}"))
}

fn wrap_sections(sections: &[String]) -> String {
    let mut result = String::new();
    for section in sections {
        let wrapped = wrap(section, 100);
        for line in wrapped {
            result.push_str(line.trim_end());
            result.push('\n');
        }
        result.push('\n');
    }
    result.trim().to_string()
}
