use anyhow::Context;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub description: String,
}

/// The document under construction. Replaced wholesale by every draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

impl Artifact {
    /// Rejects artifacts whose requirement ids are empty or repeated.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for requirement in &self.requirements {
            let id = requirement.id.trim();
            if id.is_empty() {
                anyhow::bail!("requirement with empty id in artifact {:?}", self.title);
            }
            if !seen.insert(id) {
                anyhow::bail!("duplicate requirement id {id}");
            }
        }
        Ok(())
    }

    pub fn requirement(&self, id: &str) -> Option<&Requirement> {
        self.requirements.iter().find(|req| req.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    #[serde(alias = "ok", alias = "OK", alias = "APPROVED")]
    Approved,
    #[serde(alias = "revise", alias = "REVISE", alias = "NEEDS_REVISION")]
    NeedsRevision,
}

/// The record threaded through every stage of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub brief: String,
    pub artifact: Option<Artifact>,
    #[serde(default)]
    pub review_feedback: String,
    pub review_verdict: Option<ReviewVerdict>,
    pub revision_count: u32,
    #[serde(default)]
    pub human_feedback: String,
    /// `false` after an approval. Kept under this name for the routing table.
    #[serde(default)]
    pub human_gave_feedback: bool,
    /// `revision_count` at the start of the current human round.
    #[serde(default)]
    pub round_base: u32,
}

impl WorkflowState {
    pub fn initialize(brief: impl Into<String>) -> Self {
        Self {
            brief: brief.into(),
            artifact: None,
            review_feedback: String::new(),
            review_verdict: None,
            revision_count: 0,
            human_feedback: String::new(),
            human_gave_feedback: false,
            round_base: 0,
        }
    }

    /// Revisions spent since the last human revision request.
    pub fn revisions_this_round(&self) -> u32 {
        self.revision_count.saturating_sub(self.round_base)
    }
}

/// Stage the session will run next. `HumanCheckpoint` means the session is
/// suspended waiting for a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Draft,
    Review,
    Increment,
    HumanCheckpoint,
    Terminated,
}

impl Stage {
    /// Stages the engine never runs on its own.
    pub fn is_stopping_point(self) -> bool {
        matches!(self, Stage::HumanCheckpoint | Stage::Terminated)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Draft => "draft",
            Stage::Review => "review",
            Stage::Increment => "increment",
            Stage::HumanCheckpoint => "human_checkpoint",
            Stage::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub state: WorkflowState,
    pub cursor: Stage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, brief: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            state: WorkflowState::initialize(brief),
            cursor: Stage::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.cursor == Stage::Terminated
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read session record {}", path.display()))?;
        let record: SessionRecord =
            serde_json::from_str(&data).context("parse session record json")?;
        Ok(record)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp_path = tmp_path(path);
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp_path, data)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to persist {}", path.display()))?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let mut file_name = path
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    file_name.push(".tmp");
    tmp.set_file_name(file_name);
    tmp
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn artifact(ids: &[&str]) -> Artifact {
        Artifact {
            title: "Drone delivery".into(),
            summary: "Parcels by air".into(),
            goals: vec!["Deliver within 30 minutes".into()],
            requirements: ids
                .iter()
                .map(|id| Requirement {
                    id: (*id).to_string(),
                    description: format!("requirement {id}"),
                })
                .collect(),
        }
    }

    #[test]
    fn initializes_empty_state() {
        let state = WorkflowState::initialize("delivery-by-drone service");
        assert_eq!(state.brief, "delivery-by-drone service");
        assert_eq!(state.artifact, None);
        assert_eq!(state.review_verdict, None);
        assert_eq!(state.revision_count, 0);
        assert!(!state.human_gave_feedback);
        assert!(state.human_feedback.is_empty());
    }

    #[test]
    fn duplicate_requirement_ids_are_rejected() {
        assert!(artifact(&["FR-1", "FR-2"]).validate().is_ok());
        let err = artifact(&["FR-1", "FR-1"]).validate().unwrap_err();
        assert!(err.to_string().contains("duplicate requirement id FR-1"));
        assert!(artifact(&[" "]).validate().is_err());
    }

    #[test]
    fn record_survives_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("s1.json");
        let mut record = SessionRecord::new("s1", "brief");
        record.state.artifact = Some(artifact(&["FR-1"]));
        record.cursor = Stage::HumanCheckpoint;
        record.save(&path).expect("save");

        assert!(!tmp_path(&path).exists());
        let loaded = SessionRecord::load(&path).expect("load");
        assert_eq!(loaded, record);
    }

    #[test]
    fn stage_serializes_as_snake_case() {
        let json = serde_json::to_string(&Stage::HumanCheckpoint).expect("serialize");
        assert_eq!(json, "\"human_checkpoint\"");
        assert_eq!(Stage::HumanCheckpoint.to_string(), "human_checkpoint");
    }
}
