use crate::engine::DEFAULT_MAX_REVISIONS;
use crate::engine::EngineConfig;
use crate::engine::RevisionPolicy;
use crate::session::CommandSpec;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowConfig {
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,
    #[serde(default)]
    pub revision_policy: RevisionPolicy,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub drafter: Option<CommandSpec>,
    #[serde(default)]
    pub reviewer: Option<CommandSpec>,
}

fn default_max_revisions() -> u32 {
    DEFAULT_MAX_REVISIONS
}

fn default_stage_timeout_secs() -> u64 {
    DEFAULT_STAGE_TIMEOUT_SECS
}

impl WorkflowConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read workflow config {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut config: WorkflowConfig = match ext.as_str() {
            "yml" | "yaml" => serde_yaml::from_str(&contents).context("parse workflow config")?,
            "toml" | "tml" => toml::from_str(&contents).context("parse workflow config")?,
            _ => serde_yaml::from_str(&contents)
                .or_else(|_| toml::from_str(&contents))
                .context("parse workflow config (yaml or toml)")?,
        };
        config.source_path = Some(path.to_path_buf());
        config.resolve_paths();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.stage_timeout_secs == 0 {
            anyhow::bail!("stage_timeout_secs must be greater than zero");
        }
        for (name, command) in [("drafter", &self.drafter), ("reviewer", &self.reviewer)] {
            if let Some(command) = command
                && command.program.as_os_str().is_empty()
            {
                anyhow::bail!("{name} command must name a program");
            }
        }
        Ok(())
    }

    /// Relative paths in the file are taken relative to the file itself.
    fn resolve_paths(&mut self) {
        let base = self.config_dir();
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(dir) = self.store_dir.as_mut() {
            resolve(dir);
        }
        if let Some(dir) = self.log_dir.as_mut() {
            resolve(dir);
        }
        for command in [self.drafter.as_mut(), self.reviewer.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Some(dir) = command.working_dir.as_mut() {
                resolve(dir);
            }
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.source_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_revisions: self.max_revisions,
            policy: self.revision_policy,
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            source_path: None,
            max_revisions: DEFAULT_MAX_REVISIONS,
            revision_policy: RevisionPolicy::Global,
            stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
            store_dir: None,
            log_dir: None,
            drafter: None,
            reviewer: None,
        }
    }
}
