use anyhow::Context;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

/// On-disk arrangement of session records and stage logs.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
    log_root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: PathBuf) -> Self {
        let log_root = root.join("logs");
        Self { root, log_root }
    }

    pub fn with_log_root(mut self, log_root: PathBuf) -> Self {
        self.log_root = log_root;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))
    }

    pub fn session_file(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("session-{}.json", sanitize(session_id)))
    }

    pub fn session_log_dir(&self, session_id: &str) -> PathBuf {
        self.log_root.join(format!("session-{}", sanitize(session_id)))
    }
}

/// Maps an opaque session id to a file-name-safe string. Injective: `_`
/// always starts a two-digit hex escape.
fn sanitize(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("_{byte:02x}")),
        }
    }
    out
}
