use std::path::{Path, PathBuf};

use serde::Serialize;

/// When in the TLS lifecycle an artifact may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    PreTls,
    /// Only valid once a certificate has been issued for the domain.
    PostTls,
    Static,
}

/// A rendered configuration file, ready to be written.
///
/// Writing an artifact replaces the file wholesale; nothing is ever
/// merged into an existing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigArtifact {
    pub path: PathBuf,
    pub content: String,
    pub mode: u32,
    /// `(user, group)` to hand the file to after writing.
    pub owner: Option<(String, String)>,
    pub phase: Phase,
}

impl ConfigArtifact {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, content: String) -> Self {
        Self {
            path: path.into(),
            content,
            mode: 0o644,
            owner: None,
            phase: Phase::Static,
        }
    }

    #[must_use]
    pub const fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn owner(mut self, user: &str, group: &str) -> Self {
        self.owner = Some((user.to_string(), group.to_string()));
        self
    }

    #[must_use]
    pub const fn phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// Whether the file on disk already holds exactly this content.
    #[must_use]
    pub fn matches_disk(&self) -> bool {
        std::fs::read_to_string(&self.path).is_ok_and(|c| c == self.content)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
