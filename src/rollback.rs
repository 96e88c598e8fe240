//! Rollback script generation.
//!
//! The script is written before the first mutation and rewritten
//! after every new backup, so it is runnable however far a run got.

use std::fmt::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use indexmap::IndexMap;
use tracing::debug;
use uuid::Uuid;

use crate::context::RunContext;
use crate::error::{ProvisionError, ProvisionResult};

/// State of a path before this run first touched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreImage {
    Absent,
    /// Regular file, copied to the given location.
    File(PathBuf),
    Symlink(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub original: PathBuf,
    pub pre_image: PreImage,
    pub run_id: Uuid,
}

/// Shell commands undoing a step, beyond restoring the files it
/// wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Undo {
    /// Run while the step's files are still in place.
    pub before_restore: Vec<String>,
    /// Run once every file has been restored.
    pub after_restore: Vec<String>,
}

impl Undo {
    #[must_use]
    pub fn before(mut self, cmd: impl Into<String>) -> Self {
        self.before_restore.push(cmd.into());
        self
    }

    /// Delete `path` ahead of the file restores.
    #[must_use]
    pub fn remove(self, path: &Path) -> Self {
        let cmd = format!("rm -f -- {}", quote(path));
        self.before(cmd)
    }

    #[must_use]
    pub fn after(mut self, cmd: impl Into<String>) -> Self {
        self.after_restore.push(cmd.into());
        self
    }
}

/// Undo commands contributed by one registered step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepUndo {
    pub step: String,
    pub undo: Undo,
}

#[derive(Debug)]
pub struct Rollback {
    run_id: Uuid,
    domain: String,
    backup_dir: PathBuf,
    script_path: Option<PathBuf>,
    step_undo: Vec<StepUndo>,
    backups: IndexMap<PathBuf, BackupRecord>,
    created_dirs: Vec<PathBuf>,
}

impl Rollback {
    #[must_use]
    pub fn new(run_id: Uuid, domain: &str, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id,
            domain: domain.to_string(),
            backup_dir: backup_dir.into(),
            script_path: None,
            step_undo: Vec::new(),
            backups: IndexMap::new(),
            created_dirs: Vec::new(),
        }
    }

    /// Generator for the run described by `ctx`, backing files up
    /// under the layout's per-run backup directory.
    #[must_use]
    pub fn for_run(ctx: &RunContext) -> Self {
        Self::new(ctx.run_id, &ctx.domain, ctx.layout.backup_dir(ctx.run_id))
    }

    /// Keep the script on disk at `path`, rewriting it on every
    /// change.
    #[must_use]
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn script_path(&self) -> Option<&Path> {
        self.script_path.as_deref()
    }

    /// Install the static, per-step undo commands (in registration
    /// order).
    pub fn set_step_undo(&mut self, undo: Vec<StepUndo>) {
        self.step_undo = undo;
    }

    pub fn records(&self) -> impl Iterator<Item = &BackupRecord> {
        self.backups.values()
    }

    #[must_use]
    pub fn created_dirs(&self) -> &[PathBuf] {
        &self.created_dirs
    }

    /// Capture the pre-image of `path` unless this run already did.
    pub fn before_write(&mut self, path: &Path) -> ProvisionResult<()> {
        if self.backups.contains_key(path) {
            return Ok(());
        }

        let pre_image = match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                PreImage::Symlink(std::fs::read_link(path)?)
            }
            Ok(_) => {
                std::fs::create_dir_all(&self.backup_dir)?;
                let name = path
                    .file_name()
                    .map_or_else(|| "file".into(), |n| n.to_string_lossy().into_owned());
                let copy = self
                    .backup_dir
                    .join(format!("{:03}-{name}", self.backups.len() + 1));
                std::fs::copy(path, &copy)?;
                PreImage::File(copy)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PreImage::Absent,
            Err(e) => return Err(ProvisionError::Io(e)),
        };

        debug!("backup of {}: {pre_image:?}", path.display());
        self.backups.insert(
            path.to_path_buf(),
            BackupRecord {
                original: path.to_path_buf(),
                pre_image,
                run_id: self.run_id,
            },
        );
        self.persist()
    }

    /// Record that `dir` is about to be created. Only the outermost
    /// missing ancestor is recorded.
    pub fn before_create_dir(&mut self, dir: &Path) -> ProvisionResult<()> {
        let mut outermost = None;
        for ancestor in dir.ancestors() {
            if ancestor.as_os_str().is_empty() || ancestor.exists() {
                break;
            }
            outermost = Some(ancestor);
        }

        match outermost {
            Some(d) if !self.created_dirs.iter().any(|c| d.starts_with(c)) => {
                self.created_dirs.push(d.to_path_buf());
                self.persist()
            }
            _ => Ok(()),
        }
    }

    /// Render the rollback script.
    ///
    /// Each step's early undo commands run first, newest step first.
    /// Then every backed-up path is restored (or deleted when it did
    /// not exist) and directories created by the run are removed.
    /// Commands that need the restored files, such as service
    /// reloads, come last.
    #[must_use]
    pub fn emit_script(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "#!/bin/sh");
        let _ = writeln!(
            out,
            "# Rollback for provisioning run {} ({})",
            self.run_id, self.domain
        );
        let _ = writeln!(out, "# Generated {}", Utc::now().to_rfc3339());
        let _ = writeln!(out, "set -u");

        for s in self.step_undo.iter().rev().filter(|s| !s.undo.before_restore.is_empty()) {
            let _ = writeln!(out);
            let _ = writeln!(out, "echo {}", quote_str(&format!("Undoing step: {}", s.step)));
            for cmd in &s.undo.before_restore {
                let _ = writeln!(out, "{cmd}");
            }
        }

        if !self.backups.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "echo 'Restoring files'");
            for record in self.backups.values().rev() {
                let target = quote(&record.original);
                let line = match &record.pre_image {
                    PreImage::Absent => format!("rm -f -- {target}"),
                    PreImage::File(copy) => format!("cp -p -- {} {target}", quote(copy)),
                    PreImage::Symlink(dest) => format!("ln -sfn -- {} {target}", quote(dest)),
                };
                let _ = writeln!(out, "{line}");
            }
        }

        if !self.created_dirs.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "echo 'Removing created directories'");
            for dir in self.created_dirs.iter().rev() {
                let _ = writeln!(out, "rm -rf -- {}", quote(dir));
            }
        }

        let mut after = self
            .step_undo
            .iter()
            .rev()
            .flat_map(|s| &s.undo.after_restore)
            .peekable();
        if after.peek().is_some() {
            let _ = writeln!(out);
            let _ = writeln!(out, "echo 'Reloading services'");
            for cmd in after {
                let _ = writeln!(out, "{cmd}");
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "echo 'Rollback complete'");
        out
    }

    /// Write the script to its configured location, if any.
    pub fn persist(&self) -> ProvisionResult<()> {
        let Some(path) = &self.script_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ProvisionError::write(parent, e))?;
        }
        std::fs::write(path, self.emit_script()).map_err(|e| ProvisionError::write(path, e))?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| ProvisionError::write(path, e))
    }
}

fn quote(path: &Path) -> String {
    quote_str(&path.to_string_lossy())
}

fn quote_str(s: &str) -> String {
    shlex::try_quote(s).map_or_else(|_| format!("'{s}'"), std::borrow::Cow::into_owned)
}
