use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::debug;

use crate::artifact::{ConfigArtifact, Phase};
use crate::cmd::{Invocation, ToolResult, ToolRunner};
use crate::context::RunContext;
use crate::error::{ProvisionError, ProvisionResult};
use crate::rollback::Rollback;

/// Everything a step may touch on the host: external tools and the
/// filesystem. Every destructive write goes through the rollback
/// generator first, and every tool result is kept for the step's
/// transcript.
pub struct Host<'a> {
    tools: &'a dyn ToolRunner,
    rollback: Rollback,
    transcript: Vec<ToolResult>,
}

impl<'a> Host<'a> {
    #[must_use]
    pub fn new(tools: &'a dyn ToolRunner, rollback: Rollback) -> Self {
        Self {
            tools,
            rollback,
            transcript: Vec::new(),
        }
    }

    /// Run a command, recording its result whatever the exit code.
    pub fn invoke(&mut self, invocation: &Invocation) -> ProvisionResult<ToolResult> {
        let result = self.tools.invoke(invocation)?;
        self.transcript.push(result.clone());
        Ok(result)
    }

    /// Run a command that must exit zero.
    pub fn run(&mut self, invocation: &Invocation) -> ProvisionResult<ToolResult> {
        self.invoke(invocation)?.check()
    }

    /// Shorthand for [`Self::run`] without stdin or env.
    pub fn exec(&mut self, program: &str, args: &[&str]) -> ProvisionResult<ToolResult> {
        self.run(&Invocation::new(program, args))
    }

    /// Run a read-only check; a non-zero exit means "no".
    pub fn succeeds(&mut self, program: &str, args: &[&str]) -> ProvisionResult<bool> {
        Ok(self.invoke(&Invocation::new(program, args))?.success())
    }

    /// Write an artifact atomically, backing up the previous content
    /// first.
    pub fn write(&mut self, ctx: &RunContext, artifact: &ConfigArtifact) -> ProvisionResult<()> {
        if artifact.phase == Phase::PostTls && !ctx.proxy_state.is_issued() {
            return Err(ProvisionError::TlsNotIssued(ctx.domain.clone()));
        }

        let path = artifact.path();
        if let Some(parent) = path.parent() {
            self.create_dir(parent)?;
        }
        self.rollback.before_write(path)?;

        let file_name = path
            .file_name()
            .map_or_else(|| "artifact".into(), |n| n.to_string_lossy().into_owned());
        let tmp = path.with_file_name(format!(".{file_name}.tmp"));

        std::fs::write(&tmp, &artifact.content).map_err(|e| ProvisionError::write(&tmp, e))?;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(artifact.mode))
            .map_err(|e| ProvisionError::write(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| ProvisionError::write(path, e))?;
        if let Some((user, group)) = &artifact.owner {
            self.exec("chown", &[&format!("{user}:{group}"), &path.to_string_lossy()])?;
        }

        debug!("wrote {} ({:?})", path.display(), artifact.phase);
        Ok(())
    }

    pub fn create_dir(&mut self, dir: &Path) -> ProvisionResult<()> {
        if dir.is_dir() {
            return Ok(());
        }
        self.rollback.before_create_dir(dir)?;
        std::fs::create_dir_all(dir).map_err(|e| ProvisionError::write(dir, e))
    }

    /// Point `link` at `target`, replacing whatever was there.
    pub fn symlink(&mut self, target: &Path, link: &Path) -> ProvisionResult<()> {
        if std::fs::read_link(link).is_ok_and(|t| t == target) {
            return Ok(());
        }
        if let Some(parent) = link.parent() {
            self.create_dir(parent)?;
        }
        self.rollback.before_write(link)?;
        if std::fs::symlink_metadata(link).is_ok() {
            std::fs::remove_file(link).map_err(|e| ProvisionError::write(link, e))?;
        }
        std::os::unix::fs::symlink(target, link).map_err(|e| ProvisionError::write(link, e))
    }

    /// Hand over the tool results gathered since the last call.
    pub fn take_transcript(&mut self) -> Vec<ToolResult> {
        std::mem::take(&mut self.transcript)
    }

    #[must_use]
    pub const fn rollback(&self) -> &Rollback {
        &self.rollback
    }
}
