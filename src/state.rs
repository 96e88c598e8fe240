//! Run-scoped state on disk: the append-only run log and the run
//! lock.

use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use rustix::fs::{FlockOperation, flock};
use rustix::io::Errno;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::{ProvisionError, ProvisionResult};
use crate::step::StepResult;

#[derive(Serialize)]
struct LogLine<'a> {
    run_id: Uuid,
    #[serde(flatten)]
    result: &'a StepResult,
}

/// Append-only JSON-lines log of step results.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    lost: Cell<u32>,
}

impl RunLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lost: Cell::new(0),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of results that could not be written.
    #[must_use]
    pub fn lost(&self) -> u32 {
        self.lost.get()
    }

    /// Append one result. A log that cannot be written does not fail
    /// the step that produced the result; it is counted in
    /// [`Self::lost`].
    pub fn append(&self, run_id: Uuid, result: &StepResult) {
        if let Err(e) = self.try_append(run_id, result) {
            warn!("cannot write run log {}: {e}", self.path.display());
            self.lost.set(self.lost.get() + 1);
        }
    }

    fn try_append(&self, run_id: Uuid, result: &StepResult) -> ProvisionResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(&LogLine { run_id, result })?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Exclusive lock held for the duration of a run.
///
/// The lock is an advisory `flock` on the lock file, so the kernel
/// drops it when the process exits however it exits. The file itself
/// stays behind; its content is the PID of the last holder.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _file: File,
}

impl RunLock {
    /// Take the lock, failing if another process holds it.
    pub fn acquire(path: impl Into<PathBuf>) -> ProvisionResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        flock(&file, FlockOperation::NonBlockingLockExclusive).map_err(|e| {
            if e == Errno::WOULDBLOCK {
                ProvisionError::Locked(path.clone())
            } else {
                ProvisionError::Io(e.into())
            }
        })?;

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path, _file: file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
