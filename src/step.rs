use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cmd::ToolResult;
use crate::context::RunContext;
use crate::error::ProvisionResult;
use crate::host::Host;
use crate::rollback::Undo;

/// A named, idempotent unit of provisioning work.
///
/// Idempotency is the step's own job: `is_applied` must report
/// `true` once `apply` has produced the desired end state, and must
/// not mutate anything.
pub trait Step {
    /// Unique identifier within a registry.
    fn id(&self) -> &str;

    /// Steps that must be registered (and therefore run) before this
    /// one.
    fn requires(&self) -> &[&str] {
        &[]
    }

    /// One-line description of what `apply` does, used for dry runs.
    fn describe(&self, ctx: &RunContext) -> String;

    fn is_applied(&self, ctx: &RunContext, host: &mut Host<'_>) -> ProvisionResult<bool>;

    fn apply(&self, ctx: &mut RunContext, host: &mut Host<'_>) -> ProvisionResult<()>;

    /// Shell commands undoing this step, beyond restoring the files
    /// it wrote.
    fn rollback(&self, _ctx: &RunContext) -> Undo {
        Undo::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    SkippedAlreadyApplied,
    Succeeded,
    Failed,
}

/// Outcome of one step in one run.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: String,
    pub status: StepStatus,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tools: Vec<ToolResult>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StepResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status != StepStatus::Failed
    }
}
