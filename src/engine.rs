//! Step registry and execution engine.
//!
//! Registration order is execution order. A step can only be
//! registered once every step it requires is already registered, so
//! the order is a valid topological order by construction.

use std::time::Instant;

use chrono::Utc;
use tracing::{error, info};

use crate::context::RunContext;
use crate::error::{ProvisionError, ProvisionResult};
use crate::host::Host;
use crate::rollback::StepUndo;
use crate::state::RunLog;
use crate::step::{Step, StepResult, StepStatus};

#[derive(Default)]
pub struct Registry {
    steps: Vec<Box<dyn Step>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step after all of its prerequisites.
    ///
    /// # Errors
    ///
    /// [`ProvisionError::Dependency`] if a prerequisite is not yet
    /// registered, [`ProvisionError::DuplicateStep`] if the id is
    /// taken. Both indicate a wiring bug, not a runtime condition.
    pub fn register(&mut self, step: impl Step + 'static) -> ProvisionResult<()> {
        if self.contains(step.id()) {
            return Err(ProvisionError::DuplicateStep(step.id().to_string()));
        }
        if let Some(missing) = step.requires().iter().find(|r| !self.contains(r)) {
            return Err(ProvisionError::Dependency {
                step: step.id().to_string(),
                missing: (*missing).to_string(),
            });
        }
        self.steps.push(Box::new(step));
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.steps.iter().any(|s| s.id() == id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Static undo commands for every registered step, in
    /// registration order.
    #[must_use]
    pub fn undo_actions(&self, ctx: &RunContext) -> Vec<StepUndo> {
        self.steps
            .iter()
            .map(|s| StepUndo {
                step: s.id().to_string(),
                undo: s.rollback(ctx),
            })
            .collect()
    }
}

/// Runs a registry's steps in order, stopping at the first failure.
pub struct Engine {
    registry: Registry,
    log: Option<RunLog>,
}

impl Engine {
    #[must_use]
    pub const fn new(registry: Registry) -> Self {
        Self {
            registry,
            log: None,
        }
    }

    /// Append every step result to `log` as it is produced.
    #[must_use]
    pub fn with_log(mut self, log: RunLog) -> Self {
        self.log = Some(log);
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub const fn log(&self) -> Option<&RunLog> {
        self.log.as_ref()
    }

    /// Execute every step in registration order.
    ///
    /// Already-applied steps are skipped. With `dry_run`, pending
    /// steps are described and reported as succeeded without being
    /// applied. The first failing step ends the run; the returned
    /// list then stops at that step.
    pub fn run(
        &self,
        ctx: &mut RunContext,
        host: &mut Host<'_>,
        dry_run: bool,
    ) -> Vec<StepResult> {
        let total = self.registry.len();
        let mut results = Vec::with_capacity(total);

        for (i, step) in self.registry.steps.iter().enumerate() {
            let started_at = Utc::now();
            let clock = Instant::now();
            info!("[{}/{total}] {}", i + 1, step.id());

            let outcome = run_step(step.as_ref(), ctx, host, dry_run);

            let (status, error) = match outcome {
                Ok(status) => (status, None),
                Err(e) => {
                    error!("step '{}' failed: {e}", step.id());
                    (StepStatus::Failed, Some(describe_error(&e)))
                }
            };

            let result = StepResult {
                step: step.id().to_string(),
                status,
                dry_run,
                error,
                tools: host.take_transcript(),
                started_at,
                duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            };

            if let Some(log) = &self.log {
                log.append(ctx.run_id, &result);
            }

            let failed = status == StepStatus::Failed;
            results.push(result);
            if failed {
                break;
            }
        }

        results
    }
}

fn run_step(
    step: &dyn Step,
    ctx: &mut RunContext,
    host: &mut Host<'_>,
    dry_run: bool,
) -> ProvisionResult<StepStatus> {
    if step.is_applied(ctx, host)? {
        info!("  already applied, skipping");
        return Ok(StepStatus::SkippedAlreadyApplied);
    }

    if dry_run {
        info!("  would {}", step.describe(ctx));
        return Ok(StepStatus::Succeeded);
    }

    step.apply(ctx, host)?;
    Ok(StepStatus::Succeeded)
}

fn describe_error(e: &ProvisionError) -> String {
    match e.tool_stderr() {
        Some(stderr) => format!("{e}\n{stderr}"),
        None => e.to_string(),
    }
}
