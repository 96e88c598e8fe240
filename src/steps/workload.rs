use std::time::Duration;

use tracing::{info, warn};

use crate::artifact::ConfigArtifact;
use crate::cmd::Invocation;
use crate::compose;
use crate::context::RunContext;
use crate::error::{ProvisionError, ProvisionResult};
use crate::host::Host;
use crate::probe::{DEFAULT_ACCEPT, Probe, Readiness, wait_until_ready};
use crate::rollback::Undo;
use crate::secrets;
use crate::step::Step;
use crate::workload::Workload;

/// Writes the compose manifest and `.env`, starts the gateway and
/// waits until it answers.
pub struct WorkloadStep {
    probe: Box<dyn Probe>,
    accept: Vec<u16>,
    timeout: Duration,
    poll_interval: Duration,
}

impl WorkloadStep {
    #[must_use]
    pub fn new(probe: Box<dyn Probe>) -> Self {
        Self {
            probe,
            accept: DEFAULT_ACCEPT.to_vec(),
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn accept(mut self, codes: &[u16]) -> Self {
        self.accept = codes.to_vec();
        self
    }

    fn artifacts(ctx: &RunContext) -> ProvisionResult<[ConfigArtifact; 2]> {
        let workload = Workload::for_context(ctx);
        Ok([
            ConfigArtifact::new(ctx.layout.env_file(), secrets::render(ctx)).mode(0o600),
            ConfigArtifact::new(ctx.layout.compose_file(), compose::render(&workload)?),
        ])
    }
}

fn compose_cmd(ctx: &RunContext, args: &[&str]) -> Invocation {
    let file = ctx.layout.compose_file().to_string_lossy().into_owned();
    let dir = ctx.layout.install_dir.to_string_lossy().into_owned();
    let mut cmd = Invocation::new(
        "docker",
        &["compose", "-f", &file, "--project-directory", &dir],
    );
    for arg in args {
        cmd = cmd.arg(*arg);
    }
    cmd
}

impl Step for WorkloadStep {
    fn id(&self) -> &str {
        "workload"
    }

    fn requires(&self) -> &[&str] {
        &["packages"]
    }

    fn describe(&self, ctx: &RunContext) -> String {
        format!(
            "start {} on 127.0.0.1:{} from {} and wait for {}",
            ctx.image,
            ctx.port,
            ctx.layout.install_dir.display(),
            self.probe.target()
        )
    }

    fn is_applied(&self, ctx: &RunContext, _host: &mut Host<'_>) -> ProvisionResult<bool> {
        if !Self::artifacts(ctx)?.iter().all(ConfigArtifact::matches_disk) {
            return Ok(false);
        }
        Ok(self
            .probe
            .check()
            .is_ok_and(|status| self.accept.contains(&status)))
    }

    fn apply(&self, ctx: &mut RunContext, host: &mut Host<'_>) -> ProvisionResult<()> {
        for artifact in Self::artifacts(ctx)? {
            host.write(ctx, &artifact)?;
        }

        host.run(&compose_cmd(ctx, &["up", "-d", "--remove-orphans"]))?;

        let readiness =
            wait_until_ready(self.probe.as_ref(), &self.accept, self.timeout, self.poll_interval);
        match readiness {
            Readiness::Ready { status, .. } => {
                info!("{} answered {status}", self.probe.target());
                Ok(())
            }
            Readiness::TimedOut {
                waited, last_error, ..
            } => {
                // Keep the container's own output in the transcript
                if let Err(e) = host.invoke(&compose_cmd(ctx, &["logs", "--tail", "50"])) {
                    warn!("cannot collect workload logs: {e}");
                }
                Err(ProvisionError::ReadinessTimeout {
                    target: self.probe.target(),
                    waited,
                    last_error,
                })
            }
        }
    }

    fn rollback(&self, ctx: &RunContext) -> Undo {
        Undo::default().before(compose_cmd(ctx, &["down"]).command_line())
    }
}
