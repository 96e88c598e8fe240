use crate::artifact::ConfigArtifact;
use crate::cmd::Invocation;
use crate::context::RunContext;
use crate::error::ProvisionResult;
use crate::host::Host;
use crate::jail;
use crate::rollback::Undo;
use crate::step::Step;

/// Installs the fail2ban jails for the site's logs.
pub struct JailStep;

impl JailStep {
    fn artifact(ctx: &RunContext) -> ConfigArtifact {
        let jails = jail::for_proxy(ctx.proxy_kind, &ctx.layout.error_log(&ctx.domain));
        ConfigArtifact::new(ctx.layout.jail_file(), jail::render(&jails))
    }
}

fn restart() -> Invocation {
    Invocation::new("systemctl", &["restart", "fail2ban"])
}

impl Step for JailStep {
    fn id(&self) -> &str {
        "jail"
    }

    fn requires(&self) -> &[&str] {
        &["proxy"]
    }

    fn describe(&self, ctx: &RunContext) -> String {
        format!("write {} and restart fail2ban", ctx.layout.jail_file().display())
    }

    fn is_applied(&self, ctx: &RunContext, _host: &mut Host<'_>) -> ProvisionResult<bool> {
        Ok(Self::artifact(ctx).matches_disk())
    }

    fn apply(&self, ctx: &mut RunContext, host: &mut Host<'_>) -> ProvisionResult<()> {
        host.write(ctx, &Self::artifact(ctx))?;
        host.run(&restart())?;
        host.exec("fail2ban-client", &["status"])?;
        Ok(())
    }

    fn rollback(&self, _ctx: &RunContext) -> Undo {
        Undo::default().after(restart().command_line())
    }
}
