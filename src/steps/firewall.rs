use crate::cmd::Invocation;
use crate::context::RunContext;
use crate::error::ProvisionResult;
use crate::host::Host;
use crate::rollback::Undo;
use crate::step::Step;

const SSH: &str = "22/tcp";
const WEB: &[&str] = &["80/tcp", "443/tcp"];

/// Opens SSH and web ports and enables ufw.
///
/// ufw rules are idempotent, so the step always applies. Rollback
/// only removes the web rules; SSH stays open.
pub struct FirewallStep;

impl Step for FirewallStep {
    fn id(&self) -> &str {
        "firewall"
    }

    fn requires(&self) -> &[&str] {
        &["packages"]
    }

    fn describe(&self, _ctx: &RunContext) -> String {
        format!("allow {SSH} {} and enable ufw", WEB.join(" "))
    }

    fn is_applied(&self, _ctx: &RunContext, _host: &mut Host<'_>) -> ProvisionResult<bool> {
        Ok(false)
    }

    fn apply(&self, _ctx: &mut RunContext, host: &mut Host<'_>) -> ProvisionResult<()> {
        for port in std::iter::once(&SSH).chain(WEB) {
            host.exec("ufw", &["allow", *port])?;
        }
        host.exec("ufw", &["--force", "enable"])?;
        Ok(())
    }

    fn rollback(&self, _ctx: &RunContext) -> Undo {
        WEB.iter().fold(Undo::default(), |undo, port| {
            undo.before(Invocation::new("ufw", &["delete", "allow", *port]).command_line())
        })
    }
}
