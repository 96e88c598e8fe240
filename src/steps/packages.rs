use tracing::info;

use crate::cmd::Invocation;
use crate::context::RunContext;
use crate::error::ProvisionResult;
use crate::host::Host;
use crate::step::Step;

const BASE_PACKAGES: &[&str] = &[
    "docker.io",
    "docker-compose-v2",
    "certbot",
    "fail2ban",
    "ufw",
    "openssl",
];

/// Installs the container runtime, proxy, certbot, fail2ban, ufw and
/// openssl. Packages are left installed on rollback.
pub struct PackagesStep;

impl PackagesStep {
    #[must_use]
    pub fn packages(ctx: &RunContext) -> Vec<&'static str> {
        let mut packages = BASE_PACKAGES.to_vec();
        packages.push(ctx.proxy_kind.package());
        packages
    }
}

fn apt(args: &[&str]) -> Invocation {
    Invocation::new("apt-get", args).env("DEBIAN_FRONTEND", "noninteractive")
}

impl Step for PackagesStep {
    fn id(&self) -> &str {
        "packages"
    }

    fn describe(&self, ctx: &RunContext) -> String {
        format!("install {}", Self::packages(ctx).join(" "))
    }

    fn is_applied(&self, ctx: &RunContext, host: &mut Host<'_>) -> ProvisionResult<bool> {
        for package in Self::packages(ctx) {
            if !host.succeeds("dpkg", &["-s", package])? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn apply(&self, ctx: &mut RunContext, host: &mut Host<'_>) -> ProvisionResult<()> {
        let packages = Self::packages(ctx);
        info!("installing {} packages", packages.len());

        host.run(&apt(&["update"]))?;

        let mut install = apt(&["install", "-y", "--no-install-recommends"]);
        for package in &packages {
            install = install.arg(*package);
        }
        host.run(&install)?;

        host.exec("systemctl", &["enable", "--now", "docker"])?;
        Ok(())
    }
}
