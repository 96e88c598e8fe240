use std::path::PathBuf;

use crate::artifact::ConfigArtifact;
use crate::cmd::Invocation;
use crate::context::{Credentials, RunContext};
use crate::error::ProvisionResult;
use crate::host::Host;
use crate::rollback::Undo;
use crate::step::Step;

/// Group the proxy workers run as on Debian and Ubuntu.
const PROXY_GROUP: &str = "www-data";

/// Writes one htpasswd file per protected path that has credentials.
/// Paths without a username get no file at all.
pub struct CredentialsStep;

impl CredentialsStep {
    fn stores(ctx: &RunContext) -> Vec<(PathBuf, &Credentials)> {
        [("dashboard", &ctx.secrets.dashboard), ("swagger", &ctx.secrets.swagger)]
            .into_iter()
            .filter_map(|(name, creds)| {
                creds
                    .as_ref()
                    .map(|c| (ctx.layout.htpasswd_file(name), c))
            })
            .collect()
    }
}

impl Step for CredentialsStep {
    fn id(&self) -> &str {
        "credentials"
    }

    fn requires(&self) -> &[&str] {
        &["packages"]
    }

    fn describe(&self, ctx: &RunContext) -> String {
        let stores = Self::stores(ctx);
        if stores.is_empty() {
            return "write no credential stores (no usernames supplied)".to_string();
        }
        let paths: Vec<String> = stores.iter().map(|(p, _)| p.display().to_string()).collect();
        format!("write {}", paths.join(", "))
    }

    fn is_applied(&self, ctx: &RunContext, _host: &mut Host<'_>) -> ProvisionResult<bool> {
        Ok(Self::stores(ctx).iter().all(|(path, creds)| {
            std::fs::read_to_string(path)
                .is_ok_and(|c| c.starts_with(&format!("{}:", creds.username)))
        }))
    }

    fn apply(&self, ctx: &mut RunContext, host: &mut Host<'_>) -> ProvisionResult<()> {
        for (path, creds) in Self::stores(ctx) {
            // Password goes over stdin, never argv
            let hashed = host.run(
                &Invocation::new("openssl", &["passwd", "-apr1", "-stdin"])
                    .stdin(format!("{}\n", creds.password).as_bytes()),
            )?;
            let entry = format!("{}:{}\n", creds.username, hashed.stdout.trim());

            let artifact = ConfigArtifact::new(&path, entry)
                .mode(0o640)
                .owner("root", PROXY_GROUP);
            host.write(ctx, &artifact)?;
        }
        Ok(())
    }

    fn rollback(&self, ctx: &RunContext) -> Undo {
        Self::stores(ctx)
            .iter()
            .fold(Undo::default(), |undo, (path, _)| undo.remove(path))
    }
}
