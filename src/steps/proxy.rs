//! Reverse proxy site through the two-phase TLS protocol.
//!
//! Unconfigured -> HttpChallengeReady (pre-TLS site live) -> Issued
//! (certbot succeeded) -> Configured (post-TLS site live). A certbot
//! failure ends the step in HttpChallengeReady with the pre-TLS site
//! still on disk.

use std::time::Duration;

use tracing::info;

use crate::cmd::Invocation;
use crate::context::{ProxyKind, ProxyState, RunContext};
use crate::error::ProvisionResult;
use crate::host::Host;
use crate::proxy::Proxy;
use crate::rollback::Undo;
use crate::step::Step;
use crate::vhost::{self, TlsMaterial};

const APACHE_MODULES: &[&str] = &[
    "proxy",
    "proxy_http",
    "proxy_wstunnel",
    "ssl",
    "headers",
    "rewrite",
];

/// A certificate closer than this to expiry is treated as missing.
const CERT_MIN_VALIDITY: Duration = Duration::from_secs(86400);

const CERTBOT_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ProxyStep;

fn config_test(kind: ProxyKind) -> Invocation {
    match kind {
        ProxyKind::Nginx => Invocation::new("nginx", &["-t"]),
        ProxyKind::Apache => Invocation::new("apache2ctl", &["configtest"]),
    }
}

fn reload(kind: ProxyKind) -> Invocation {
    Invocation::new("systemctl", &["reload-or-restart", kind.service()])
}

/// Validate the proxy configuration and make it live.
fn activate(ctx: &RunContext, host: &mut Host<'_>) -> ProvisionResult<()> {
    host.run(&config_test(ctx.proxy_kind))?;
    host.run(&reload(ctx.proxy_kind))?;
    Ok(())
}

fn certbot(ctx: &RunContext) -> Invocation {
    let webroot = ctx.layout.acme_webroot.to_string_lossy().into_owned();
    let mut cmd = Invocation::new(
        "certbot",
        &[
            "certonly",
            "--webroot",
            "-w",
            &webroot,
            "-d",
            &ctx.domain,
            "--email",
            &ctx.email,
            "--agree-tos",
            "--non-interactive",
            "--no-eff-email",
            "--keep-until-expiring",
        ],
    )
    .timeout(CERTBOT_TIMEOUT);
    if ctx.features.staging {
        cmd = cmd.arg("--staging");
    }
    cmd
}

impl Step for ProxyStep {
    fn id(&self) -> &str {
        "proxy"
    }

    fn requires(&self) -> &[&str] {
        &["firewall", "workload", "credentials"]
    }

    fn describe(&self, ctx: &RunContext) -> String {
        format!(
            "serve the ACME challenge for {} on {}, obtain a certificate and proxy {} to {}",
            ctx.domain,
            ctx.proxy_kind,
            ctx.public_url(),
            ctx.backend_url()
        )
    }

    fn is_applied(&self, ctx: &RunContext, host: &mut Host<'_>) -> ProvisionResult<bool> {
        let cert = ctx.layout.certificate(&ctx.domain);
        if !cert.is_file() {
            return Ok(false);
        }
        let site_ok = std::fs::read_to_string(ctx.layout.site_file(&ctx.domain))
            .is_ok_and(|c| c.contains(&ctx.backend_url()));
        if !site_ok || !ctx.layout.site_link(&ctx.domain).exists() {
            return Ok(false);
        }
        host.succeeds(
            "openssl",
            &[
                "x509",
                "-checkend",
                &CERT_MIN_VALIDITY.as_secs().to_string(),
                "-noout",
                "-in",
                &cert.to_string_lossy(),
            ],
        )
    }

    fn apply(&self, ctx: &mut RunContext, host: &mut Host<'_>) -> ProvisionResult<()> {
        let kind = ctx.proxy_kind;
        let proxy = Proxy::for_context(ctx);
        let site = ctx.layout.site_file(&ctx.domain);
        let link = ctx.layout.site_link(&ctx.domain);

        if kind == ProxyKind::Apache {
            let mut enable = Invocation::new("a2enmod", &["-q"]);
            for module in APACHE_MODULES {
                enable = enable.arg(*module);
            }
            host.run(&enable)?;
        }

        host.create_dir(&ctx.layout.acme_webroot)?;
        host.create_dir(&ctx.layout.proxy_log_dir)?;

        let pre = vhost::render_pre_tls(&proxy);
        host.write(ctx, &pre.artifact(&site))?;
        host.symlink(&site, &link)?;
        activate(ctx, host)?;
        ctx.proxy_state = ProxyState::HttpChallengeReady;
        info!("{} serving the ACME challenge for {}", kind, ctx.domain);

        host.run(&certbot(ctx))?;

        // certbot owns these files; read back whatever it produced
        let tls = TlsMaterial::discover(&ctx.layout.letsencrypt_dir, &ctx.domain, kind)?;
        ctx.proxy_state = ProxyState::Issued;
        info!("certificate issued: {}", tls.certificate.display());

        let post = vhost::render_post_tls(&proxy, &tls);
        host.write(ctx, &post.artifact(&site))?;
        activate(ctx, host)?;
        ctx.proxy_state = ProxyState::Configured;
        Ok(())
    }

    fn rollback(&self, ctx: &RunContext) -> Undo {
        Undo::default()
            .remove(&ctx.layout.site_link(&ctx.domain))
            .after(reload(ctx.proxy_kind).command_line())
    }
}
