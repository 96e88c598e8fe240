use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use clap::error::ErrorKind;
use tracing::{info, warn};

use crate::cmd::{SystemTools, ToolRunner};
use crate::context::{Features, Layout, ProxyKind, ProxyState, RunContext};
use crate::engine::Engine;
use crate::error::{ProvisionError, ProvisionResult};
use crate::host::Host;
use crate::probe::{HttpProbe, Probe};
use crate::rollback::Rollback;
use crate::secrets::{self, Requested};
use crate::state::{RunLock, RunLog};
use crate::step::{StepResult, StepStatus};
use crate::steps::{self, WorkloadStep};
use crate::validate::{self, HostFacts, Input, SystemHost};

/// One provisioning run, from CLI options to the final summary.
pub struct Pipeline {
    tools: Box<dyn ToolRunner>,
    facts: Box<dyn HostFacts>,
    probe: Option<Box<dyn Probe>>,
    root: Option<PathBuf>,
    poll_interval: Duration,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Pipeline acting on the local host.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: Box::new(SystemTools::new()),
            facts: Box::new(SystemHost),
            probe: None,
            root: None,
            poll_interval: Duration::from_secs(2),
        }
    }

    #[must_use]
    pub fn tools(mut self, tools: impl ToolRunner + 'static) -> Self {
        self.tools = Box::new(tools);
        self
    }

    #[must_use]
    pub fn host_facts(mut self, facts: impl HostFacts + 'static) -> Self {
        self.facts = Box::new(facts);
        self
    }

    /// Probe used for workload readiness instead of an HTTP GET on
    /// the backend address.
    #[must_use]
    pub fn probe(mut self, probe: impl Probe + 'static) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Place every filesystem location under `root`.
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Parse CLI arguments and run.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or any step fails.
    pub fn run(self) -> ProvisionResult<()> {
        let cli = Cli::from_args(std::env::args_os())?;
        let report = self.execute(&cli)?;
        print_summary(&report);

        match report.failed_step() {
            Some(failed) => Err(ProvisionError::StepFailed {
                step: failed.step.clone(),
                message: failed.error.clone().unwrap_or_default(),
            }),
            None => Ok(()),
        }
    }

    /// Validate, then run every step.
    ///
    /// A failing step does not make this return `Err`; it is reported
    /// in [`Report::results`]. `Err` means the run never started.
    pub fn execute(self, cli: &Cli) -> ProvisionResult<Report> {
        let interactive = !cli.non_interactive && std::io::stdin().is_terminal();
        let domain = required(cli.domain.as_deref(), "domain", interactive)?;
        let email = required(cli.email.as_deref(), "email", interactive)?;

        let root = self.root.as_deref();
        let layout = root
            .map_or_else(|| Layout::new(cli.proxy), |r| Layout::rooted(r, cli.proxy))
            .install_dir(place(root, &cli.install_dir))
            .state_dir(place(root, &cli.state_dir));

        let input = Input {
            domain: domain.clone(),
            email: email.clone(),
            port: cli.port,
            port_owned: publishes_port(&layout.compose_file(), cli.port),
        };
        let validation = validate::validate(&input, self.facts.as_ref());
        validation.check()?;
        if let Some(warning) = &validation.dns_warning {
            warn!("{warning}");
            if !interactive {
                return Err(ProvisionError::Precondition(warning.clone()));
            }
            if !confirm("Continue anyway?")? {
                return Err(ProvisionError::Aborted);
            }
        }

        let requested = Requested {
            dashboard_user: cli.dashboard_user.clone(),
            dashboard_password: cli.dashboard_password.clone(),
            swagger_user: cli.swagger_user.clone(),
            swagger_password: cli.swagger_password.clone(),
        };
        let secrets = secrets::load_or_generate(&layout.env_file(), &requested)?;

        let mut ctx = RunContext::new(&domain, &email, secrets)
            .image(&cli.image)
            .port(cli.port)
            .swagger_path(&cli.swagger_path)
            .max_body_mb(cli.max_body_mb)
            .features(Features {
                monitoring: cli.monitoring,
                dry_run: cli.dry_run,
                security_headers: !cli.no_security_headers,
                staging: cli.staging,
            })
            .proxy(cli.proxy)
            .layout(layout);
        let dry_run = ctx.features.dry_run;

        let _lock = if dry_run {
            None
        } else {
            Some(RunLock::acquire(ctx.layout.lock_file())?)
        };

        let probe = self
            .probe
            .unwrap_or_else(|| Box::new(HttpProbe::new(&ctx.backend_url())));
        let registry = steps::standard_registry(
            WorkloadStep::new(probe)
                .timeout(Duration::from_secs(cli.readiness_timeout))
                .poll_interval(self.poll_interval),
        )?;

        let mut rollback = Rollback::for_run(&ctx);
        if !dry_run {
            rollback = rollback.persist_to(ctx.layout.rollback_script());
        }
        rollback.set_step_undo(registry.undo_actions(&ctx));
        rollback.persist()?;

        let mut engine = Engine::new(registry);
        if !dry_run {
            engine = engine.with_log(RunLog::new(ctx.layout.run_log()));
        }

        info!(
            "run {} for {} ({} steps{})",
            ctx.run_id,
            ctx.domain,
            engine.registry().len(),
            if dry_run { ", dry run" } else { "" }
        );

        let mut host = Host::new(self.tools.as_ref(), rollback);
        let results = engine.run(&mut ctx, &mut host, dry_run);

        // A skipped proxy step means the site was found fully configured
        if results
            .iter()
            .any(|r| r.step == "proxy" && r.status == StepStatus::SkippedAlreadyApplied)
        {
            ctx.proxy_state = ProxyState::Configured;
        }

        Ok(Report {
            run_log: (!dry_run).then(|| ctx.layout.run_log()),
            lost_log_entries: engine.log().map_or(0, RunLog::lost),
            rollback_script: host.rollback().script_path().map(Path::to_path_buf),
            context: ctx,
            results,
            dry_run,
        })
    }
}

/// Outcome of one run.
#[derive(Debug)]
pub struct Report {
    pub context: RunContext,
    pub results: Vec<StepResult>,
    pub dry_run: bool,
    pub run_log: Option<PathBuf>,
    /// Step results that could not be appended to the run log.
    pub lost_log_entries: u32,
    pub rollback_script: Option<PathBuf>,
}

impl Report {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.results.iter().all(StepResult::is_ok)
    }

    #[must_use]
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.results.iter().find(|r| !r.is_ok())
    }
}

/// Provision a WAHA gateway behind a TLS-terminating reverse proxy.
#[derive(Parser, Debug)]
#[command(name = "provision")]
#[command(about = "Provision a WAHA gateway behind a TLS-terminating reverse proxy")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Show what would run without changing anything
    #[arg(long, env = "WAHA_DRY_RUN")]
    pub dry_run: bool,

    /// Local port the gateway is published on
    #[arg(long, env = "WAHA_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Public domain name
    #[arg(long, env = "WAHA_DOMAIN")]
    pub domain: Option<String>,

    /// Contact email for the certificate authority
    #[arg(long, env = "WAHA_EMAIL")]
    pub email: Option<String>,

    /// Never prompt; missing input is an error
    #[arg(long, env = "WAHA_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Reverse proxy to configure
    #[arg(long, env = "WAHA_PROXY", value_enum, default_value_t = ProxyKind::Nginx)]
    pub proxy: ProxyKind,

    /// Gateway container image
    #[arg(long, env = "WAHA_IMAGE", default_value = "devlikeapro/waha:latest")]
    pub image: String,

    /// Directory holding the compose manifest and .env
    #[arg(long, env = "WAHA_INSTALL_DIR", default_value = "/opt/waha")]
    pub install_dir: PathBuf,

    /// Directory for the run log, backups, lock and rollback script
    #[arg(long, env = "WAHA_STATE_DIR", default_value = "/var/lib/waha-provision")]
    pub state_dir: PathBuf,

    /// Add a container healthcheck and a node-exporter sidecar
    #[arg(long, env = "WAHA_MONITORING")]
    pub monitoring: bool,

    /// Protect the dashboard with this username
    #[arg(long, env = "WAHA_DASHBOARD_USER")]
    pub dashboard_user: Option<String>,

    /// Dashboard password (generated if omitted)
    #[arg(long, env = "WAHA_DASHBOARD_PASSWORD", hide_env_values = true)]
    pub dashboard_password: Option<String>,

    /// Protect the API docs with this username
    #[arg(long, env = "WAHA_SWAGGER_USER")]
    pub swagger_user: Option<String>,

    /// API docs password (generated if omitted)
    #[arg(long, env = "WAHA_SWAGGER_PASSWORD", hide_env_values = true)]
    pub swagger_password: Option<String>,

    /// Location of the API docs
    #[arg(long, env = "WAHA_SWAGGER_PATH", default_value = "/swagger")]
    pub swagger_path: String,

    /// Largest upload the proxy accepts, in MiB
    #[arg(long, env = "WAHA_MAX_BODY_MB", default_value_t = 50)]
    pub max_body_mb: u32,

    /// Leave out the security response headers
    #[arg(long, env = "WAHA_NO_SECURITY_HEADERS")]
    pub no_security_headers: bool,

    /// Use the ACME staging CA
    #[arg(long, env = "WAHA_STAGING")]
    pub staging: bool,

    /// Seconds to wait for the gateway to answer
    #[arg(long, env = "WAHA_READINESS_TIMEOUT", default_value_t = 120)]
    pub readiness_timeout: u64,
}

impl Cli {
    /// Parse `args`. Help and version output exit the process as
    /// usual; every other parse error, such as `--port 70000`, is a
    /// [`ProvisionError::Precondition`].
    pub fn from_args<I, T>(args: I) -> ProvisionResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args).map_err(|e| match e.kind() {
            ErrorKind::DisplayHelp
            | ErrorKind::DisplayVersion
            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => e.exit(),
            _ => {
                let text = e.to_string();
                let first = text.lines().next().unwrap_or_default();
                ProvisionError::Precondition(first.trim_start_matches("error: ").to_string())
            }
        })
    }
}

fn required(value: Option<&str>, name: &str, interactive: bool) -> ProvisionResult<String> {
    if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
        return Ok(v.trim().to_string());
    }
    if !interactive {
        return Err(ProvisionError::Precondition(format!(
            "--{name} is required with --non-interactive"
        )));
    }
    let answer = prompt(&format!("{name}: "))?;
    if answer.is_empty() {
        return Err(ProvisionError::Precondition(format!("no {name} given")));
    }
    Ok(answer)
}

fn prompt(label: &str) -> ProvisionResult<String> {
    eprint!("{label}");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn confirm(question: &str) -> ProvisionResult<bool> {
    let answer = prompt(&format!("{question} [y/N] "))?;
    Ok(matches!(answer.as_str(), "y" | "Y" | "yes"))
}

/// `path` as given, or moved under `root` when one is set.
fn place(root: Option<&Path>, path: &Path) -> PathBuf {
    match root {
        Some(r) => r.join(path.strip_prefix("/").unwrap_or(path)),
        None => path.to_path_buf(),
    }
}

/// Whether an earlier install already publishes `port`.
fn publishes_port(compose_file: &Path, port: u16) -> bool {
    std::fs::read_to_string(compose_file).is_ok_and(|c| c.contains(&format!("127.0.0.1:{port}:")))
}

fn print_summary(report: &Report) {
    let ctx = &report.context;

    eprintln!();
    eprintln!("========================================");
    match (report.succeeded(), report.dry_run) {
        (true, true) => eprintln!("Dry run complete, nothing was changed"),
        (true, false) => eprintln!("WAHA provisioned successfully!"),
        (false, _) => eprintln!("Provisioning FAILED"),
    }
    eprintln!("========================================");
    eprintln!();

    for result in &report.results {
        let status = match result.status {
            StepStatus::SkippedAlreadyApplied => "skipped (already applied)",
            StepStatus::Succeeded if result.dry_run => "pending",
            StepStatus::Succeeded => "ok",
            StepStatus::Failed => "FAILED",
        };
        eprintln!("  {:<12} {status}", result.step);
    }
    eprintln!();

    if let Some(failed) = report.failed_step() {
        eprintln!("Step '{}' failed:", failed.step);
        if let Some(error) = &failed.error {
            for line in error.lines() {
                eprintln!("  {line}");
            }
        }
        eprintln!();
    } else if !report.dry_run {
        eprintln!("URL: {}", ctx.public_url());
        if ctx.secrets.dashboard.is_some() {
            eprintln!("Dashboard: {}{}", ctx.public_url(), ctx.dashboard_path);
        }
        eprintln!("API docs: {}{}", ctx.public_url(), ctx.swagger_path);
        eprintln!("Secrets: {}", ctx.layout.env_file().display());
        eprintln!();
        eprintln!("Check with:");
        eprintln!(
            "  docker compose -f {} logs -f",
            ctx.layout.compose_file().display()
        );
        eprintln!("  fail2ban-client status");
        eprintln!();
    }

    if let Some(log) = &report.run_log {
        if report.lost_log_entries > 0 {
            eprintln!(
                "Run log: {} (INCOMPLETE, {} step results could not be written)",
                log.display(),
                report.lost_log_entries
            );
        } else {
            eprintln!("Run log: {}", log.display());
        }
    }
    if let Some(script) = &report.rollback_script {
        eprintln!("Rollback: sh {}", script.display());
    }
}
