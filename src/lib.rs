//! Idempotent single-host provisioning for a WAHA (WhatsApp HTTP
//! API) gateway behind a TLS-terminating reverse proxy.
//!
//! A run validates its input, then executes a fixed list of named,
//! idempotent steps: install packages, open the firewall, start the
//! gateway container, write basic-auth stores, configure the proxy
//! through a two-phase certificate dance, and install fail2ban jails.
//! Steps that are already applied are skipped, the first failure ends
//! the run, and a rollback script is kept current on disk from before
//! the first change.
//!
//! # Overview
//!
//! - [`Pipeline`] turns CLI options into a [`RunContext`] and drives
//!   the [`Engine`] with the [standard steps](steps::standard_registry)
//! - [`Step`] is the unit of work: `is_applied` / `apply` / `rollback`
//! - [`ToolRunner`](cmd::ToolRunner) is the only way out to external
//!   commands; a non-zero exit is a failure, output is never scraped
//! - [`vhost`] renders the proxy site before and after TLS issuance
//!   from a typed [`conf`] tree, for Nginx or Apache
//! - [`Rollback`] records pre-images before every write and emits a
//!   standalone undo script
//!
//! # Examples
//!
//! Drive the engine with your own steps:
//!
//! ```rust,no_run
//! use waha_provision::cmd::SystemTools;
//! use waha_provision::context::{RunContext, Secrets};
//! use waha_provision::steps::{self, WorkloadStep};
//! use waha_provision::probe::HttpProbe;
//! use waha_provision::{Engine, Host, Rollback};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut ctx = RunContext::new("api.example.com", "ops@example.com", Secrets::new("key"));
//!
//!     let probe = HttpProbe::new(&ctx.backend_url());
//!     let registry = steps::standard_registry(WorkloadStep::new(Box::new(probe)))?;
//!
//!     let tools = SystemTools::new();
//!     let mut host = Host::new(&tools, Rollback::for_run(&ctx));
//!     let results = Engine::new(registry).run(&mut ctx, &mut host, true);
//!
//!     for r in &results {
//!         println!("{}: {:?}", r.step, r.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Or run the `provision` binary:
//!
//! ```sh
//! provision --domain api.example.com --email ops@example.com --dry-run
//! provision --domain api.example.com --email ops@example.com \
//!     --dashboard-user admin --proxy apache --non-interactive
//! ```

// Allow noisy pedantic lints that don't add value for a
// provisioning tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod artifact;
pub mod cmd;
pub mod compose;
pub mod conf;
pub mod context;
pub mod engine;
pub mod error;
pub mod host;
pub mod jail;
pub mod logging;
pub mod pipeline;
pub mod probe;
pub mod proxy;
pub mod rollback;
pub mod secrets;
pub mod state;
pub mod step;
pub mod steps;
pub mod validate;
pub mod vhost;
pub mod workload;

pub use artifact::{ConfigArtifact, Phase};
pub use context::{ProxyKind, ProxyState, RunContext};
pub use engine::{Engine, Registry};
pub use error::{ProvisionError, ProvisionResult};
pub use host::Host;
pub use pipeline::{Cli, Pipeline, Report};
pub use rollback::Rollback;
pub use step::{Step, StepResult, StepStatus};
pub use workload::Workload;
