//! Read-only precondition checks run before anything is changed.
//!
//! Hard checks (privileges, input syntax, port) each produce their own
//! [`Failure`]. DNS resolution is a soft check: it yields a warning
//! the operator has to confirm, since a fresh record may simply not
//! have propagated yet.

use std::fmt;
use std::net::{IpAddr, TcpListener};
use std::sync::LazyLock;

use regex::Regex;
use trust_dns_resolver::Resolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};

use crate::error::{ProvisionError, ProvisionResult};

// Labels of 1-63 alphanumerics or hyphens, no hyphen at either end.
const LABEL: &str = r"[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?";

// Alphabetic TLD, or its punycode form.
const TLD: &str = r"([A-Za-z]{2,63}|xn--[A-Za-z0-9-]{1,59})";

static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^({LABEL}\.)+{TLD}$")).expect("DOMAIN_REGEX: invalid regex pattern")
});

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^[A-Za-z0-9._%+-]+@({LABEL}\.)+{TLD}$"))
        .expect("EMAIL_REGEX: invalid regex pattern")
});

pub const MIN_PORT: u16 = 1024;

/// What the validator needs to know about the machine it runs on.
pub trait HostFacts {
    fn is_root(&self) -> bool;

    /// Whether something is already listening on `port`.
    fn port_in_use(&self, port: u16) -> bool;

    fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, String>;
}

/// The local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl HostFacts for SystemHost {
    fn is_root(&self) -> bool {
        rustix::process::getuid().is_root()
    }

    fn port_in_use(&self, port: u16) -> bool {
        matches!(
            TcpListener::bind(("0.0.0.0", port)),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse
        )
    }

    fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, String> {
        let resolver = Resolver::new(ResolverConfig::default(), ResolverOpts::default())
            .map_err(|e| e.to_string())?;
        let response = resolver.lookup_ip(domain).map_err(|e| e.to_string())?;
        Ok(response.iter().collect())
    }
}

/// Operator-supplied values to check.
#[derive(Debug, Clone)]
pub struct Input {
    pub domain: String,
    pub email: String,
    pub port: u16,
    /// The port is published by an earlier install of this workload,
    /// so finding it bound is expected on a rerun.
    pub port_owned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    NotRoot,
    InvalidDomain(String),
    InvalidEmail(String),
    PortOutOfRange(u16),
    PortInUse(u16),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRoot => f.write_str("must run as root"),
            Self::InvalidDomain(d) => write!(f, "invalid domain name: {d:?}"),
            Self::InvalidEmail(e) => write!(f, "invalid email address: {e:?}"),
            Self::PortOutOfRange(p) => {
                write!(f, "port {p} is outside {MIN_PORT}-{}", u16::MAX)
            }
            Self::PortInUse(p) => write!(f, "port {p} is already in use"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub failures: Vec<Failure>,
    /// Soft DNS failure, to be confirmed by the operator.
    pub dns_warning: Option<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn hard failures into a [`ProvisionError::Precondition`]
    /// listing all of them.
    pub fn check(&self) -> ProvisionResult<()> {
        if self.is_ok() {
            return Ok(());
        }
        let reasons: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        Err(ProvisionError::Precondition(reasons.join("; ")))
    }
}

#[must_use]
pub fn is_valid_domain(domain: &str) -> bool {
    domain.len() <= 253 && DOMAIN_REGEX.is_match(domain)
}

#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

/// Run every check against `input`.
pub fn validate(input: &Input, host: &dyn HostFacts) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !host.is_root() {
        report.failures.push(Failure::NotRoot);
    }

    let domain_ok = is_valid_domain(&input.domain);
    if !domain_ok {
        report.failures.push(Failure::InvalidDomain(input.domain.clone()));
    }

    if !is_valid_email(&input.email) {
        report.failures.push(Failure::InvalidEmail(input.email.clone()));
    }

    if input.port < MIN_PORT {
        report.failures.push(Failure::PortOutOfRange(input.port));
    } else if !input.port_owned && host.port_in_use(input.port) {
        report.failures.push(Failure::PortInUse(input.port));
    }

    if domain_ok {
        report.dns_warning = match host.resolve(&input.domain) {
            Ok(addrs) if !addrs.is_empty() => None,
            Ok(_) => Some(format!("{} has no A/AAAA record", input.domain)),
            Err(e) => Some(format!("{} does not resolve: {e}", input.domain)),
        };
    }

    report
}
