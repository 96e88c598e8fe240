//! fail2ban jail definitions for the proxy's own logs.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::context::ProxyKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jail {
    pub name: String,
    pub filter: String,
    pub logpath: PathBuf,
    pub maxretry: u32,
    pub findtime: u32,
    pub bantime: u32,
}

impl Jail {
    /// A jail named after `filter`, watching `logpath`.
    #[must_use]
    pub fn new(filter: &str, logpath: impl Into<PathBuf>) -> Self {
        Self {
            name: filter.to_string(),
            filter: filter.to_string(),
            logpath: logpath.into(),
            maxretry: 5,
            findtime: 600,
            bantime: 3600,
        }
    }

    #[must_use]
    pub const fn maxretry(mut self, n: u32) -> Self {
        self.maxretry = n;
        self
    }

    #[must_use]
    pub const fn bantime(mut self, seconds: u32) -> Self {
        self.bantime = seconds;
        self
    }
}

/// Failed-auth and bot-scan jails for the given proxy, both reading
/// the site's error log.
#[must_use]
pub fn for_proxy(kind: ProxyKind, error_log: &Path) -> Vec<Jail> {
    let (auth, botsearch) = match kind {
        ProxyKind::Nginx => ("nginx-http-auth", "nginx-botsearch"),
        ProxyKind::Apache => ("apache-auth", "apache-botsearch"),
    };
    vec![
        Jail::new(auth, error_log),
        Jail::new(botsearch, error_log).maxretry(10).bantime(86400),
    ]
}

/// Render a `jail.d` drop-in.
#[must_use]
pub fn render(jails: &[Jail]) -> String {
    let mut out = String::from("# Managed by waha-provision\n");
    for jail in jails {
        let _ = write!(
            out,
            concat!(
                "\n[{}]\n",
                "enabled  = true\n",
                "port     = http,https\n",
                "filter   = {}\n",
                "logpath  = {}\n",
                "maxretry = {}\n",
                "findtime = {}\n",
                "bantime  = {}\n",
            ),
            jail.name,
            jail.filter,
            jail.logpath.display(),
            jail.maxretry,
            jail.findtime,
            jail.bantime,
        );
    }
    out
}
