use std::path::PathBuf;

use crate::context::{ProxyKind, RunContext};

/// Basic-auth settings for one protected location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub realm: String,
    pub user_file: PathBuf,
}

/// A location served through the proxy behind basic auth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedPath {
    pub name: String,
    pub location: String,
    pub auth: BasicAuth,
}

/// Reverse proxy site configuration for the workload's domain.
///
/// # Example
///
/// ```
/// use waha_provision::context::ProxyKind;
/// use waha_provision::proxy::Proxy;
///
/// let proxy = Proxy::new(ProxyKind::Nginx, "api.example.com")
///     .upstream("http://127.0.0.1:3000")
///     .protect("dashboard", "/dashboard", "/etc/nginx/.htpasswd-dashboard")
///     .security_headers(true);
///
/// assert_eq!(proxy.protected.len(), 1);
/// assert!(proxy.security_headers);
/// ```
#[derive(Debug, Clone)]
pub struct Proxy {
    pub kind: ProxyKind,
    pub domain: String,
    pub upstream: String,
    pub acme_webroot: PathBuf,
    pub access_log: PathBuf,
    pub error_log: PathBuf,
    pub protected: Vec<ProtectedPath>,
    pub security_headers: bool,
    pub max_body_mb: u32,
}

impl Proxy {
    #[must_use]
    pub fn new(kind: ProxyKind, domain: &str) -> Self {
        let log_dir = PathBuf::from(format!("/var/log/{}", kind.service()));
        Self {
            kind,
            domain: domain.to_string(),
            upstream: "http://127.0.0.1:3000".to_string(),
            acme_webroot: PathBuf::from("/var/www/certbot"),
            access_log: log_dir.join(format!("{domain}.access.log")),
            error_log: log_dir.join(format!("{domain}.error.log")),
            protected: Vec::new(),
            security_headers: false,
            max_body_mb: 50,
        }
    }

    /// Site configuration for the run: backend, log paths and one
    /// protected location per supplied credential.
    #[must_use]
    pub fn for_context(ctx: &RunContext) -> Self {
        let layout = &ctx.layout;
        let mut proxy = Self::new(ctx.proxy_kind, &ctx.domain)
            .upstream(&ctx.backend_url())
            .acme_webroot(layout.acme_webroot.clone())
            .logs(layout.access_log(&ctx.domain), layout.error_log(&ctx.domain))
            .security_headers(ctx.features.security_headers)
            .max_body_mb(ctx.max_body_mb);

        if ctx.secrets.dashboard.is_some() {
            proxy = proxy.protect(
                "dashboard",
                &ctx.dashboard_path,
                layout.htpasswd_file("dashboard"),
            );
        }
        if ctx.secrets.swagger.is_some() {
            proxy = proxy.protect("swagger", &ctx.swagger_path, layout.htpasswd_file("swagger"));
        }
        proxy
    }

    #[must_use]
    pub fn upstream(mut self, url: &str) -> Self {
        self.upstream = url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn acme_webroot(mut self, dir: impl Into<PathBuf>) -> Self {
        self.acme_webroot = dir.into();
        self
    }

    #[must_use]
    pub fn logs(mut self, access: impl Into<PathBuf>, error: impl Into<PathBuf>) -> Self {
        self.access_log = access.into();
        self.error_log = error.into();
        self
    }

    /// Require basic auth for `location`, checked against
    /// `user_file`.
    #[must_use]
    pub fn protect(mut self, name: &str, location: &str, user_file: impl Into<PathBuf>) -> Self {
        self.protected.push(ProtectedPath {
            name: name.to_string(),
            location: location.to_string(),
            auth: BasicAuth {
                realm: format!("WAHA {name}"),
                user_file: user_file.into(),
            },
        });
        self
    }

    #[must_use]
    pub const fn security_headers(mut self, on: bool) -> Self {
        self.security_headers = on;
        self
    }

    #[must_use]
    pub const fn max_body_mb(mut self, mb: u32) -> Self {
        self.max_body_mb = mb;
        self
    }
}
