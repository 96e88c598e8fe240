use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

/// Reverse proxy flavour fronting the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    #[default]
    Nginx,
    Apache,
}

impl ProxyKind {
    /// Service name used with `systemctl`.
    #[must_use]
    pub const fn service(self) -> &'static str {
        match self {
            Self::Nginx => "nginx",
            Self::Apache => "apache2",
        }
    }

    /// Distribution package providing the proxy.
    #[must_use]
    pub const fn package(self) -> &'static str {
        self.service()
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service())
    }
}

/// Configuration state of the domain's reverse proxy site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyState {
    #[default]
    Unconfigured,
    /// Plain HTTP vhost serving the ACME challenge, everything else
    /// redirected to HTTPS.
    HttpChallengeReady,
    Issued,
    Configured,
}

impl ProxyState {
    /// Whether a certificate exists for the domain in this run.
    #[must_use]
    pub const fn is_issued(self) -> bool {
        matches!(self, Self::Issued | Self::Configured)
    }
}

/// Filesystem locations used by a run. Nothing outside this struct
/// is read or written.
#[derive(Debug, Clone)]
pub struct Layout {
    pub install_dir: PathBuf,
    pub state_dir: PathBuf,
    pub proxy_root: PathBuf,
    pub proxy_log_dir: PathBuf,
    pub letsencrypt_dir: PathBuf,
    pub acme_webroot: PathBuf,
    pub fail2ban_dir: PathBuf,
}

impl Layout {
    /// Standard Debian/Ubuntu locations for the given proxy.
    #[must_use]
    pub fn new(kind: ProxyKind) -> Self {
        Self {
            install_dir: PathBuf::from("/opt/waha"),
            state_dir: PathBuf::from("/var/lib/waha-provision"),
            proxy_root: PathBuf::from(format!("/etc/{}", kind.service())),
            proxy_log_dir: PathBuf::from(format!("/var/log/{}", kind.service())),
            letsencrypt_dir: PathBuf::from("/etc/letsencrypt"),
            acme_webroot: PathBuf::from("/var/www/certbot"),
            fail2ban_dir: PathBuf::from("/etc/fail2ban"),
        }
    }

    /// Place every location under `root`, keeping the standard
    /// relative structure.
    #[must_use]
    pub fn rooted(root: &Path, kind: ProxyKind) -> Self {
        let defaults = Self::new(kind);
        let under = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));
        Self {
            install_dir: under(&defaults.install_dir),
            state_dir: under(&defaults.state_dir),
            proxy_root: under(&defaults.proxy_root),
            proxy_log_dir: under(&defaults.proxy_log_dir),
            letsencrypt_dir: under(&defaults.letsencrypt_dir),
            acme_webroot: under(&defaults.acme_webroot),
            fail2ban_dir: under(&defaults.fail2ban_dir),
        }
    }

    #[must_use]
    pub fn install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self
    }

    #[must_use]
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    #[must_use]
    pub fn compose_file(&self) -> PathBuf {
        self.install_dir.join("docker-compose.yml")
    }

    #[must_use]
    pub fn env_file(&self) -> PathBuf {
        self.install_dir.join(".env")
    }

    #[must_use]
    pub fn site_file(&self, domain: &str) -> PathBuf {
        self.proxy_root
            .join("sites-available")
            .join(format!("{domain}.conf"))
    }

    #[must_use]
    pub fn site_link(&self, domain: &str) -> PathBuf {
        self.proxy_root
            .join("sites-enabled")
            .join(format!("{domain}.conf"))
    }

    #[must_use]
    pub fn htpasswd_file(&self, name: &str) -> PathBuf {
        self.proxy_root.join(format!(".htpasswd-{name}"))
    }

    #[must_use]
    pub fn access_log(&self, domain: &str) -> PathBuf {
        self.proxy_log_dir.join(format!("{domain}.access.log"))
    }

    #[must_use]
    pub fn error_log(&self, domain: &str) -> PathBuf {
        self.proxy_log_dir.join(format!("{domain}.error.log"))
    }

    #[must_use]
    pub fn certificate(&self, domain: &str) -> PathBuf {
        self.letsencrypt_dir
            .join("live")
            .join(domain)
            .join("fullchain.pem")
    }

    #[must_use]
    pub fn jail_file(&self) -> PathBuf {
        self.fail2ban_dir.join("jail.d").join("waha.local")
    }

    #[must_use]
    pub fn run_log(&self) -> PathBuf {
        self.state_dir.join("provision.log")
    }

    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("provision.lock")
    }

    #[must_use]
    pub fn rollback_script(&self) -> PathBuf {
        self.state_dir.join("rollback.sh")
    }

    #[must_use]
    pub fn backup_dir(&self, run_id: Uuid) -> PathBuf {
        self.state_dir.join("backups").join(run_id.to_string())
    }
}

/// Username and password for one protected path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Secrets handed to the workload and the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secrets {
    pub api_key: String,
    pub dashboard: Option<Credentials>,
    pub swagger: Option<Credentials>,
}

impl Secrets {
    #[must_use]
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            dashboard: None,
            swagger: None,
        }
    }
}

/// Run-wide switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Features {
    pub monitoring: bool,
    pub dry_run: bool,
    pub security_headers: bool,
    /// Use the ACME staging CA.
    pub staging: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            monitoring: false,
            dry_run: false,
            security_headers: true,
            staging: false,
        }
    }
}

/// Parameters threaded through one provisioning run.
///
/// Owned by the engine for the lifetime of the run and handed to
/// every step; components never look anything up in the ambient
/// environment.
///
/// # Example
///
/// ```
/// use waha_provision::context::{ProxyKind, RunContext, Secrets};
///
/// let ctx = RunContext::new("api.example.com", "ops@example.com", Secrets::new("k"))
///     .port(3100)
///     .proxy(ProxyKind::Apache);
///
/// assert_eq!(ctx.port, 3100);
/// assert_eq!(ctx.layout.proxy_root.to_str(), Some("/etc/apache2"));
/// ```
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub domain: String,
    pub email: String,
    pub image: String,
    pub port: u16,
    pub dashboard_path: String,
    pub swagger_path: String,
    pub max_body_mb: u32,
    pub secrets: Secrets,
    pub features: Features,
    pub proxy_kind: ProxyKind,
    pub layout: Layout,
    pub proxy_state: ProxyState,
}

impl RunContext {
    #[must_use]
    pub fn new(domain: &str, email: &str, secrets: Secrets) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            domain: domain.to_string(),
            email: email.to_string(),
            image: "devlikeapro/waha:latest".to_string(),
            port: 3000,
            dashboard_path: "/dashboard".to_string(),
            swagger_path: "/swagger".to_string(),
            max_body_mb: 50,
            secrets,
            features: Features::default(),
            proxy_kind: ProxyKind::Nginx,
            layout: Layout::new(ProxyKind::Nginx),
            proxy_state: ProxyState::Unconfigured,
        }
    }

    #[must_use]
    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn swagger_path(mut self, path: &str) -> Self {
        self.swagger_path = path.to_string();
        self
    }

    /// Largest request body the proxy accepts, in MiB.
    #[must_use]
    pub const fn max_body_mb(mut self, mb: u32) -> Self {
        self.max_body_mb = mb;
        self
    }

    #[must_use]
    pub const fn features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Switch proxy flavour. Also resets the proxy locations in the
    /// layout, so call this before [`Self::layout`].
    #[must_use]
    pub fn proxy(mut self, kind: ProxyKind) -> Self {
        let defaults = Layout::new(kind);
        self.proxy_kind = kind;
        self.layout.proxy_root = defaults.proxy_root;
        self.layout.proxy_log_dir = defaults.proxy_log_dir;
        self
    }

    #[must_use]
    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Local address the workload is published on.
    #[must_use]
    pub fn backend_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    #[must_use]
    pub fn public_url(&self) -> String {
        format!("https://{}", self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let ctx = RunContext::new("a.example.com", "ops@example.com", Secrets::new("key"));

        assert_eq!(ctx.port, 3000);
        assert_eq!(ctx.image, "devlikeapro/waha:latest");
        assert_eq!(ctx.proxy_kind, ProxyKind::Nginx);
        assert_eq!(ctx.proxy_state, ProxyState::Unconfigured);
        assert!(!ctx.features.dry_run);
        assert!(ctx.features.security_headers);
        assert_eq!(ctx.backend_url(), "http://127.0.0.1:3000");
    }

    #[test]
    fn rooted_layout_keeps_structure() {
        let layout = Layout::rooted(Path::new("/tmp/x"), ProxyKind::Nginx);

        assert_eq!(layout.install_dir, PathBuf::from("/tmp/x/opt/waha"));
        assert_eq!(
            layout.site_file("d.dev"),
            PathBuf::from("/tmp/x/etc/nginx/sites-available/d.dev.conf")
        );
        assert_eq!(
            layout.certificate("d.dev"),
            PathBuf::from("/tmp/x/etc/letsencrypt/live/d.dev/fullchain.pem")
        );
    }

    #[test]
    fn proxy_switch_moves_proxy_paths_only() {
        let ctx = RunContext::new("d.dev", "a@d.dev", Secrets::new("k")).proxy(ProxyKind::Apache);

        assert_eq!(ctx.layout.proxy_root, PathBuf::from("/etc/apache2"));
        assert_eq!(ctx.layout.proxy_log_dir, PathBuf::from("/var/log/apache2"));
        assert_eq!(ctx.layout.install_dir, PathBuf::from("/opt/waha"));
    }

    #[test]
    fn issued_states() {
        assert!(!ProxyState::Unconfigured.is_issued());
        assert!(!ProxyState::HttpChallengeReady.is_issued());
        assert!(ProxyState::Issued.is_issued());
        assert!(ProxyState::Configured.is_issued());
    }
}
