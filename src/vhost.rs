//! Two-phase reverse proxy site rendering.
//!
//! The pre-TLS site serves the ACME HTTP-01 challenge and redirects
//! everything else to HTTPS. The post-TLS site keeps that plain HTTP
//! server and adds the TLS server proxying to the backend. Each phase
//! regenerates the whole file; values owned by certbot (certificate
//! paths, its recommended TLS options) are discovered on disk after
//! issuance and placed in their own slots.

use std::path::{Path, PathBuf};

use crate::artifact::{ConfigArtifact, Phase};
use crate::conf::{self, Block, Config, Syntax};
use crate::context::ProxyKind;
use crate::error::{ProvisionError, ProvisionResult};
use crate::proxy::{ProtectedPath, Proxy};

pub const ACME_PATH: &str = "/.well-known/acme-challenge/";

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("X-Frame-Options", "SAMEORIGIN"),
    ("X-Content-Type-Options", "nosniff"),
    ("X-XSS-Protection", "1; mode=block"),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
    ("Strict-Transport-Security", "max-age=31536000; includeSubDomains"),
];

/// TLS values written by certbot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
    /// certbot's recommended TLS settings, included verbatim.
    pub options_include: Option<PathBuf>,
    pub dhparam: Option<PathBuf>,
}

impl TlsMaterial {
    /// Find the certificate and certbot's shared TLS settings for
    /// `domain` under `letsencrypt_dir`.
    ///
    /// # Errors
    ///
    /// [`ProvisionError::TlsNotIssued`] when the certificate or key is
    /// missing.
    pub fn discover(
        letsencrypt_dir: &Path,
        domain: &str,
        kind: ProxyKind,
    ) -> ProvisionResult<Self> {
        let live = letsencrypt_dir.join("live").join(domain);
        let certificate = live.join("fullchain.pem");
        let private_key = live.join("privkey.pem");
        if !certificate.is_file() || !private_key.is_file() {
            return Err(ProvisionError::TlsNotIssued(domain.to_string()));
        }

        let options_name = match kind {
            ProxyKind::Nginx => "options-ssl-nginx.conf",
            ProxyKind::Apache => "options-ssl-apache.conf",
        };
        let existing = |p: PathBuf| p.is_file().then_some(p);

        Ok(Self {
            certificate,
            private_key,
            options_include: existing(letsencrypt_dir.join(options_name)),
            dhparam: match kind {
                ProxyKind::Nginx => existing(letsencrypt_dir.join("ssl-dhparams.pem")),
                ProxyKind::Apache => None,
            },
        })
    }
}

/// A rendered site configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vhost {
    pub phase: Phase,
    pub config: Config,
}

impl Vhost {
    #[must_use]
    pub fn render(&self) -> String {
        conf::format(&self.config)
    }

    #[must_use]
    pub fn artifact(&self, path: impl Into<PathBuf>) -> ConfigArtifact {
        ConfigArtifact::new(path, self.render()).phase(self.phase)
    }

    /// Whether the ACME HTTP-01 challenge path is served.
    #[must_use]
    pub fn has_challenge_location(&self) -> bool {
        match self.config.syntax {
            Syntax::Nginx => self
                .config
                .all_blocks()
                .any(|b| b.name == "location" && b.args.iter().any(|a| a == ACME_PATH)),
            Syntax::Apache => self
                .config
                .all_directives()
                .any(|d| d.name == "Alias" && d.args.first().is_some_and(|a| a == ACME_PATH)),
        }
    }

    /// Whether requests are forwarded to a backend.
    #[must_use]
    pub fn has_proxy_block(&self) -> bool {
        match self.config.syntax {
            Syntax::Nginx => self.config.has_directive("proxy_pass"),
            Syntax::Apache => self.config.has_directive("ProxyPass"),
        }
    }

    /// Whether `location` is guarded by basic auth.
    #[must_use]
    pub fn has_basic_auth(&self, location: &str) -> bool {
        let (block_name, directive) = match self.config.syntax {
            Syntax::Nginx => ("location", "auth_basic"),
            Syntax::Apache => ("Location", "AuthType"),
        };
        self.config.all_blocks().any(|b| {
            b.name == block_name
                && b.args.iter().any(|a| a == location)
                && b.has_directive(directive)
        })
    }
}

/// Plain HTTP site used while the certificate is being issued.
#[must_use]
pub fn render_pre_tls(proxy: &Proxy) -> Vhost {
    let config = match proxy.kind {
        ProxyKind::Nginx => Config::new(Syntax::Nginx)
            .header(&format!("{} - pre-TLS, managed by waha-provision", proxy.domain))
            .block(nginx_http_server(proxy)),
        ProxyKind::Apache => Config::new(Syntax::Apache)
            .header(&format!("{} - pre-TLS, managed by waha-provision", proxy.domain))
            .block(apache_http_vhost(proxy)),
    };
    Vhost {
        phase: Phase::PreTls,
        config,
    }
}

/// Full site: the challenge/redirect server plus the TLS server
/// forwarding to the backend.
#[must_use]
pub fn render_post_tls(proxy: &Proxy, tls: &TlsMaterial) -> Vhost {
    let config = match proxy.kind {
        ProxyKind::Nginx => Config::new(Syntax::Nginx)
            .header(&format!("{} - managed by waha-provision", proxy.domain))
            .block(nginx_http_server(proxy))
            .block(nginx_tls_server(proxy, tls)),
        ProxyKind::Apache => Config::new(Syntax::Apache)
            .header(&format!("{} - managed by waha-provision", proxy.domain))
            .block(apache_http_vhost(proxy))
            .block(apache_tls_vhost(proxy, tls)),
    };
    Vhost {
        phase: Phase::PostTls,
        config,
    }
}

fn path_str(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn quoted(s: &str) -> String {
    format!("\"{s}\"")
}

// -- nginx --

fn nginx_http_server(proxy: &Proxy) -> Block {
    let webroot = path_str(&proxy.acme_webroot);
    Block::new("server", &[])
        .directive("listen", &["80"])
        .directive("listen", &["[::]:80"])
        .directive("server_name", &[&proxy.domain])
        .blank()
        .block(
            Block::new("location", &["^~", ACME_PATH])
                .directive("root", &[&webroot])
                .directive("default_type", &["\"text/plain\""])
                .directive("try_files", &["$uri", "=404"]),
        )
        .blank()
        .block(
            Block::new("location", &["/"])
                .directive("return", &["301", "https://$host$request_uri"]),
        )
}

fn nginx_tls_server(proxy: &Proxy, tls: &TlsMaterial) -> Block {
    let mut server = Block::new("server", &[])
        .directive("listen", &["443", "ssl", "http2"])
        .directive("listen", &["[::]:443", "ssl", "http2"])
        .directive("server_name", &[&proxy.domain])
        .blank()
        .comment("certificate managed by certbot")
        .directive("ssl_certificate", &[&path_str(&tls.certificate)])
        .directive("ssl_certificate_key", &[&path_str(&tls.private_key)]);

    if let Some(options) = &tls.options_include {
        server = server.directive("include", &[&path_str(options)]);
    }
    if let Some(dhparam) = &tls.dhparam {
        server = server.directive("ssl_dhparam", &[&path_str(dhparam)]);
    }

    server = server
        .blank()
        .directive("access_log", &[&path_str(&proxy.access_log)])
        .directive("error_log", &[&path_str(&proxy.error_log)])
        .directive("client_max_body_size", &[&format!("{}M", proxy.max_body_mb)]);

    if proxy.security_headers {
        server = server.blank();
        for (name, value) in SECURITY_HEADERS {
            server = server.directive("add_header", &[name, &quoted(value), "always"]);
        }
    }

    for path in &proxy.protected {
        server = server.blank().block(nginx_protected_location(proxy, path));
    }

    server
        .blank()
        .block(nginx_proxy_location(Block::new("location", &["/"]), proxy))
}

fn nginx_protected_location(proxy: &Proxy, path: &ProtectedPath) -> Block {
    let block = Block::new("location", &[&path.location])
        .directive("auth_basic", &[&quoted(&path.auth.realm)])
        .directive("auth_basic_user_file", &[&path_str(&path.auth.user_file)]);
    nginx_proxy_location(block, proxy)
}

fn nginx_proxy_location(block: Block, proxy: &Proxy) -> Block {
    block
        .directive("proxy_pass", &[&proxy.upstream])
        .directive("proxy_http_version", &["1.1"])
        .directive("proxy_set_header", &["Upgrade", "$http_upgrade"])
        .directive("proxy_set_header", &["Connection", "\"upgrade\""])
        .directive("proxy_set_header", &["Host", "$host"])
        .directive("proxy_set_header", &["X-Real-IP", "$remote_addr"])
        .directive("proxy_set_header", &["X-Forwarded-For", "$proxy_add_x_forwarded_for"])
        .directive("proxy_set_header", &["X-Forwarded-Proto", "$scheme"])
        .directive("proxy_read_timeout", &["300s"])
}

// -- apache --

fn apache_http_vhost(proxy: &Proxy) -> Block {
    let challenge_dir = format!("{}{ACME_PATH}", path_str(&proxy.acme_webroot));
    Block::new("VirtualHost", &["*:80"])
        .directive("ServerName", &[&proxy.domain])
        .blank()
        .directive("Alias", &[ACME_PATH, &challenge_dir])
        .block(
            Block::new("Directory", &[&quoted(&challenge_dir)])
                .directive("Options", &["None"])
                .directive("AllowOverride", &["None"])
                .directive("Require", &["all", "granted"]),
        )
        .blank()
        .directive("RewriteEngine", &["On"])
        .directive("RewriteCond", &["%{REQUEST_URI}", "!^/\\.well-known/acme-challenge/"])
        .directive("RewriteRule", &["^", "https://%{SERVER_NAME}%{REQUEST_URI}", "[END,R=301]"])
        .blank()
        .directive("ErrorLog", &[&path_str(&proxy.error_log)])
        .directive("CustomLog", &[&path_str(&proxy.access_log), "combined"])
}

fn apache_tls_vhost(proxy: &Proxy, tls: &TlsMaterial) -> Block {
    let backend = format!("{}/", proxy.upstream);
    let ws_backend = format!("{}/$1", proxy.upstream.replacen("http", "ws", 1));

    let mut vhost = Block::new("VirtualHost", &["*:443"])
        .directive("ServerName", &[&proxy.domain])
        .blank()
        .comment("certificate managed by certbot")
        .directive("SSLEngine", &["on"])
        .directive("SSLCertificateFile", &[&path_str(&tls.certificate)])
        .directive("SSLCertificateKeyFile", &[&path_str(&tls.private_key)]);

    if let Some(options) = &tls.options_include {
        vhost = vhost.directive("Include", &[&path_str(options)]);
    }

    vhost = vhost
        .blank()
        .directive("ErrorLog", &[&path_str(&proxy.error_log)])
        .directive("CustomLog", &[&path_str(&proxy.access_log), "combined"])
        .directive(
            "LimitRequestBody",
            &[&(u64::from(proxy.max_body_mb) * 1024 * 1024).to_string()],
        );

    if proxy.security_headers {
        vhost = vhost.blank();
        for (name, value) in SECURITY_HEADERS {
            vhost = vhost.directive("Header", &["always", "set", name, &quoted(value)]);
        }
    }

    vhost = vhost
        .blank()
        .directive("ProxyPreserveHost", &["On"])
        .directive("ProxyRequests", &["Off"])
        .directive("RequestHeader", &["set", "X-Forwarded-Proto", "\"https\""]);

    for path in &proxy.protected {
        vhost = vhost.blank().block(
            Block::new("Location", &[&path.location])
                .directive("AuthType", &["Basic"])
                .directive("AuthName", &[&quoted(&path.auth.realm)])
                .directive("AuthUserFile", &[&path_str(&path.auth.user_file)])
                .directive("Require", &["valid-user"]),
        );
    }

    vhost
        .blank()
        .directive("RewriteEngine", &["On"])
        .directive("RewriteCond", &["%{HTTP:Upgrade}", "=websocket", "[NC]"])
        .directive("RewriteRule", &["^/(.*)", &ws_backend, "[P,L]"])
        .directive("ProxyPass", &["/", &backend])
        .directive("ProxyPassReverse", &["/", &backend])
}
