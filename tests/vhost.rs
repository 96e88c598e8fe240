mod common;

use std::path::PathBuf;

use waha_provision::artifact::Phase;
use waha_provision::context::{ProxyKind, RunContext, Secrets};
use waha_provision::error::ProvisionError;
use waha_provision::proxy::Proxy;
use waha_provision::vhost::{self, ACME_PATH, TlsMaterial};

fn tls() -> TlsMaterial {
    TlsMaterial {
        certificate: PathBuf::from("/etc/letsencrypt/live/api.example.com/fullchain.pem"),
        private_key: PathBuf::from("/etc/letsencrypt/live/api.example.com/privkey.pem"),
        options_include: Some(PathBuf::from("/etc/letsencrypt/options-ssl-nginx.conf")),
        dhparam: None,
    }
}

fn nginx() -> Proxy {
    Proxy::new(ProxyKind::Nginx, "api.example.com").security_headers(true)
}

fn apache() -> Proxy {
    Proxy::new(ProxyKind::Apache, "api.example.com").security_headers(true)
}

#[test]
fn pre_tls_serves_challenge_only() {
    for proxy in [nginx(), apache()] {
        let site = vhost::render_pre_tls(&proxy);

        assert_eq!(site.phase, Phase::PreTls);
        assert!(site.has_challenge_location(), "{:?}", proxy.kind);
        assert!(!site.has_proxy_block(), "{:?}", proxy.kind);
    }
}

#[test]
fn post_tls_keeps_challenge_and_adds_proxy() {
    for proxy in [nginx(), apache()] {
        let site = vhost::render_post_tls(&proxy, &tls());

        assert_eq!(site.phase, Phase::PostTls);
        assert!(site.has_challenge_location(), "{:?}", proxy.kind);
        assert!(site.has_proxy_block(), "{:?}", proxy.kind);
    }
}

#[test]
fn nginx_pre_tls_text() {
    let out = vhost::render_pre_tls(&nginx()).render();

    assert!(out.contains("listen 80;"));
    assert!(out.contains("server_name api.example.com;"));
    assert!(out.contains(&format!("location ^~ {ACME_PATH} {{")));
    assert!(out.contains("root /var/www/certbot;"));
    assert!(out.contains("return 301 https://$host$request_uri;"));
    assert!(!out.contains("ssl_certificate"));
    assert!(!out.contains("listen 443"));
}

#[test]
fn nginx_post_tls_text() {
    let out = vhost::render_post_tls(&nginx(), &tls()).render();

    assert!(out.contains("listen 443 ssl http2;"));
    assert!(out.contains(
        "ssl_certificate /etc/letsencrypt/live/api.example.com/fullchain.pem;"
    ));
    assert!(out.contains("include /etc/letsencrypt/options-ssl-nginx.conf;"));
    assert!(!out.contains("ssl_dhparam"));
    assert!(out.contains("proxy_pass http://127.0.0.1:3000;"));
    assert!(out.contains("proxy_set_header Upgrade $http_upgrade;"));
    assert!(out.contains("add_header X-Frame-Options \"SAMEORIGIN\" always;"));
    assert!(out.contains("client_max_body_size 50M;"));
}

#[test]
fn apache_post_tls_text() {
    let out = vhost::render_post_tls(&apache(), &tls()).render();

    assert!(out.contains("<VirtualHost *:80>"));
    assert!(out.contains("<VirtualHost *:443>"));
    assert!(out.contains(&format!("Alias {ACME_PATH} /var/www/certbot{ACME_PATH}")));
    assert!(out.contains("SSLEngine on"));
    assert!(out.contains("ProxyPass / http://127.0.0.1:3000/"));
    assert!(out.contains("ProxyPassReverse / http://127.0.0.1:3000/"));
    assert!(out.contains("RewriteRule ^/(.*) ws://127.0.0.1:3000/$1 [P,L]"));
    assert!(out.contains("Header always set Strict-Transport-Security"));
    assert!(out.contains("</VirtualHost>"));
}

#[test]
fn omitted_credentials_produce_no_auth_block() {
    for proxy in [nginx(), apache()] {
        let site = vhost::render_post_tls(&proxy, &tls());
        let out = site.render();

        assert!(!site.has_basic_auth("/dashboard"));
        assert!(!out.contains("auth_basic"));
        assert!(!out.contains("AuthType"));
        assert!(!out.contains("/dashboard"));
    }
}

#[test]
fn supplied_credentials_protect_their_path_only() {
    let nginx = nginx().protect("dashboard", "/dashboard", "/etc/nginx/.htpasswd-dashboard");
    let apache = apache().protect("dashboard", "/dashboard", "/etc/apache2/.htpasswd-dashboard");

    for proxy in [nginx, apache] {
        let site = vhost::render_post_tls(&proxy, &tls());

        assert!(site.has_basic_auth("/dashboard"), "{:?}", proxy.kind);
        assert!(!site.has_basic_auth("/swagger"), "{:?}", proxy.kind);
        assert!(!site.has_basic_auth("/"), "{:?}", proxy.kind);
    }

    let out = vhost::render_post_tls(
        &Proxy::new(ProxyKind::Nginx, "api.example.com").protect(
            "dashboard",
            "/dashboard",
            "/etc/nginx/.htpasswd-dashboard",
        ),
        &tls(),
    )
    .render();
    assert!(out.contains("auth_basic \"WAHA dashboard\";"));
    assert!(out.contains("auth_basic_user_file /etc/nginx/.htpasswd-dashboard;"));
}

#[test]
fn security_headers_are_optional() {
    let out = vhost::render_post_tls(&nginx().security_headers(false), &tls()).render();

    assert!(!out.contains("add_header"));
}

#[test]
fn no_blank_directive_lines() {
    let out = vhost::render_post_tls(&nginx(), &tls()).render();

    for line in out.lines() {
        assert_ne!(line.trim(), ";", "stray terminator in:\n{out}");
        assert!(!line.ends_with(" ;"), "empty argument in: {line}");
    }
}

#[test]
fn artifact_carries_phase() {
    let artifact = vhost::render_pre_tls(&nginx()).artifact("/etc/nginx/sites-available/a.conf");

    assert_eq!(artifact.phase, Phase::PreTls);
    assert_eq!(artifact.mode, 0o644);
    assert!(artifact.content.contains("server_name api.example.com;"));
}

#[test]
fn discover_requires_certificate_and_key() {
    let dir = tempfile::tempdir().unwrap();

    let err = TlsMaterial::discover(dir.path(), "api.example.com", ProxyKind::Nginx).unwrap_err();
    assert!(matches!(err, ProvisionError::TlsNotIssued(d) if d == "api.example.com"));

    common::fake_certificate(dir.path(), "api.example.com");
    let tls = TlsMaterial::discover(dir.path(), "api.example.com", ProxyKind::Nginx).unwrap();

    assert!(tls.certificate.ends_with("live/api.example.com/fullchain.pem"));
    assert!(tls.private_key.ends_with("live/api.example.com/privkey.pem"));
    assert_eq!(
        tls.options_include,
        Some(dir.path().join("options-ssl-nginx.conf"))
    );
    assert_eq!(tls.dhparam, None);

    let apache = TlsMaterial::discover(dir.path(), "api.example.com", ProxyKind::Apache).unwrap();
    assert_eq!(apache.options_include, None);
}

#[test]
fn body_limit_follows_run_context() {
    let ctx = RunContext::new("a.dev", "o@a.dev", Secrets::new("k")).max_body_mb(200);
    let nginx = vhost::render_post_tls(&Proxy::for_context(&ctx), &tls()).render();
    assert!(nginx.contains("client_max_body_size 200M;"));

    let ctx = ctx.proxy(ProxyKind::Apache);
    let apache = vhost::render_post_tls(&Proxy::for_context(&ctx), &tls()).render();
    assert!(apache.contains(&format!("LimitRequestBody {}", 200 * 1024 * 1024)));
}
