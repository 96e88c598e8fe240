//! The workload's `.env` file: API key, base URL and the protected
//! path credentials.
//!
//! Values are reused from an existing file so a rerun renders the
//! same file and leaves a running workload untouched.

use std::path::Path;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::context::{Credentials, RunContext, Secrets};
use crate::error::ProvisionResult;

const API_KEY: &str = "WAHA_API_KEY";
const DASHBOARD_USER: &str = "WAHA_DASHBOARD_USERNAME";
const DASHBOARD_PASSWORD: &str = "WAHA_DASHBOARD_PASSWORD";
const SWAGGER_USER: &str = "WHATSAPP_SWAGGER_USERNAME";
const SWAGGER_PASSWORD: &str = "WHATSAPP_SWAGGER_PASSWORD";

/// Usernames (and optional passwords) requested by the operator.
#[derive(Debug, Clone, Default)]
pub struct Requested {
    pub dashboard_user: Option<String>,
    pub dashboard_password: Option<String>,
    pub swagger_user: Option<String>,
    pub swagger_password: Option<String>,
}

/// 32 hex characters from a random v4 UUID.
#[must_use]
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Parse `KEY=VALUE` lines, skipping blanks and comments.
#[must_use]
pub fn parse_env(content: &str) -> IndexMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Build the run's secrets, preferring values already on disk.
pub fn load_or_generate(env_file: &Path, requested: &Requested) -> ProvisionResult<Secrets> {
    let existing = if env_file.exists() {
        parse_env(&std::fs::read_to_string(env_file)?)
    } else {
        IndexMap::new()
    };

    let api_key = existing
        .get(API_KEY)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(generate_token);

    Ok(Secrets {
        api_key,
        dashboard: resolve(
            &existing,
            requested.dashboard_user.as_deref(),
            requested.dashboard_password.as_deref(),
            (DASHBOARD_USER, DASHBOARD_PASSWORD),
        ),
        swagger: resolve(
            &existing,
            requested.swagger_user.as_deref(),
            requested.swagger_password.as_deref(),
            (SWAGGER_USER, SWAGGER_PASSWORD),
        ),
    })
}

fn resolve(
    existing: &IndexMap<String, String>,
    user: Option<&str>,
    password: Option<&str>,
    (user_key, password_key): (&str, &str),
) -> Option<Credentials> {
    let user = user.filter(|u| !u.is_empty())?;
    let password = password.map_or_else(
        || {
            // Same user as last run: keep its password
            existing
                .get(password_key)
                .filter(|_| existing.get(user_key).map(String::as_str) == Some(user))
                .cloned()
                .unwrap_or_else(generate_token)
        },
        ToString::to_string,
    );
    Some(Credentials::new(user, &password))
}

/// Render the `.env` file for the workload.
#[must_use]
pub fn render(ctx: &RunContext) -> String {
    let mut lines = vec![
        "# Managed by waha-provision".to_string(),
        format!("{API_KEY}={}", ctx.secrets.api_key),
        format!("WAHA_BASE_URL={}", ctx.public_url()),
        "WHATSAPP_API_PORT=3000".to_string(),
        "WAHA_LOG_LEVEL=info".to_string(),
        format!(
            "WAHA_DASHBOARD_ENABLED={}",
            ctx.secrets.dashboard.is_some()
        ),
    ];

    if let Some(c) = &ctx.secrets.dashboard {
        lines.push(format!("{DASHBOARD_USER}={}", c.username));
        lines.push(format!("{DASHBOARD_PASSWORD}={}", c.password));
    }
    if let Some(c) = &ctx.secrets.swagger {
        lines.push(format!("{SWAGGER_USER}={}", c.username));
        lines.push(format!("{SWAGGER_PASSWORD}={}", c.password));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
