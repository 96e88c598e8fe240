use std::path::PathBuf;
use std::time::Duration;

use waha_provision::error::ProvisionError;

#[test]
fn display_precondition() {
    let err = ProvisionError::Precondition("must run as root".into());
    assert_eq!(err.to_string(), "precondition failed: must run as root");
}

#[test]
fn display_command_not_found() {
    let err = ProvisionError::CommandNotFound("certbot".into());
    assert_eq!(err.to_string(), "command not found: certbot");
}

#[test]
fn display_tool_invocation() {
    let err = ProvisionError::ToolInvocation {
        command: "certbot certonly".into(),
        exit_code: 1,
        stdout: String::new(),
        stderr: "Challenge failed".into(),
    };
    assert_eq!(err.to_string(), "command failed: certbot certonly (exit code 1)");
    assert_eq!(err.tool_stderr(), Some("Challenge failed"));
}

#[test]
fn empty_stderr_is_not_reported() {
    let err = ProvisionError::ToolInvocation {
        command: "ufw enable".into(),
        exit_code: 1,
        stdout: "out".into(),
        stderr: String::new(),
    };
    assert_eq!(err.tool_stderr(), None);
    assert_eq!(ProvisionError::Aborted.tool_stderr(), None);
}

#[test]
fn display_readiness_timeout_suggests_logs() {
    let err = ProvisionError::ReadinessTimeout {
        target: "http://127.0.0.1:3000".into(),
        waited: Duration::from_secs(120),
        last_error: "connection refused".into(),
    };
    let msg = err.to_string();
    assert!(msg.starts_with("http://127.0.0.1:3000 did not become ready within 120s"));
    assert!(msg.contains("connection refused"));
    assert!(msg.contains("workload logs"));
}

#[test]
fn display_artifact_write_keeps_source() {
    let err = ProvisionError::ArtifactWrite {
        path: PathBuf::from("/etc/nginx/sites-available/a.conf"),
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
    };
    assert_eq!(
        err.to_string(),
        "failed to write /etc/nginx/sites-available/a.conf: denied"
    );
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn display_locked() {
    let err = ProvisionError::Locked(PathBuf::from("/var/lib/waha-provision/provision.lock"));
    assert_eq!(
        err.to_string(),
        "another provisioning run holds the lock at /var/lib/waha-provision/provision.lock"
    );
}

#[test]
fn display_step_failed() {
    let err = ProvisionError::StepFailed {
        step: "proxy".into(),
        message: "certbot exited 1".into(),
    };
    assert_eq!(err.to_string(), "step 'proxy' failed: certbot exited 1");
}

#[test]
fn from_io_error() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
    let err: ProvisionError = io_err.into();
    assert!(matches!(err, ProvisionError::Io(_)));
}

#[test]
fn from_json_error() {
    let json_err = serde_json::from_str::<Vec<u64>>("invalid").unwrap_err();
    let err: ProvisionError = json_err.into();
    assert!(matches!(err, ProvisionError::Json(_)));
}
