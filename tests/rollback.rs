mod common;

use std::path::Path;

use common::ScriptedTools;
use uuid::Uuid;
use waha_provision::artifact::{ConfigArtifact, Phase};
use waha_provision::context::{Layout, ProxyKind, ProxyState, RunContext, Secrets};
use waha_provision::error::ProvisionError;
use waha_provision::host::Host;
use waha_provision::rollback::{PreImage, Rollback, StepUndo, Undo};

fn quoted(p: &Path) -> String {
    shlex::try_quote(&p.to_string_lossy()).unwrap().into_owned()
}

fn lines_mentioning(script: &str, path: &Path) -> Vec<String> {
    let needle = quoted(path);
    script
        .lines()
        .filter(|l| l.split_whitespace().last() == Some(needle.as_str()))
        .map(ToString::to_string)
        .collect()
}

#[test]
fn one_action_per_path_from_earliest_pre_image() {
    let dir = tempfile::tempdir().unwrap();
    let existing = dir.path().join("site.conf");
    let fresh = dir.path().join("new.conf");
    std::fs::write(&existing, "original").unwrap();

    let mut rollback = Rollback::new(Uuid::new_v4(), "a.dev", dir.path().join("backups"));

    rollback.before_write(&existing).unwrap();
    std::fs::write(&existing, "first rewrite").unwrap();
    rollback.before_write(&existing).unwrap();
    std::fs::write(&existing, "second rewrite").unwrap();
    rollback.before_write(&fresh).unwrap();
    rollback.before_write(&fresh).unwrap();

    let records: Vec<_> = rollback.records().collect();
    assert_eq!(records.len(), 2);

    let PreImage::File(copy) = &records[0].pre_image else {
        panic!("expected a file backup, got {:?}", records[0].pre_image);
    };
    assert_eq!(std::fs::read_to_string(copy).unwrap(), "original");
    assert_eq!(records[1].pre_image, PreImage::Absent);

    let script = rollback.emit_script();
    let restore = lines_mentioning(&script, &existing);
    assert_eq!(restore, [format!("cp -p -- {} {}", quoted(copy), quoted(&existing))]);
    let delete = lines_mentioning(&script, &fresh);
    assert_eq!(delete, [format!("rm -f -- {}", quoted(&fresh))]);
}

#[test]
fn symlinks_are_restored_as_links() {
    let dir = tempfile::tempdir().unwrap();
    let link = dir.path().join("enabled.conf");
    std::os::unix::fs::symlink("/etc/nginx/sites-available/old.conf", &link).unwrap();

    let mut rollback = Rollback::new(Uuid::new_v4(), "a.dev", dir.path().join("backups"));
    rollback.before_write(&link).unwrap();

    let script = rollback.emit_script();
    assert!(script.contains(&format!(
        "ln -sfn -- /etc/nginx/sites-available/old.conf {}",
        quoted(&link)
    )));
}

#[test]
fn script_orders_steps_files_dirs_then_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let mut rollback = Rollback::new(Uuid::new_v4(), "a.dev", dir.path().join("backups"));
    rollback.set_step_undo(vec![
        StepUndo {
            step: "workload".into(),
            undo: Undo::default().before("docker compose down"),
        },
        StepUndo {
            step: "proxy".into(),
            undo: Undo::default().after("systemctl reload-or-restart nginx"),
        },
    ]);
    let created = dir.path().join("opt").join("waha");
    rollback.before_create_dir(&created).unwrap();
    rollback.before_write(&created.join(".env")).unwrap();

    let script = rollback.emit_script();

    assert!(script.starts_with("#!/bin/sh\n"));
    assert!(script.contains("a.dev"));
    let pos = |needle: &str| script.find(needle).unwrap_or_else(|| panic!("{needle} missing"));
    let down = pos("docker compose down");
    let restore = pos("rm -f -- ");
    let remove_dir = pos(&format!("rm -rf -- {}", quoted(&dir.path().join("opt"))));
    let reload = pos("systemctl reload-or-restart nginx");
    assert!(down < restore);
    assert!(restore < remove_dir);
    assert!(remove_dir < reload);
    assert!(script.trim_end().ends_with("echo 'Rollback complete'"));
}

#[test]
fn only_outermost_created_dir_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let mut rollback = Rollback::new(Uuid::new_v4(), "a.dev", dir.path().join("backups"));

    rollback.before_create_dir(&dir.path().join("a/b/c")).unwrap();
    rollback.before_create_dir(&dir.path().join("a/b/d")).unwrap();

    assert_eq!(rollback.created_dirs(), [dir.path().join("a")]);
}

#[test]
fn script_is_persisted_on_every_backup() {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("state").join("rollback.sh");
    let target = dir.path().join("x.conf");

    let mut rollback =
        Rollback::new(Uuid::new_v4(), "a.dev", dir.path().join("backups")).persist_to(&script_path);
    rollback.persist().unwrap();
    assert!(!std::fs::read_to_string(&script_path).unwrap().contains("x.conf"));

    rollback.before_write(&target).unwrap();

    let on_disk = std::fs::read_to_string(&script_path).unwrap();
    assert!(on_disk.contains(&format!("rm -f -- {}", quoted(&target))));
    let mode = std::os::unix::fs::PermissionsExt::mode(
        &std::fs::metadata(&script_path).unwrap().permissions(),
    );
    assert_eq!(mode & 0o777, 0o700);
}

#[test]
fn host_refuses_post_tls_artifact_before_issuance() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::rooted(dir.path(), ProxyKind::Nginx);
    let mut ctx = RunContext::new("a.dev", "o@a.dev", Secrets::new("k")).layout(layout);
    let site = ctx.layout.site_file("a.dev");
    let artifact = ConfigArtifact::new(&site, "server {}\n".into()).phase(Phase::PostTls);

    let tools = ScriptedTools::new();
    let mut host = Host::new(&tools, Rollback::for_run(&ctx));

    let err = host.write(&ctx, &artifact).unwrap_err();
    assert!(matches!(err, ProvisionError::TlsNotIssued(_)));
    assert!(!site.exists());

    ctx.proxy_state = ProxyState::Issued;
    host.write(&ctx, &artifact).unwrap();
    assert_eq!(std::fs::read_to_string(&site).unwrap(), "server {}\n");
}

#[test]
fn host_write_sets_mode_and_records_backup() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::rooted(dir.path(), ProxyKind::Nginx);
    let ctx = RunContext::new("a.dev", "o@a.dev", Secrets::new("k")).layout(layout);
    let env = ctx.layout.env_file();

    let tools = ScriptedTools::new();
    let mut host = Host::new(&tools, Rollback::for_run(&ctx));
    host.write(&ctx, &ConfigArtifact::new(&env, "A=1\n".into()).mode(0o600))
        .unwrap();

    let permissions = std::fs::metadata(&env).unwrap().permissions();
    let mode = std::os::unix::fs::PermissionsExt::mode(&permissions);
    assert_eq!(mode & 0o777, 0o600);
    assert_eq!(host.rollback().records().count(), 1);
    assert_eq!(host.rollback().created_dirs(), [dir.path().join("opt")]);
}

#[test]
fn host_write_hands_file_to_owner() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::rooted(dir.path(), ProxyKind::Nginx);
    let ctx = RunContext::new("a.dev", "o@a.dev", Secrets::new("k")).layout(layout);
    let store = ctx.layout.htpasswd_file("dashboard");
    let artifact = ConfigArtifact::new(&store, "admin:x\n".into())
        .mode(0o640)
        .owner("root", "www-data");

    let tools = ScriptedTools::new();
    let mut host = Host::new(&tools, Rollback::for_run(&ctx));
    host.write(&ctx, &artifact).unwrap();

    let calls = tools.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "chown");
    assert_eq!(
        calls[0].args,
        ["root:www-data".to_string(), store.to_string_lossy().into_owned()]
    );
    assert_eq!(host.take_transcript().len(), 1);
}

#[test]
fn host_write_without_owner_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let layout = Layout::rooted(dir.path(), ProxyKind::Nginx);
    let ctx = RunContext::new("a.dev", "o@a.dev", Secrets::new("k")).layout(layout);

    let tools = ScriptedTools::new();
    let mut host = Host::new(&tools, Rollback::for_run(&ctx));
    host.write(&ctx, &ConfigArtifact::new(ctx.layout.jail_file(), "[x]\n".into()))
        .unwrap();

    assert!(tools.calls().is_empty());
}

#[test]
fn removal_runs_before_restores() {
    let mut rollback = Rollback::new(Uuid::nil(), "a.dev", "/tmp/unused-backups");
    rollback.set_step_undo(vec![StepUndo {
        step: "proxy".into(),
        undo: Undo::default()
            .remove(Path::new("/etc/nginx/sites-enabled/a.dev.conf"))
            .after("systemctl reload-or-restart nginx"),
    }]);

    let script = rollback.emit_script();

    let removal = script.find("rm -f -- /etc/nginx/sites-enabled/a.dev.conf").unwrap();
    let reload = script.find("systemctl reload-or-restart nginx").unwrap();
    assert!(removal < reload);
}
