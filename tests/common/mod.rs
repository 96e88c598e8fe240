#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;

use waha_provision::cmd::{Invocation, ToolResult, ToolRunner};
use waha_provision::context::RunContext;
use waha_provision::error::{ProvisionError, ProvisionResult};
use waha_provision::host::Host;
use waha_provision::probe::Probe;
use waha_provision::rollback::Undo;
use waha_provision::step::Step;

type Handler = Box<dyn Fn(&Invocation) -> ToolResult>;

/// Tool runner answering from per-program handlers. Programs without
/// a handler exit 0 with no output. Every invocation is recorded.
#[derive(Default)]
pub struct ScriptedTools {
    handlers: HashMap<String, Handler>,
    calls: RefCell<Vec<Invocation>>,
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(
        mut self,
        program: &str,
        handler: impl Fn(&Invocation) -> ToolResult + 'static,
    ) -> Self {
        self.handlers.insert(program.to_string(), Box::new(handler));
        self
    }

    /// Make `program` always exit with `code`.
    pub fn exit(self, program: &str, code: i32) -> Self {
        self.on(program, move |inv| result(inv, code, "", ""))
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn ran(&self, program: &str, first_arg: &str) -> bool {
        self.calls
            .borrow()
            .iter()
            .any(|c| c.program == program && c.args.first().is_some_and(|a| a == first_arg))
    }
}

impl ToolRunner for ScriptedTools {
    fn invoke(&self, invocation: &Invocation) -> ProvisionResult<ToolResult> {
        self.calls.borrow_mut().push(invocation.clone());
        Ok(match self.handlers.get(&invocation.program) {
            Some(handler) => handler(invocation),
            None => result(invocation, 0, "", ""),
        })
    }
}

/// `ScriptedTools` shared with the pipeline, which needs ownership.
#[derive(Clone)]
pub struct Shared(pub std::rc::Rc<ScriptedTools>);

impl ToolRunner for Shared {
    fn invoke(&self, invocation: &Invocation) -> ProvisionResult<ToolResult> {
        self.0.invoke(invocation)
    }
}

pub fn result(inv: &Invocation, exit_code: i32, stdout: &str, stderr: &str) -> ToolResult {
    ToolResult {
        command: inv.command_line(),
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

/// Value following `flag` in the invocation's arguments.
pub fn arg_after<'a>(inv: &'a Invocation, flag: &str) -> Option<&'a str> {
    inv.args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| inv.args.get(i + 1))
        .map(String::as_str)
}

/// Probe returning a fixed answer.
pub struct FixedProbe(pub Result<u16, String>);

impl Probe for FixedProbe {
    fn target(&self) -> String {
        "http://backend.test/".into()
    }

    fn check(&self) -> Result<u16, String> {
        self.0.clone()
    }
}

/// Probe that is unreachable for the first `failures` checks.
pub struct FlakyProbe {
    pub failures: Cell<u32>,
    pub checks: Cell<u32>,
}

impl FlakyProbe {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: Cell::new(failures),
            checks: Cell::new(0),
        }
    }
}

impl Probe for FlakyProbe {
    fn target(&self) -> String {
        "flaky".into()
    }

    fn check(&self) -> Result<u16, String> {
        self.checks.set(self.checks.get() + 1);
        let left = self.failures.get();
        if left == 0 {
            Ok(200)
        } else {
            self.failures.set(left - 1);
            Err("connection refused".into())
        }
    }
}

type ApplyFn = Box<dyn Fn(&mut RunContext, &mut Host<'_>) -> ProvisionResult<()>>;

/// Step built from closures. Counts `apply` calls.
pub struct FnStep {
    id: String,
    requires: Vec<&'static str>,
    applied: Box<dyn Fn() -> bool>,
    apply: ApplyFn,
    undo: Vec<String>,
    pub apply_count: std::rc::Rc<Cell<u32>>,
}

impl FnStep {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            requires: Vec::new(),
            applied: Box::new(|| false),
            apply: Box::new(|_, _| Ok(())),
            undo: Vec::new(),
            apply_count: std::rc::Rc::new(Cell::new(0)),
        }
    }

    pub fn requires(mut self, ids: &[&'static str]) -> Self {
        self.requires = ids.to_vec();
        self
    }

    pub fn applied(mut self, f: impl Fn() -> bool + 'static) -> Self {
        self.applied = Box::new(f);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        let message = message.to_string();
        self.apply = Box::new(move |_, _| Err(ProvisionError::Precondition(message.clone())));
        self
    }

    pub fn on_apply(
        mut self,
        f: impl Fn(&mut RunContext, &mut Host<'_>) -> ProvisionResult<()> + 'static,
    ) -> Self {
        self.apply = Box::new(f);
        self
    }

    pub fn undo(mut self, cmd: &str) -> Self {
        self.undo.push(cmd.to_string());
        self
    }
}

impl Step for FnStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn requires(&self) -> &[&str] {
        &self.requires
    }

    fn describe(&self, _ctx: &RunContext) -> String {
        format!("run {}", self.id)
    }

    fn is_applied(&self, _ctx: &RunContext, _host: &mut Host<'_>) -> ProvisionResult<bool> {
        Ok((self.applied)())
    }

    fn apply(&self, ctx: &mut RunContext, host: &mut Host<'_>) -> ProvisionResult<()> {
        self.apply_count.set(self.apply_count.get() + 1);
        (self.apply)(ctx, host)
    }

    fn rollback(&self, _ctx: &RunContext) -> Undo {
        self.undo
            .iter()
            .fold(Undo::default(), |undo, cmd| undo.before(cmd.as_str()))
    }
}

/// Write the files certbot leaves behind after a successful issuance.
pub fn fake_certificate(letsencrypt_dir: &Path, domain: &str) {
    let live = letsencrypt_dir.join("live").join(domain);
    std::fs::create_dir_all(&live).unwrap();
    std::fs::write(live.join("fullchain.pem"), "CERT").unwrap();
    std::fs::write(live.join("privkey.pem"), "KEY").unwrap();
    std::fs::write(letsencrypt_dir.join("options-ssl-nginx.conf"), "# certbot").unwrap();
}

/// Root, every port free, every name resolving.
pub struct PermissiveHost;

impl waha_provision::validate::HostFacts for PermissiveHost {
    fn is_root(&self) -> bool {
        true
    }

    fn port_in_use(&self, _port: u16) -> bool {
        false
    }

    fn resolve(&self, _domain: &str) -> Result<Vec<std::net::IpAddr>, String> {
        Ok(vec![std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)])
    }
}
