//! External tool adapter.
//!
//! Every package manager, container, TLS, firewall and intrusion
//! prevention command goes through [`ToolRunner::invoke`]. The adapter
//! only looks at exit codes: a non-zero exit is a failure, output is
//! captured for the run log and never scraped.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult};

/// A single command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    #[must_use]
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn stdin(mut self, data: &[u8]) -> Self {
        self.stdin = Some(data.to_vec());
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shell-quoted rendering, used in logs and error messages.
    #[must_use]
    pub fn command_line(&self) -> String {
        let parts =
            std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(parts.clone()).unwrap_or_else(|_| parts.collect::<Vec<_>>().join(" "))
    }
}

/// Normalized outcome of one external command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolResult {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a [`ProvisionError::ToolInvocation`].
    pub fn check(self) -> ProvisionResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProvisionError::ToolInvocation {
                command: self.command,
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs external commands on behalf of steps.
///
/// Implementations return `Err` only when the command could not be
/// run at all (missing binary, timeout, I/O failure). A command that
/// ran and exited non-zero is reported through [`ToolResult`].
pub trait ToolRunner {
    fn invoke(&self, invocation: &Invocation) -> ProvisionResult<ToolResult>;
}

/// Runs commands on the local host with a default timeout.
#[derive(Debug, Clone)]
pub struct SystemTools {
    default_timeout: Duration,
}

impl SystemTools {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            default_timeout: Duration::from_secs(900),
        }
    }
}

impl Default for SystemTools {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRunner for SystemTools {
    fn invoke(&self, invocation: &Invocation) -> ProvisionResult<ToolResult> {
        let command = invocation.command_line();
        let timeout = invocation.timeout.unwrap_or(self.default_timeout);
        debug!("running {command}");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProvisionError::CommandNotFound(invocation.program.clone())
                } else {
                    ProvisionError::Io(e)
                }
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        if let (Some(data), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
            // Dropping stdin closes the pipe so the child sees EOF
            if let Err(e) = stdin.write_all(data) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProvisionError::Io(e));
            }
        }

        let exit_code = wait_with_deadline(&mut child, timeout).ok_or_else(|| {
            ProvisionError::ToolTimeout {
                command: command.clone(),
                timeout,
            }
        })??;

        let result = ToolResult {
            command,
            exit_code,
            stdout: join_output(stdout),
            stderr: join_output(stderr),
        };
        debug!("exit code {}", result.exit_code);
        Ok(result)
    }
}

/// Poll the child until it exits or the deadline passes. Returns
/// `None` (after killing the child) on timeout.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Option<ProvisionResult<i32>> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            // No exit code means the child was killed by a signal
            Ok(Some(status)) => return Some(Ok(status.code().unwrap_or(-1))),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
            Ok(None) => thread::sleep(Duration::from_millis(50)),
            Err(e) => return Some(Err(ProvisionError::Io(e))),
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_output(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_quotes_arguments() {
        let inv = Invocation::new("sh", &["-c", "echo hi"]);

        assert_eq!(inv.command_line(), "sh -c 'echo hi'");
    }

    #[test]
    fn nonzero_exit_is_failure() {
        let result = ToolResult {
            command: "false".into(),
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom".into(),
        };

        let err = result.check().unwrap_err();
        assert_eq!(err.tool_stderr(), Some("boom"));
    }

    #[test]
    fn captures_output_and_exit_code() {
        let tools = SystemTools::new();
        let inv = Invocation::new("sh", &["-c", "echo out; echo err >&2; exit 3"]);

        let result = tools.invoke(&inv).unwrap();

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "out");
        assert_eq!(result.stderr, "err");
    }

    #[test]
    fn feeds_stdin() {
        let tools = SystemTools::new();
        let inv = Invocation::new("cat", &[]).stdin(b"secret");

        let result = tools.invoke(&inv).unwrap();

        assert_eq!(result.stdout, "secret");
    }

    #[test]
    fn large_stdin_echoed_back_does_not_block() {
        let tools = SystemTools::new();
        let input = vec![b'x'; 1 << 20];
        let inv = Invocation::new("cat", &[])
            .stdin(&input)
            .timeout(Duration::from_secs(30));

        let result = tools.invoke(&inv).unwrap();

        assert_eq!(result.stdout.len(), input.len());
    }

    #[test]
    fn missing_program() {
        let tools = SystemTools::new();
        let inv = Invocation::new("definitely-not-a-real-binary-xyz", &[]);

        let err = tools.invoke(&inv).unwrap_err();
        assert!(matches!(err, ProvisionError::CommandNotFound(_)));
    }

    #[test]
    fn applies_timeout() {
        let tools = SystemTools::new();
        let inv = Invocation::new("sleep", &["5"]).timeout(Duration::from_millis(200));

        let err = tools.invoke(&inv).unwrap_err();
        assert!(matches!(err, ProvisionError::ToolTimeout { .. }));
    }
}
