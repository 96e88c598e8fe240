//! Readiness polling for the workload.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Status codes that count as "the backend answered". The gateway
/// answers unauthenticated requests with 401 and may redirect to its
/// dashboard, both of which prove it is up.
pub const DEFAULT_ACCEPT: &[u16] = &[200, 301, 302, 401];

/// A single readiness check against some target.
pub trait Probe {
    /// Human-readable target, used in diagnostics.
    fn target(&self) -> String;

    /// Perform one check and return the observed status code, or a
    /// description of why no status could be obtained.
    fn check(&self) -> Result<u16, String>;
}

/// HTTP GET probe.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    request_timeout: Duration,
}

impl HttpProbe {
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl Probe for HttpProbe {
    fn target(&self) -> String {
        self.url.clone()
    }

    fn check(&self) -> Result<u16, String> {
        match ureq::get(&self.url).timeout(self.request_timeout).call() {
            Ok(response) => Ok(response.status()),
            Err(ureq::Error::Status(code, _)) => Ok(code),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready { status: u16, attempts: u32 },
    TimedOut {
        attempts: u32,
        waited: Duration,
        last_error: String,
    },
}

/// Poll `probe` every `poll_interval` until it reports a status in
/// `accept` or `timeout` elapses.
///
/// Never waits longer than `timeout` plus one poll interval (plus
/// the duration of a single check).
pub fn wait_until_ready(
    probe: &dyn Probe,
    accept: &[u16],
    timeout: Duration,
    poll_interval: Duration,
) -> Readiness {
    let start = Instant::now();
    let mut attempts = 0;
    let mut last_error = String::from("no check performed");

    info!("waiting for {} (up to {timeout:?})", probe.target());

    loop {
        attempts += 1;
        match probe.check() {
            Ok(status) if accept.contains(&status) => {
                info!("{} ready after {attempts} attempt(s)", probe.target());
                return Readiness::Ready { status, attempts };
            }
            Ok(status) => last_error = format!("unexpected status {status}"),
            Err(e) => last_error = e,
        }
        debug!("attempt {attempts}: {last_error}");

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Readiness::TimedOut {
                attempts,
                waited: elapsed,
                last_error,
            };
        }
        thread::sleep(poll_interval.min(timeout - elapsed));
    }
}
