//! Graceful-then-forced termination of a probe process.
//!
//! 1. Send SIGTERM and wait up to `term_timeout` for the process to exit
//! 2. If still running, send SIGKILL and wait up to `kill_timeout`
//! 3. If it survives both, report [`ShutdownOutcome::TerminationFailed`]
//!
//! Both waits go through [`bounded_wait`], so the timer is dropped as soon as
//! either side of the race resolves.

use crate::config::ShutdownConfig;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;

/// How a probe process ended up after teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The process had already exited; no signal was sent.
    /// `None` if the exit status could not be collected.
    Exited(Option<ExitStatus>),
    /// The process exited after being signaled.
    Terminated { forced: bool, status: ExitStatus },
    /// The process survived SIGKILL and the kill wait. It may be orphaned.
    TerminationFailed,
}

/// Race `fut` against a timer. Returns `None` if the timer fires first.
///
/// Whichever side loses is dropped before this returns.
pub async fn bounded_wait<F: Future>(bound: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(bound, fut).await.ok()
}

/// The operations the escalator needs from a running process.
pub trait Terminable {
    /// OS process id, or `None` once the process has been reaped.
    fn pid(&self) -> Option<u32>;
    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
    /// Deliver the graceful-termination signal.
    fn terminate(&mut self) -> io::Result<()>;
    /// Deliver the forced-termination signal without waiting.
    fn force_kill(&mut self) -> io::Result<()>;
    /// Wait for the process to exit and reap it.
    fn wait(&mut self) -> impl Future<Output = io::Result<ExitStatus>> + Send;
}

impl Terminable for Child {
    fn pid(&self) -> Option<u32> {
        self.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Child::try_wait(self)
    }

    fn terminate(&mut self) -> io::Result<()> {
        let pid = self
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "child has no PID"))?;
        signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
    }

    fn force_kill(&mut self) -> io::Result<()> {
        // SIGKILL on unix
        self.start_kill()
    }

    fn wait(&mut self) -> impl Future<Output = io::Result<ExitStatus>> + Send {
        Child::wait(self)
    }
}

/// Tear down `process` using the two-tier protocol.
///
/// Never fails: every error is logged and folded into the outcome.
pub async fn escalate<P: Terminable + Send>(
    process: &mut P,
    bounds: &ShutdownConfig,
) -> ShutdownOutcome {
    let Some(pid) = process.pid() else {
        return collect_exit(process).await;
    };

    match process.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!(pid, ?status, "probe already exited, skipping signals");
            return ShutdownOutcome::Exited(Some(status));
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(pid, error = %e, "failed to poll probe status"),
    }

    tracing::debug!(pid, "sending SIGTERM to probe");
    if let Err(e) = process.terminate() {
        if e.raw_os_error() == Some(Errno::ESRCH as i32) {
            return collect_exit(process).await;
        }
        tracing::warn!(pid, error = %e, "failed to send SIGTERM");
    }

    match bounded_wait(bounds.term_timeout(), process.wait()).await {
        Some(Ok(status)) => {
            tracing::debug!(pid, ?status, "probe exited after SIGTERM");
            return ShutdownOutcome::Terminated {
                forced: false,
                status,
            };
        }
        Some(Err(e)) => tracing::warn!(pid, error = %e, "error waiting for probe after SIGTERM"),
        None => tracing::warn!(
            pid,
            timeout_ms = bounds.term_timeout_ms,
            "probe did not exit after SIGTERM, sending SIGKILL"
        ),
    }

    if let Err(e) = process.force_kill() {
        tracing::warn!(pid, error = %e, "failed to send SIGKILL");
    }

    match bounded_wait(bounds.kill_timeout(), process.wait()).await {
        Some(Ok(status)) => {
            tracing::debug!(pid, ?status, "probe exited after SIGKILL");
            ShutdownOutcome::Terminated {
                forced: true,
                status,
            }
        }
        Some(Err(e)) => {
            tracing::error!(pid, error = %e, "error waiting for probe after SIGKILL");
            ShutdownOutcome::TerminationFailed
        }
        None => {
            tracing::error!(
                pid,
                timeout_ms = bounds.kill_timeout_ms,
                "probe survived SIGKILL, treating session as closed"
            );
            ShutdownOutcome::TerminationFailed
        }
    }
}

async fn collect_exit<P: Terminable + Send>(process: &mut P) -> ShutdownOutcome {
    match process.wait().await {
        Ok(status) => ShutdownOutcome::Exited(Some(status)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to collect probe exit status");
            ShutdownOutcome::Exited(None)
        }
    }
}
