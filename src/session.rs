/// Single probe lifecycle: spawn the probe, stream its stdout as samples,
/// and tear the process down exactly once when the stream ends.
use crate::config::{ProbeConfig, ShutdownConfig};
use crate::parser::{parse_line, Sample};
use crate::shutdown::{bounded_wait, escalate, ShutdownOutcome, Terminable};
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Identifies one probe session within a controller's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why the sample sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The probe closed its output without being asked to.
    Exhausted,
    /// Cancellation was requested.
    Cancelled,
    /// Reading the probe's output failed.
    ReadError,
}

/// Result of a fully finalized session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub id: SessionId,
    pub end: SessionEnd,
    pub shutdown: ShutdownOutcome,
}

/// Errors that can occur while running a probe.
#[derive(Debug)]
pub enum SessionError {
    /// Failed to spawn the probe subprocess.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// The spawned probe had no stdout pipe.
    MissingStdout,
    /// Failed to read from the probe's stdout.
    Io { source: std::io::Error },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Spawn { command, source } => {
                write!(f, "failed to spawn probe `{}`: {}", command, source)
            }
            SessionError::MissingStdout => write!(f, "probe stdout was not captured"),
            SessionError::Io { source } => {
                write!(f, "I/O error reading probe output: {}", source)
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Spawn { source, .. } => Some(source),
            SessionError::MissingStdout => None,
            SessionError::Io { source } => Some(source),
        }
    }
}

/// One spawned probe plus its output stream.
///
/// Samples are pulled lazily with [`next`](Self::next). [`run`](Self::run)
/// drives the whole sequence and is the only path that finalizes the
/// process, so teardown happens once regardless of how the stream ended.
/// If a session is dropped without running, the child is killed on drop.
pub struct ProbeSession {
    id: SessionId,
    child: Child,
    reader: Option<Box<dyn AsyncBufRead + Unpin + Send>>,
    buf: Vec<u8>,
    token: CancellationToken,
    bounds: ShutdownConfig,
}

impl ProbeSession {
    /// Spawn the probe described by `probe`. Stderr is discarded.
    pub fn open(
        id: SessionId,
        probe: &ProbeConfig,
        bounds: ShutdownConfig,
    ) -> Result<Self, SessionError> {
        let args = probe.build_args();
        tracing::info!(
            session = %id,
            command = %probe.command,
            args = ?args,
            "spawning probe"
        );

        let mut child = Command::new(&probe.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::Spawn {
                command: probe.command.clone(),
                source: e,
            })?;

        let stdout = child.stdout.take().ok_or(SessionError::MissingStdout)?;
        tracing::debug!(session = %id, pid = child.id().unwrap_or(0), "probe started");

        Ok(Self {
            id,
            child,
            reader: Some(Box::new(BufReader::new(stdout))),
            buf: Vec::with_capacity(256),
            token: CancellationToken::new(),
            bounds,
        })
    }

    /// Session over an already spawned `child` whose output arrives on `reader`.
    #[cfg(test)]
    fn with_reader(
        id: SessionId,
        child: Child,
        reader: impl AsyncBufRead + Unpin + Send + 'static,
        bounds: ShutdownConfig,
    ) -> Self {
        Self {
            id,
            child,
            reader: Some(Box::new(reader)),
            buf: Vec::with_capacity(256),
            token: CancellationToken::new(),
            bounds,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Token that cancels this session from elsewhere.
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request termination. A pending [`next`](Self::next) returns `None` promptly.
    #[cfg(test)]
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the next output line and parse it.
    ///
    /// Returns `Ok(None)` at end of stream or once cancellation is requested.
    pub async fn next(&mut self) -> Result<Option<Sample>, SessionError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        self.buf.clear();

        let read = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Ok(None),
            read = reader.read_until(b'\n', &mut self.buf) => read,
        };

        match read {
            Ok(0) => Ok(None),
            Ok(_) => {
                // Non-UTF8 bytes shouldn't end the stream
                let line = String::from_utf8_lossy(&self.buf);
                let line = line.trim_end_matches(['\n', '\r']);
                let sample = parse_line(line);
                tracing::trace!(session = %self.id, line, ?sample, "probe output");
                Ok(Some(sample))
            }
            Err(e) => Err(SessionError::Io { source: e }),
        }
    }

    /// Drive the session to completion, handing each sample to `on_sample`,
    /// then finalize the probe process.
    pub async fn run<F: FnMut(Sample)>(mut self, mut on_sample: F) -> SessionReport {
        let end = loop {
            match self.next().await {
                Ok(Some(sample)) => {
                    // Cancelled while the line was in flight
                    if self.token.is_cancelled() {
                        break SessionEnd::Cancelled;
                    }
                    on_sample(sample);
                }
                Ok(None) if self.token.is_cancelled() => break SessionEnd::Cancelled,
                Ok(None) => {
                    tracing::info!(session = %self.id, "probe exited on its own");
                    break SessionEnd::Exhausted;
                }
                Err(e) => {
                    tracing::warn!(session = %self.id, error = %e, "probe output stream failed");
                    break SessionEnd::ReadError;
                }
            }
        };

        let shutdown = self.finalize(end).await;
        tracing::info!(session = %self.id, ?end, ?shutdown, "probe session closed");
        SessionReport {
            id: self.id,
            end,
            shutdown,
        }
    }

    async fn finalize(&mut self, end: SessionEnd) -> ShutdownOutcome {
        self.token.cancel();
        drop(self.reader.take());

        if end == SessionEnd::Exhausted {
            // Stdout closed; give the probe the graceful bound to exit by itself.
            if let Some(Ok(status)) =
                bounded_wait(self.bounds.term_timeout(), self.child.wait()).await
            {
                return ShutdownOutcome::Exited(Some(status));
            }
            tracing::warn!(
                session = %self.id,
                pid = self.child.pid().unwrap_or(0),
                "probe closed stdout but kept running"
            );
        }

        escalate(&mut self.child, &self.bounds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncRead, ReadBuf};

    /// Yields `data`, then fails every subsequent read.
    struct FailingOutput {
        data: &'static [u8],
    }

    impl AsyncRead for FailingOutput {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.data.is_empty() {
                return Poll::Ready(Err(io::Error::other("connection reset")));
            }
            let n = buf.remaining().min(self.data.len());
            buf.put_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Poll::Ready(Ok(()))
        }
    }

    fn script(body: &str) -> ProbeConfig {
        ProbeConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), body.to_string()],
            ..Default::default()
        }
    }

    fn short_bounds() -> ShutdownConfig {
        ShutdownConfig {
            term_timeout_ms: 500,
            kill_timeout_ms: 2000,
        }
    }

    #[tokio::test]
    async fn test_run_collects_samples_until_eof() {
        let probe = script(
            "echo 'PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.'; \
             echo '64 bytes from 1.1.1.1: icmp_seq=1 ttl=59 time=12.3 ms'; \
             echo 'Request timeout for icmp_seq 2'; \
             echo '64 bytes from 1.1.1.1: icmp_seq=3 ttl=59 time=8ms'",
        );
        let session = ProbeSession::open(SessionId(1), &probe, short_bounds()).unwrap();

        let mut samples = Vec::new();
        let report = session.run(|s| samples.push(s)).await;

        assert_eq!(
            samples,
            vec![
                Sample::Unresolved,
                Sample::Latency(12.3),
                Sample::Unresolved,
                Sample::Latency(8.0),
            ]
        );
        assert_eq!(report.id, SessionId(1));
        assert_eq!(report.end, SessionEnd::Exhausted);
        match report.shutdown {
            ShutdownOutcome::Exited(Some(status)) => assert!(status.success()),
            other => panic!("unexpected shutdown outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stderr_is_discarded() {
        let probe = script("echo 'time=5 ms' >&2; echo 'time=6 ms'");
        let session = ProbeSession::open(SessionId(1), &probe, short_bounds()).unwrap();
        let mut samples = Vec::new();
        session.run(|s| samples.push(s)).await;
        assert_eq!(samples, vec![Sample::Latency(6.0)]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_end_stream() {
        let probe = script("printf 'time=3 ms \\377\\n'; echo 'time=4 ms'");
        let session = ProbeSession::open(SessionId(1), &probe, short_bounds()).unwrap();
        let mut samples = Vec::new();
        let report = session.run(|s| samples.push(s)).await;
        assert_eq!(samples, vec![Sample::Latency(3.0), Sample::Latency(4.0)]);
        assert_eq!(report.end, SessionEnd::Exhausted);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_read() {
        let probe = script("echo 'time=1.0 ms'; exec sleep 30");
        let mut session = ProbeSession::open(SessionId(7), &probe, short_bounds()).unwrap();
        assert_eq!(session.next().await.unwrap(), Some(Sample::Latency(1.0)));

        let token = session.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let started = Instant::now();
        assert_eq!(session.next().await.unwrap(), None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancelled_run_terminates_probe_gracefully() {
        let probe = script("echo 'time=1.0 ms'; exec sleep 30");
        let session = ProbeSession::open(SessionId(2), &probe, short_bounds()).unwrap();
        let token = session.cancel_token();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = tokio::spawn(session.run(move |s| {
            let _ = tx.send(s);
        }));

        assert_eq!(rx.recv().await, Some(Sample::Latency(1.0)));
        token.cancel();

        let report = handle.await.unwrap();
        assert_eq!(report.end, SessionEnd::Cancelled);
        assert!(matches!(
            report.shutdown,
            ShutdownOutcome::Terminated { forced: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_before_first_read_yields_nothing() {
        let probe = script("echo 'time=1.0 ms'; exec sleep 30");
        let session = ProbeSession::open(SessionId(3), &probe, short_bounds()).unwrap();
        session.cancel();

        let mut samples = Vec::new();
        let report = session.run(|s| samples.push(s)).await;
        assert!(samples.is_empty());
        assert_eq!(report.end, SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_probe_that_closes_stdout_but_lingers_is_terminated() {
        let probe = script("echo 'time=2 ms'; exec >&-; exec sleep 30");
        let session = ProbeSession::open(SessionId(4), &probe, short_bounds()).unwrap();
        let mut samples = Vec::new();
        let report = session.run(|s| samples.push(s)).await;
        assert_eq!(samples, vec![Sample::Latency(2.0)]);
        assert_eq!(report.end, SessionEnd::Exhausted);
        assert!(matches!(
            report.shutdown,
            ShutdownOutcome::Terminated { forced: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_read_error_ends_session_and_terminates_process() {
        let child = Command::new("sh")
            .args(["-c", "exec sleep 30"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let output = BufReader::new(FailingOutput {
            data: b"time=1 ms\n",
        });
        let session = ProbeSession::with_reader(SessionId(5), child, output, short_bounds());

        let mut samples = Vec::new();
        let started = Instant::now();
        let report = session.run(|s| samples.push(s)).await;

        assert_eq!(samples, vec![Sample::Latency(1.0)]);
        assert_eq!(report.end, SessionEnd::ReadError);
        assert!(matches!(
            report.shutdown,
            ShutdownOutcome::Terminated { forced: false, .. }
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let probe = ProbeConfig {
            command: "nonexistent-probe-xyz".to_string(),
            args: vec![],
            ..Default::default()
        };
        let err = ProbeSession::open(SessionId(1), &probe, short_bounds())
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn probe"));
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId(12).to_string(), "#12");
    }
}
