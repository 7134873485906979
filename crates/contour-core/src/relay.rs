//! Compute process invocation.
//!
//! One inbound payload maps to exactly one run of the external compute
//! executable: serialize the payload to its stdin, wait for it to exit,
//! classify the captured output. Invocations are never shared, cached, or
//! retried.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, error, warn};

use crate::error::RelayError;

/// Configuration for the relay, resolved once at startup by the entry point.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Path to the compute executable. Invoked with zero arguments.
    pub executable: PathBuf,
    /// Optional time limit per invocation. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl RelayConfig {
    /// Create a config with no time limit.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: None,
        }
    }

    /// Kill the compute process if it runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Bridges one request body to one run of the compute executable.
pub struct ComputeRelay {
    config: RelayConfig,
}

impl ComputeRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Relay one raw request body through the compute executable.
    ///
    /// Parses the body as JSON, re-serializes it for the child's stdin, and
    /// classifies the child's exit status and captured output. The
    /// re-serialization round-trip is intentional: it validates structure and
    /// guarantees the child sees well-formed JSON bytes regardless of the
    /// transport encoding.
    pub async fn handle(&self, body: &[u8]) -> Result<serde_json::Value, RelayError> {
        let input: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
            debug!(error = %e, "rejecting request body that is not valid JSON");
            RelayError::InvalidInput(e)
        })?;

        let stdin_bytes = serde_json::to_vec(&input).map_err(|e| RelayError::Io(e.into()))?;
        self.invoke(stdin_bytes).await
    }

    /// Run the compute executable once with `input` on its stdin.
    async fn invoke(&self, input: Vec<u8>) -> Result<serde_json::Value, RelayError> {
        let mut child = Command::new(&self.config.executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                error!(
                    executable = %self.config.executable.display(),
                    error = %e,
                    "failed to start compute process"
                );
                RelayError::SpawnFailed {
                    reason: e.to_string(),
                }
            })?;

        let stdin = child.stdin.take().ok_or_else(|| RelayError::SpawnFailed {
            reason: "failed to capture stdin".to_string(),
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::SpawnFailed {
                reason: "failed to capture stdout".to_string(),
            })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RelayError::SpawnFailed {
                reason: "failed to capture stderr".to_string(),
            })?;

        // Write the payload from a separate task so a child that fills its
        // output pipes before draining stdin cannot deadlock the exchange.
        // A child that exits without reading all of stdin closes the pipe;
        // its own exit status then drives classification, not the EPIPE.
        let writer = tokio::spawn(async move {
            let mut stdin = stdin;
            if let Err(e) = stdin.write_all(&input).await {
                debug!(error = %e, "compute process stopped reading stdin early");
                return;
            }
            if let Err(e) = stdin.shutdown().await {
                debug!(error = %e, "failed to close compute process stdin");
            }
        });

        let collected = match self.config.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, collect_output(&mut child, stdout, stderr)).await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(timeout = ?limit, "compute process exceeded time limit, killing");
                        child.kill().await.ok();
                        writer.abort();
                        return Err(RelayError::TimedOut(limit));
                    }
                }
            }
            None => collect_output(&mut child, stdout, stderr).await,
        };

        let (status, stdout_bytes, stderr_bytes) = collected.map_err(|e| {
            error!(error = %e, "I/O fault while exchanging data with compute process");
            RelayError::Io(e)
        })?;

        if !status.success() {
            let diagnostic = String::from_utf8_lossy(&stderr_bytes).into_owned();
            error!(
                code = status.code(),
                stderr = %diagnostic,
                "compute process exited with failure"
            );
            return Err(RelayError::ComputationFailed { stderr: diagnostic });
        }

        match serde_json::from_slice(&stdout_bytes) {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(
                    error = %e,
                    stdout = %String::from_utf8_lossy(&stdout_bytes),
                    "compute process produced output that is not JSON"
                );
                Err(RelayError::InvalidOutput)
            }
        }
    }
}

/// Drain stdout and stderr to EOF, then reap the exit status.
///
/// Both pipes are read concurrently; waiting for the status before both hit
/// EOF could block on a full pipe buffer.
async fn collect_output(
    child: &mut Child,
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let mut stdout_bytes = Vec::new();
    let mut stderr_bytes = Vec::new();
    tokio::try_join!(
        stdout.read_to_end(&mut stdout_bytes),
        stderr.read_to_end(&mut stderr_bytes),
    )?;
    let status = child.wait().await?;
    Ok((status, stdout_bytes, stderr_bytes))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable `sh` script standing in for the compute binary.
    fn stub_script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("stub.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn relay_for(script: PathBuf) -> ComputeRelay {
        ComputeRelay::new(RelayConfig::new(script))
    }

    #[tokio::test]
    async fn echo_round_trips_payload() {
        let dir = TempDir::new().unwrap();
        let relay = relay_for(stub_script(&dir, "cat"));
        let input = json!({"points": [[0.0, 1.0], [2.5, 3.5]], "depth": 0.5});

        let result = relay
            .handle(&serde_json::to_vec(&input).unwrap())
            .await
            .unwrap();

        assert_eq!(result, input);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_before_spawning() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("invoked");
        let relay = relay_for(stub_script(
            &dir,
            &format!("touch {}\ncat", marker.display()),
        ));

        let err = relay.handle(b"{not json").await.unwrap_err();

        assert!(matches!(err, RelayError::InvalidInput(_)));
        assert!(!marker.exists(), "no process may be spawned for bad input");
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let dir = TempDir::new().unwrap();
        let relay = relay_for(stub_script(&dir, "cat"));

        let err = relay.handle(b"").await.unwrap_err();

        assert!(matches!(err, RelayError::InvalidInput(_)));
        assert_eq!(err.to_string(), "Invalid JSON input");
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr() {
        let dir = TempDir::new().unwrap();
        let relay = relay_for(stub_script(&dir, "echo boom >&2\nexit 1"));

        let err = relay.handle(b"{}").await.unwrap_err();

        match err {
            RelayError::ComputationFailed { stderr } => {
                assert!(stderr.contains("boom"), "stderr: {stderr}");
            }
            other => panic!("expected ComputationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_stdout_is_invalid_output() {
        let dir = TempDir::new().unwrap();
        let relay = relay_for(stub_script(&dir, "echo not json"));

        let err = relay.handle(b"{}").await.unwrap_err();

        assert!(matches!(err, RelayError::InvalidOutput));
        // Distinct from the subprocess-failure message.
        assert_eq!(err.to_string(), "Computation returned invalid JSON");
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_failure() {
        let relay = relay_for(PathBuf::from("/nonexistent/compute"));

        let err = relay.handle(b"{}").await.unwrap_err();

        assert!(matches!(err, RelayError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_hung_process() {
        let dir = TempDir::new().unwrap();
        let script = stub_script(&dir, "sleep 30");
        let relay = ComputeRelay::new(
            RelayConfig::new(script).with_timeout(Duration::from_millis(100)),
        );

        let err = relay.handle(b"{}").await.unwrap_err();

        assert!(matches!(err, RelayError::TimedOut(_)));
    }

    #[tokio::test]
    async fn large_payload_does_not_deadlock() {
        let dir = TempDir::new().unwrap();
        let relay = relay_for(stub_script(&dir, "cat"));
        // Well past the usual 64 KiB pipe buffer in both directions.
        let input = json!({"points": vec![[0.125_f64, 4.75]; 50_000]});

        let result = relay
            .handle(&serde_json::to_vec(&input).unwrap())
            .await
            .unwrap();

        assert_eq!(result, input);
    }

    #[tokio::test]
    async fn stderr_diagnostics_do_not_corrupt_result() {
        let dir = TempDir::new().unwrap();
        let relay = relay_for(stub_script(&dir, "echo progress 50% >&2\ncat"));
        let input = json!({"depth": 0.25});

        let result = relay
            .handle(&serde_json::to_vec(&input).unwrap())
            .await
            .unwrap();

        assert_eq!(result, input);
    }

    #[tokio::test]
    async fn child_ignoring_stdin_is_still_classified_by_exit() {
        let dir = TempDir::new().unwrap();
        // Exits without reading stdin; the EPIPE on our side must not mask
        // the child's failure status.
        let relay = relay_for(stub_script(&dir, "echo refused >&2\nexit 3"));
        let input = json!({"points": vec![[1.0_f64, 2.0]; 50_000]});

        let err = relay
            .handle(&serde_json::to_vec(&input).unwrap())
            .await
            .unwrap_err();

        match err {
            RelayError::ComputationFailed { stderr } => {
                assert!(stderr.contains("refused"));
            }
            other => panic!("expected ComputationFailed, got {other:?}"),
        }
    }
}
