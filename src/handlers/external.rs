//! Bounded invocation of external conversion tools

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::traits::ConversionError;

/// Longest stderr excerpt carried in an error
const STDERR_EXCERPT: usize = 512;

/// Runs one external program per call, killed if it outlives `timeout` or
/// the caller cancels
#[derive(Debug, Clone)]
pub struct ToolRunner {
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `program` with `args`; any non-zero exit, spawn failure or timeout
    /// becomes [`ConversionError::ExternalToolFailed`].
    pub async fn run<I, S>(
        &self,
        program: &str,
        args: I,
        cancel: &CancellationToken,
    ) -> Result<(), ConversionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program, timeout_secs = self.timeout.as_secs(), "Running external tool");

        let child = command.spawn().map_err(|e| ConversionError::ExternalToolFailed {
            tool: program.to_string(),
            reason: format!("failed to start: {e}"),
        })?;

        // Dropping the wait future drops the child, which kills it
        let waited = tokio::select! {
            waited = tokio::time::timeout(self.timeout, child.wait_with_output()) => waited,
            _ = cancel.cancelled() => {
                debug!(program, "External tool cancelled");
                return Err(ConversionError::Cancelled);
            }
        };

        let output = match waited {
            Ok(result) => result.map_err(|e| ConversionError::ExternalToolFailed {
                tool: program.to_string(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                warn!(program, timeout_secs = self.timeout.as_secs(), "External tool timed out");
                return Err(ConversionError::ExternalToolFailed {
                    tool: program.to_string(),
                    reason: format!("timed out after {}s", self.timeout.as_secs()),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            return Err(ConversionError::ExternalToolFailed {
                tool: program.to_string(),
                reason: format!("{}: {}", output.status, excerpt),
            });
        }

        Ok(())
    }
}
