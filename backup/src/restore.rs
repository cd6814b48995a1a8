//! Restore execution.
//!
//! The validated script is materialized to a transient file and handed to
//! the external restore utility in whole-script, single-transaction,
//! abort-on-first-error mode. The transient file is removed on every exit
//! path. Row counts are derived from the script's insert statements for
//! reporting only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::error::{BackupError, BackupResult};
use crate::export::ToolOutput;

/// External restore utility port.
#[async_trait]
pub trait RestoreTool: Send + Sync {
    async fn restore(&self, script_path: &Path) -> BackupResult<ToolOutput>;
}

/// `psql`-style invocation: single transaction, stop on first error,
/// bounded by the restore timeout.
pub struct PsqlRestoreTool {
    bin: PathBuf,
    database_url: String,
    timeout: Duration,
}

impl PsqlRestoreTool {
    pub fn new(bin: PathBuf, database_url: String, timeout: Duration) -> Self {
        Self {
            bin,
            database_url,
            timeout,
        }
    }
}

#[async_trait]
impl RestoreTool for PsqlRestoreTool {
    async fn restore(&self, script_path: &Path) -> BackupResult<ToolOutput> {
        let mut cmd = tokio::process::Command::new(&self.bin);
        cmd.arg("--single-transaction")
            .arg("--set")
            .arg("ON_ERROR_STOP=1")
            .arg("--file")
            .arg(script_path)
            .arg(&self.database_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(BackupError::ExternalTool(format!(
                    "failed to launch restore utility: {e}"
                )));
            }
            Err(_) => {
                return Err(BackupError::ExternalTool(format!(
                    "restore utility timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(BackupError::ExternalTool(format!(
                "restore utility exited with {}: {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr.trim()
            )));
        }

        Ok(ToolOutput {
            stdout: output.stdout,
            stderr,
        })
    }
}

static INSERT_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*INSERT\s+INTO\s+"?([A-Za-z0-9_]+)"?"#).expect("insert pattern is valid")
});

/// Approximate per-relation row counts from a restore script.
pub fn restored_counts(script: &str) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for line in script.lines() {
        if let Some(capture) = INSERT_TARGET.captures(line) {
            *counts.entry(capture[1].to_lowercase()).or_insert(0) += 1;
        }
    }
    counts
}

/// Run the restore tool against a transient copy of the script. The
/// transient file lives in the system temp directory and is deleted when
/// the guard drops, regardless of outcome.
pub async fn run_with_transient_script(
    tool: &dyn RestoreTool,
    script: &[u8],
) -> BackupResult<ToolOutput> {
    let transient = tempfile::NamedTempFile::new()
        .map_err(|e| BackupError::Dependency(format!("cannot create transient script: {e}")))?;
    tokio::fs::write(transient.path(), script).await?;

    let result = tool.restore(transient.path()).await;

    if let Err(e) = transient.close() {
        warn!(error = %e, "Failed to remove transient restore script");
    }
    result
}
