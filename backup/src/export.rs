//! Export execution: drives the external dump utility against the scoped
//! views and frames the output as a single-transaction script.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::error::{BackupError, BackupResult};
use crate::model::TenantId;

/// Captured output of an external tool invocation that exited successfully.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    /// Diagnostic output; non-fatal when the exit status was zero
    pub stderr: String,
}

/// External dump utility port. The implementation must restrict the dump to
/// exactly the given views, data only.
#[async_trait]
pub trait DumpTool: Send + Sync {
    async fn dump(&self, views: &[String]) -> BackupResult<ToolOutput>;
}

/// `pg_dump`-style invocation: data-only, per-row inserts, one `--table`
/// flag per scoped view, bounded by the export timeout.
pub struct PgDumpTool {
    bin: PathBuf,
    database_url: String,
    timeout: Duration,
}

impl PgDumpTool {
    pub fn new(bin: PathBuf, database_url: String, timeout: Duration) -> Self {
        Self {
            bin,
            database_url,
            timeout,
        }
    }
}

#[async_trait]
impl DumpTool for PgDumpTool {
    async fn dump(&self, views: &[String]) -> BackupResult<ToolOutput> {
        let mut cmd = tokio::process::Command::new(&self.bin);
        cmd.arg("--data-only")
            .arg("--column-inserts")
            .arg("--no-owner")
            .arg("--no-privileges");
        for view in views {
            cmd.arg(format!("--table={view}"));
        }
        cmd.arg(&self.database_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(BackupError::ExternalTool(format!(
                    "failed to launch dump utility: {e}"
                )));
            }
            Err(_) => {
                return Err(BackupError::ExternalTool(format!(
                    "dump utility timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(BackupError::ExternalTool(format!(
                "dump utility exited with {}: {}",
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

/// Runs the dump through the tool port, enforces the output cap and frames
/// the script.
pub struct ExportExecutor {
    tool: std::sync::Arc<dyn DumpTool>,
    max_bytes: u64,
}

impl ExportExecutor {
    pub fn new(tool: std::sync::Arc<dyn DumpTool>, max_bytes: u64) -> Self {
        Self { tool, max_bytes }
    }

    /// Dump the scoped views and return the framed script bytes.
    pub async fn export(
        &self,
        tenant_id: TenantId,
        method: &str,
        views: &[String],
    ) -> BackupResult<Vec<u8>> {
        let output = self.tool.dump(views).await?;

        if !output.stderr.trim().is_empty() {
            warn!(tenant_id, diagnostics = %output.stderr.trim(), "Dump utility diagnostics");
        }
        if output.stdout.len() as u64 > self.max_bytes {
            return Err(BackupError::ExternalTool(format!(
                "dump output of {} bytes exceeds the {} byte cap",
                output.stdout.len(),
                self.max_bytes
            )));
        }

        Ok(frame_script(tenant_id, method, &output.stdout))
    }
}

/// Wrap the raw dump in a descriptive header and explicit transaction
/// framing.
pub fn frame_script(tenant_id: TenantId, method: &str, body: &[u8]) -> Vec<u8> {
    let header = format!(
        "-- campus tenant backup\n-- institution: {}\n-- generated_at: {}\n-- method: {}\nBEGIN;\n",
        tenant_id,
        Utc::now().to_rfc3339(),
        method,
    );
    let mut script = Vec::with_capacity(header.len() + body.len() + 8);
    script.extend_from_slice(header.as_bytes());
    script.extend_from_slice(body);
    if !body.ends_with(b"\n") {
        script.push(b'\n');
    }
    script.extend_from_slice(b"COMMIT;\n");
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FixedDump(ToolOutput);

    #[async_trait]
    impl DumpTool for FixedDump {
        async fn dump(&self, _views: &[String]) -> BackupResult<ToolOutput> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn frames_output_in_one_transaction() {
        let tool = Arc::new(FixedDump(ToolOutput {
            stdout: b"INSERT INTO \"students\" VALUES (1, 7, 'Ada');".to_vec(),
            stderr: String::new(),
        }));
        let executor = ExportExecutor::new(tool, 1024);
        let script = executor
            .export(7, "pg_dump/data-only", &["bk_x_students".to_string()])
            .await
            .unwrap();
        let text = String::from_utf8(script).unwrap();

        assert!(text.starts_with("-- campus tenant backup\n-- institution: 7\n"));
        assert!(text.contains("\nBEGIN;\n"));
        assert!(text.trim_end().ends_with("COMMIT;"));
        let begin = text.find("BEGIN;").unwrap();
        let insert = text.find("INSERT INTO").unwrap();
        let commit = text.find("COMMIT;").unwrap();
        assert!(begin < insert && insert < commit);
    }

    #[tokio::test]
    async fn oversized_dump_is_rejected() {
        let tool = Arc::new(FixedDump(ToolOutput {
            stdout: vec![b'x'; 2048],
            stderr: String::new(),
        }));
        let executor = ExportExecutor::new(tool, 1024);
        let err = executor.export(7, "pg_dump", &[]).await.unwrap_err();
        assert!(matches!(err, BackupError::ExternalTool(_)));
    }

    #[tokio::test]
    async fn diagnostics_do_not_fail_export() {
        let tool = Arc::new(FixedDump(ToolOutput {
            stdout: b"SELECT 1;".to_vec(),
            stderr: "pg_dump: warning: circular foreign-key constraints\n".to_string(),
        }));
        let executor = ExportExecutor::new(tool, 1024);
        assert!(executor.export(7, "pg_dump", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn missing_binary_is_external_tool_error() {
        let tool = PgDumpTool::new(
            PathBuf::from("/nonexistent/campus-dump-tool"),
            "postgres://localhost/campus".to_string(),
            Duration::from_secs(5),
        );
        let err = tool.dump(&[]).await.unwrap_err();
        assert!(matches!(err, BackupError::ExternalTool(_)));
    }
}
