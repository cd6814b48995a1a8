//! Engine configuration, resolved once at startup and injected into the
//! service. No call site reads the environment on its own.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Runtime environment. Encryption is mandatory in [`Environment::Production`];
/// elsewhere a missing key degrades exports to plaintext with an audited
/// warning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Development,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Root directory of the artifact store
    pub backup_root: PathBuf,
    #[serde(default = "default_environment")]
    pub environment: Environment,
    /// Connection string handed to the external dump/restore utilities
    pub database_url: String,
    #[serde(default = "default_dump_bin")]
    pub dump_bin: PathBuf,
    #[serde(default = "default_restore_bin")]
    pub restore_bin: PathBuf,
    /// Cap on dump output size in bytes
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: u64,
    #[serde(default = "default_restore_timeout")]
    pub restore_timeout_secs: u64,
    /// Retention window applied when a tenant carries no override
    #[serde(default = "default_retention_days")]
    pub default_retention_days: i64,
    /// Storage engine identifier length limit (Postgres: 63 bytes)
    #[serde(default = "default_max_identifier_len")]
    pub max_identifier_len: usize,
    /// Hex-encoded 256-bit artifact encryption key
    #[serde(default)]
    pub encryption_key_hex: Option<String>,
    /// Hex-encoded raw P-256 signing key scalar
    #[serde(default)]
    pub signing_key_hex: Option<String>,
}

fn default_environment() -> Environment {
    Environment::Development
}

fn default_dump_bin() -> PathBuf {
    PathBuf::from("pg_dump")
}

fn default_restore_bin() -> PathBuf {
    PathBuf::from("psql")
}

fn default_max_artifact_bytes() -> u64 {
    100 * 1024 * 1024 // 100 MB
}

fn default_export_timeout() -> u64 {
    600
}

fn default_restore_timeout() -> u64 {
    300 // 5 minutes
}

fn default_retention_days() -> i64 {
    30
}

fn default_max_identifier_len() -> usize {
    63
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_root: PathBuf::from("./backups"),
            environment: default_environment(),
            database_url: String::new(),
            dump_bin: default_dump_bin(),
            restore_bin: default_restore_bin(),
            max_artifact_bytes: default_max_artifact_bytes(),
            export_timeout_secs: default_export_timeout(),
            restore_timeout_secs: default_restore_timeout(),
            default_retention_days: default_retention_days(),
            max_identifier_len: default_max_identifier_len(),
            encryption_key_hex: None,
            signing_key_hex: None,
        }
    }
}

impl BackupConfig {
    /// Resolve configuration from the process environment. Missing values
    /// fall back to defaults; unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("CAMPUS_BACKUP_ROOT") {
            config.backup_root = PathBuf::from(root);
        }
        if let Ok(env) = std::env::var("CAMPUS_ENV") {
            config.environment = match env.to_lowercase().as_str() {
                "production" | "prod" => Environment::Production,
                "development" | "dev" | "test" | "staging" => Environment::Development,
                other => {
                    warn!(value = other, "Unknown CAMPUS_ENV, assuming development");
                    Environment::Development
                }
            };
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(bin) = std::env::var("CAMPUS_DUMP_BIN") {
            config.dump_bin = PathBuf::from(bin);
        }
        if let Ok(bin) = std::env::var("CAMPUS_RESTORE_BIN") {
            config.restore_bin = PathBuf::from(bin);
        }
        if let Ok(days) = std::env::var("CAMPUS_BACKUP_RETENTION_DAYS") {
            match days.parse::<i64>() {
                Ok(parsed) if parsed > 0 => config.default_retention_days = parsed,
                _ => warn!(value = %days, "Ignoring invalid CAMPUS_BACKUP_RETENTION_DAYS"),
            }
        }
        config.encryption_key_hex = std::env::var("CAMPUS_BACKUP_KEY").ok();
        config.signing_key_hex = std::env::var("CAMPUS_BACKUP_SIGNING_KEY").ok();

        config
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    pub fn restore_timeout(&self) -> Duration {
        Duration::from_secs(self.restore_timeout_secs)
    }
}
