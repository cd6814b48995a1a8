//! Artifact storage layout.
//!
//! Canonical layout: `<root>/institutions/<tenant_id>/backup_<tenant_id>_
//! <kind>_<yyyymmdd>_<hhmmss>.<ext>`. A legacy flat layout directly under
//! the root stays readable. Reads under a tenant context refuse anything
//! outside that tenant's namespace.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{BackupError, BackupResult};
use crate::model::{BackupKind, TenantId};

/// Subdirectory holding the per-tenant namespaces.
const TENANT_DIR: &str = "institutions";

/// Extension of sealed artifacts.
pub const SEALED_EXT: &str = "sql.enc";
/// Extension of plaintext (degraded-mode) artifacts.
pub const PLAIN_EXT: &str = "sql";

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant_id: TenantId) -> PathBuf {
        self.root.join(TENANT_DIR).join(tenant_id.to_string())
    }

    /// Canonical artifact path for a new export.
    pub fn artifact_path(
        &self,
        tenant_id: TenantId,
        kind: BackupKind,
        at: DateTime<Utc>,
        sealed: bool,
    ) -> PathBuf {
        let ext = if sealed { SEALED_EXT } else { PLAIN_EXT };
        let filename = format!(
            "backup_{}_{}_{}.{}",
            tenant_id,
            kind.as_str(),
            at.format("%Y%m%d_%H%M%S"),
            ext,
        );
        self.tenant_dir(tenant_id).join(filename)
    }

    /// Persist artifact bytes, creating the tenant namespace on demand.
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> BackupResult<u64> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(bytes.len() as u64)
    }

    /// Read an artifact on behalf of a tenant. The path must live inside
    /// that tenant's namespace or, for backward compatibility, directly
    /// under the backup root (legacy flat layout).
    pub async fn read_for_tenant(&self, path: &Path, tenant_id: TenantId) -> BackupResult<Vec<u8>> {
        self.check_tenant_containment(path, tenant_id).await?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Remove an artifact, tolerating one that is already gone.
    pub async fn remove(&self, path: &Path) -> BackupResult<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn check_tenant_containment(&self, path: &Path, tenant_id: TenantId) -> BackupResult<()> {
        let root = tokio::fs::canonicalize(&self.root).await.map_err(|e| {
            BackupError::Dependency(format!(
                "backup root {} is not accessible: {e}",
                self.root.display()
            ))
        })?;
        let canonical = match tokio::fs::canonicalize(path).await {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(format!(
                    "backup artifact {} does not exist",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let tenant_ns = root.join(TENANT_DIR).join(tenant_id.to_string());
        if canonical.starts_with(&tenant_ns) {
            return Ok(());
        }
        // Legacy flat layout: directly under the root, not inside any
        // tenant namespace.
        if canonical.parent() == Some(root.as_path()) {
            debug!(path = %canonical.display(), "Reading legacy flat-layout artifact");
            return Ok(());
        }
        Err(BackupError::AccessDenied(format!(
            "artifact {} is outside the namespace of institution {}",
            path.display(),
            tenant_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn canonical_path_shape() {
        let store = ArtifactStore::new("/var/backups");
        let at = Utc.with_ymd_and_hms(2026, 8, 8, 13, 45, 9).unwrap();
        let path = store.artifact_path(12, BackupKind::Full, at, true);
        assert_eq!(
            path,
            PathBuf::from("/var/backups/institutions/12/backup_12_full_20260808_134509.sql.enc")
        );

        let plain = store.artifact_path(12, BackupKind::DataOnly, at, false);
        assert!(plain.to_string_lossy().ends_with("backup_12_data_20260808_134509.sql"));
    }

    #[tokio::test]
    async fn write_read_roundtrip_in_tenant_namespace() {
        let (_dir, store) = store();
        let path = store.artifact_path(3, BackupKind::Full, Utc::now(), true);
        store.write(&path, b"ciphertext").await.unwrap();
        assert_eq!(store.read_for_tenant(&path, 3).await.unwrap(), b"ciphertext");
    }

    #[tokio::test]
    async fn cross_tenant_read_is_denied() {
        let (_dir, store) = store();
        let path = store.artifact_path(3, BackupKind::Full, Utc::now(), true);
        store.write(&path, b"ciphertext").await.unwrap();

        let err = store.read_for_tenant(&path, 4).await.unwrap_err();
        assert!(matches!(err, BackupError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn legacy_flat_artifact_stays_readable() {
        let (_dir, store) = store();
        let legacy = store.root().join("backup_3_full_20200101_000000.sql");
        store.write(&legacy, b"old artifact").await.unwrap();
        assert_eq!(
            store.read_for_tenant(&legacy, 3).await.unwrap(),
            b"old artifact"
        );
    }

    #[tokio::test]
    async fn escape_from_root_is_denied() {
        let (_dir, store) = store();
        let outside = tempfile::tempdir().unwrap();
        let path = outside.path().join("backup_3_full_20200101_000000.sql");
        tokio::fs::write(&path, b"outside").await.unwrap();

        let err = store.read_for_tenant(&path, 3).await.unwrap_err();
        assert!(matches!(err, BackupError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let (_dir, store) = store();
        let path = store.artifact_path(3, BackupKind::Full, Utc::now(), true);
        let err = store.read_for_tenant(&path, 3).await.unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_tolerates_missing_artifact() {
        let (_dir, store) = store();
        let path = store.root().join("gone.sql");
        assert!(!store.remove(&path).await.unwrap());

        store.write(&path, b"bytes").await.unwrap();
        assert!(store.remove(&path).await.unwrap());
    }
}
