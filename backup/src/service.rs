//! Service facade over the backup engine.
//!
//! All collaborators are constructor-injected: the record store, the raw
//! SQL executor, the external dump/restore tools, the audit sink and the
//! tenant settings source. Nothing here reaches for process-wide state.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::json;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use campus_sealing::{
    ArtifactSigner, CIPHER_ALGORITHM, SIGNATURE_ALGORITHM, cipher::KEY_LEN, file_sha256_hex, open,
    seal, sealed_from_parts, sha256_hex,
};

use crate::audit::{AuditEvent, AuditSink};
use crate::config::{BackupConfig, Environment};
use crate::error::{BackupError, BackupResult};
use crate::export::{DumpTool, ExportExecutor};
use crate::model::{
    BackupKind, BackupOrigin, BackupReceipt, BackupRecord, RestoreReport, RestoreRequest,
    RetentionStatus, TenantId,
};
use crate::restore::{RestoreTool, restored_counts, run_with_transient_script};
use crate::retention::{TenantSettings, expiry_for};
use crate::schedule::next_run_after;
use crate::scoping::{SqlExecutor, create_tenant_views};
use crate::storage::ArtifactStore;
use crate::store::RecordStore;
use crate::validate;

/// Collaborator handles injected into the service.
pub struct Collaborators {
    pub store: Arc<dyn RecordStore>,
    pub sql: Arc<dyn SqlExecutor>,
    pub dump: Arc<dyn DumpTool>,
    pub restore: Arc<dyn RestoreTool>,
    pub audit: Arc<dyn AuditSink>,
    pub settings: Arc<dyn TenantSettings>,
}

pub struct BackupService {
    config: BackupConfig,
    store: Arc<dyn RecordStore>,
    sql: Arc<dyn SqlExecutor>,
    restore_tool: Arc<dyn RestoreTool>,
    audit_sink: Arc<dyn AuditSink>,
    settings: Arc<dyn TenantSettings>,
    artifacts: ArtifactStore,
    exporter: ExportExecutor,
    cipher_key: Option<Zeroizing<Vec<u8>>>,
    signer: Option<ArtifactSigner>,
    /// At most one export in flight per tenant: concurrent view creation
    /// under identical names is unsafe.
    in_flight: DashMap<TenantId, ()>,
}

/// Removes the per-tenant in-flight marker on every exit path.
struct FlightGuard<'a> {
    map: &'a DashMap<TenantId, ()>,
    tenant_id: TenantId,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.tenant_id);
    }
}

impl BackupService {
    /// Build the service, resolving cryptographic material once. In
    /// production a missing encryption key is a hard startup failure.
    pub fn new(config: BackupConfig, collaborators: Collaborators) -> BackupResult<Self> {
        let cipher_key = match &config.encryption_key_hex {
            Some(encoded) => {
                let bytes = Zeroizing::new(hex::decode(encoded).map_err(|e| {
                    BackupError::Dependency(format!("invalid encryption key encoding: {e}"))
                })?);
                if bytes.len() != KEY_LEN {
                    return Err(BackupError::Dependency(format!(
                        "encryption key must be {} bytes, got {}",
                        KEY_LEN,
                        bytes.len()
                    )));
                }
                Some(bytes)
            }
            None => None,
        };
        if config.environment == Environment::Production && cipher_key.is_none() {
            return Err(BackupError::Dependency(
                "artifact encryption is mandatory in production".to_string(),
            ));
        }

        let signer = match &config.signing_key_hex {
            Some(encoded) => {
                let bytes = Zeroizing::new(hex::decode(encoded).map_err(|e| {
                    BackupError::Dependency(format!("invalid signing key encoding: {e}"))
                })?);
                Some(ArtifactSigner::from_raw(&bytes)?)
            }
            None => None,
        };

        let artifacts = ArtifactStore::new(config.backup_root.clone());
        let exporter = ExportExecutor::new(collaborators.dump, config.max_artifact_bytes);

        Ok(Self {
            config,
            store: collaborators.store,
            sql: collaborators.sql,
            restore_tool: collaborators.restore,
            audit_sink: collaborators.audit,
            settings: collaborators.settings,
            artifacts,
            exporter,
            cipher_key,
            signer,
            in_flight: DashMap::new(),
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    async fn audit(&self, event: AuditEvent) {
        self.audit_sink.record(event).await;
    }

    fn acquire_flight(&self, tenant_id: TenantId) -> BackupResult<FlightGuard<'_>> {
        match self.in_flight.entry(tenant_id) {
            Entry::Occupied(_) => Err(BackupError::Validation(format!(
                "an export is already running for institution {tenant_id}"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(FlightGuard {
                    map: &self.in_flight,
                    tenant_id,
                })
            }
        }
    }

    /// Export one tenant's data into a sealed artifact and a completed
    /// backup record.
    pub async fn generate_backup(
        &self,
        tenant_id: TenantId,
        kind: BackupKind,
        origin: BackupOrigin,
        actor: Option<&str>,
    ) -> BackupResult<BackupReceipt> {
        let _flight = self.acquire_flight(tenant_id)?;

        let mut record = BackupRecord::new(tenant_id, kind, origin);
        self.store.insert_record(record.clone()).await?;
        self.audit(
            AuditEvent::new("backup.started", "backup_record")
                .tenant(tenant_id)
                .entity_id(record.id)
                .after(json!({ "kind": kind, "origin": origin, "actor": actor })),
        )
        .await;

        record.mark_in_progress()?;
        self.store.update_record(record.clone()).await?;

        match self.run_export(&mut record).await {
            Ok(receipt) => {
                self.store.update_record(record.clone()).await?;
                self.audit(
                    AuditEvent::new("backup.completed", "backup_record")
                        .tenant(tenant_id)
                        .entity_id(record.id)
                        .after(json!({
                            "path": receipt.path,
                            "size_bytes": receipt.size_bytes,
                            "sha256": record.sha256,
                            "encrypted": record.encrypted,
                        })),
                )
                .await;
                info!(tenant_id, backup_id = %record.id, size_bytes = receipt.size_bytes, "Backup completed");
                Ok(receipt)
            }
            Err(e) => {
                record.mark_error(e.to_string());
                if let Err(update_err) = self.store.update_record(record.clone()).await {
                    warn!(backup_id = %record.id, error = %update_err, "Failed to persist backup failure");
                }
                self.audit(
                    AuditEvent::new("backup.failed", "backup_record")
                        .tenant(tenant_id)
                        .entity_id(record.id)
                        .after(json!({ "error_kind": e.kind() }))
                        .note(e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Scoping, dump, sealing pipeline. View teardown runs on every exit
    /// path of the dump.
    async fn run_export(&self, record: &mut BackupRecord) -> BackupResult<BackupReceipt> {
        let correlation = record.id.to_string();
        let mut views = create_tenant_views(
            self.sql.clone(),
            record.tenant_id,
            &correlation,
            self.config.max_identifier_len,
        )
        .await?;

        let dump_result = self
            .exporter
            .export(record.tenant_id, "pg_dump/data-only", views.names())
            .await;
        views.teardown().await;
        let framed = dump_result?;

        let sealed_mode = self.cipher_key.is_some();
        let path =
            self.artifacts
                .artifact_path(record.tenant_id, record.kind, Utc::now(), sealed_mode);

        let size = match &self.cipher_key {
            Some(key) => {
                let sealed = seal(key, &framed)?;
                let size = self.artifacts.write(&path, &sealed.ciphertext).await?;
                record.encrypted = true;
                record.cipher_algorithm = Some(CIPHER_ALGORITHM.to_string());
                record.iv = Some(hex::encode(sealed.nonce));
                record.auth_tag = Some(hex::encode(sealed.tag));
                self.audit(
                    AuditEvent::new("backup.sealed", "backup_record")
                        .tenant(record.tenant_id)
                        .entity_id(record.id)
                        .after(json!({ "cipher_algorithm": CIPHER_ALGORITHM })),
                )
                .await;
                size
            }
            None => {
                warn!(
                    tenant_id = record.tenant_id,
                    "No encryption key configured, writing plaintext artifact"
                );
                self.audit(
                    AuditEvent::new("backup.unencrypted", "backup_record")
                        .tenant(record.tenant_id)
                        .entity_id(record.id)
                        .note("degraded mode: artifact stored without encryption"),
                )
                .await;
                self.artifacts.write(&path, &framed).await?
            }
        };

        // Integrity anchor from the bytes actually on disk.
        let digest = file_sha256_hex(&path).await?;
        record.sha256 = Some(digest.clone());
        record.hash_verified = true;
        self.audit(
            AuditEvent::new("backup.hashed", "backup_record")
                .tenant(record.tenant_id)
                .entity_id(record.id)
                .after(json!({ "sha256": digest })),
        )
        .await;

        match &self.signer {
            Some(signer) => {
                record.signature = Some(signer.sign_digest(&digest));
                record.signature_algorithm = Some(SIGNATURE_ALGORITHM.to_string());
                self.audit(
                    AuditEvent::new("backup.signed", "backup_record")
                        .tenant(record.tenant_id)
                        .entity_id(record.id)
                        .after(json!({ "signature_algorithm": SIGNATURE_ALGORITHM })),
                )
                .await;
            }
            None => {
                self.audit(
                    AuditEvent::new("backup.unsigned", "backup_record")
                        .tenant(record.tenant_id)
                        .entity_id(record.id)
                        .note("no signing key configured; artifact completed unsigned"),
                )
                .await;
            }
        }

        record.size_bytes = size;
        record.storage_path = Some(path.to_string_lossy().to_string());
        record.mark_completed()?;

        Ok(BackupReceipt {
            id: record.id,
            path: record.storage_path.clone().unwrap_or_default(),
            size_bytes: size,
        })
    }

    /// Load and verify a backup artifact on behalf of a tenant, returning
    /// the decrypted plaintext.
    pub async fn load_backup(&self, path: &Path, tenant_id: TenantId) -> BackupResult<Vec<u8>> {
        let record = self
            .store
            .record_by_path(&path.to_string_lossy())
            .await?
            .ok_or_else(|| {
                BackupError::NotFound(format!("no backup record for {}", path.display()))
            })?;

        if let Err(e) = validate::ensure_ownership(&record, tenant_id) {
            self.audit(
                AuditEvent::new("backup.access_denied", "backup_record")
                    .tenant(tenant_id)
                    .entity_id(record.id)
                    .note(e.to_string()),
            )
            .await;
            return Err(e);
        }

        validate::ensure_completed(&record)?;
        validate::ensure_digest(&record)?;

        let bytes = self.artifacts.read_for_tenant(path, tenant_id).await?;
        let plaintext = self.verify_and_open(&record, bytes).await?;

        self.audit(
            AuditEvent::new("backup.loaded", "backup_record")
                .tenant(tenant_id)
                .entity_id(record.id),
        )
        .await;
        Ok(plaintext)
    }

    /// Digest, signature and decryption checks shared by load and restore.
    async fn verify_and_open(
        &self,
        record: &BackupRecord,
        bytes: Vec<u8>,
    ) -> BackupResult<Vec<u8>> {
        validate::ensure_completed(record)?;
        let digest = validate::ensure_digest(record)?;

        if record
            .storage_path
            .as_deref()
            .is_some_and(|p| p.ends_with(".json"))
        {
            return Err(BackupError::Validation(format!(
                "backup {} uses the legacy JSON format, which is export-only",
                record.id
            )));
        }

        let actual = sha256_hex(&bytes);
        if actual != digest {
            return Err(BackupError::Integrity(format!(
                "artifact digest mismatch for backup {}: stored {digest}, computed {actual}",
                record.id
            )));
        }

        match (&record.signature, &self.signer) {
            (Some(signature), Some(signer)) => {
                signer.verifier().verify_digest(&digest, signature)?;
            }
            (Some(_), None) => {
                warn!(backup_id = %record.id, "Signature present but no verification key configured");
            }
            (None, _) => {
                warn!(backup_id = %record.id, "Backup artifact carries no signature");
            }
        }

        if record.encrypted {
            let key = self.cipher_key.as_ref().ok_or_else(|| {
                BackupError::Dependency(format!(
                    "backup {} is sealed but no encryption key is configured",
                    record.id
                ))
            })?;
            let iv = record.iv.as_deref().ok_or_else(|| {
                BackupError::Integrity(format!("sealed backup {} is missing its nonce", record.id))
            })?;
            let tag = record.auth_tag.as_deref().ok_or_else(|| {
                BackupError::Integrity(format!(
                    "sealed backup {} is missing its authentication tag",
                    record.id
                ))
            })?;
            let sealed = sealed_from_parts(bytes, iv, tag)?;
            Ok(open(key, &sealed)?)
        } else {
            Ok(bytes)
        }
    }

    /// Validate and execute a restore. Every rejection is audited; a
    /// destructive restore never runs without a fresh pre-restore
    /// snapshot.
    pub async fn restore_backup(&self, request: RestoreRequest) -> BackupResult<RestoreReport> {
        let tenant_id = request.tenant_id;
        let result = self.restore_inner(&request).await;
        if let Err(e) = &result {
            self.audit(
                AuditEvent::new("restore.rejected", "restore")
                    .tenant(tenant_id)
                    .after(json!({
                        "error_kind": e.kind(),
                        "backup_id": request.backup_id,
                        "actor": request.actor,
                    }))
                    .note(e.to_string()),
            )
            .await;
        }
        result
    }

    async fn restore_inner(&self, request: &RestoreRequest) -> BackupResult<RestoreReport> {
        let tenant_id = request.tenant_id;

        validate::ensure_confirmed(request)?;

        let record = match request.backup_id {
            Some(id) => self.store.record(id).await?.ok_or_else(|| {
                BackupError::NotFound(format!("backup record {id} does not exist"))
            })?,
            None => self
                .store
                .records_for_tenant(tenant_id)
                .await?
                .into_iter()
                .find(|r| r.is_restorable() && r.retention_status == RetentionStatus::Active)
                .ok_or_else(|| {
                    BackupError::NotFound(format!(
                        "institution {tenant_id} has no completed backup to restore"
                    ))
                })?,
        };

        // Ownership comes before any other record property and is always a
        // hard denial.
        validate::ensure_ownership(&record, tenant_id)?;

        validate::ensure_completed(&record)?;
        validate::ensure_digest(&record)?;

        let storage_path = record.storage_path.clone().ok_or_else(|| {
            BackupError::Validation(format!("backup {} has no stored artifact", record.id))
        })?;
        let bytes = self
            .artifacts
            .read_for_tenant(Path::new(&storage_path), tenant_id)
            .await?;
        let plaintext = self.verify_and_open(&record, bytes).await?;

        let script = String::from_utf8(plaintext).map_err(|_| {
            BackupError::Validation(format!(
                "restore script of backup {} is not valid UTF-8",
                record.id
            ))
        })?;
        validate::check_script_safety(&script)?;
        validate::check_tenant_literals(&script, tenant_id)?;

        // Persist the verification outcome on the record, best effort.
        let mut verified = record.clone();
        verified.hash_verified = true;
        verified.signature_verified = verified.signature.is_some() && self.signer.is_some();
        if let Err(e) = self.store.update_record(verified).await {
            warn!(backup_id = %record.id, error = %e, "Failed to persist verification flags");
        }

        // Pre-restore snapshot guard: no destructive restore without a
        // fresh rollback point.
        let snapshot = match self
            .generate_backup(
                tenant_id,
                BackupKind::Full,
                BackupOrigin::PreRestore,
                request.actor.as_deref(),
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.audit(
                    AuditEvent::new("restore.snapshot_failed", "restore")
                        .tenant(tenant_id)
                        .entity_id(record.id)
                        .note(e.to_string()),
                )
                .await;
                return Err(BackupError::Dependency(format!(
                    "pre-restore snapshot failed, restore aborted: {e}"
                )));
            }
        };

        if let Err(e) = run_with_transient_script(self.restore_tool.as_ref(), script.as_bytes()).await
        {
            self.audit(
                AuditEvent::new("restore.failed", "restore")
                    .tenant(tenant_id)
                    .entity_id(record.id)
                    .after(json!({ "pre_restore_backup_id": snapshot.id }))
                    .note(e.to_string()),
            )
            .await;
            return Err(e);
        }

        let counts = restored_counts(&script);
        self.audit(
            AuditEvent::new("restore.completed", "restore")
                .tenant(tenant_id)
                .entity_id(record.id)
                .after(json!({
                    "pre_restore_backup_id": snapshot.id,
                    "restored_counts": counts,
                    "mode": request.mode,
                    "actor": request.actor,
                })),
        )
        .await;
        info!(tenant_id, backup_id = %record.id, "Restore completed");

        Ok(RestoreReport {
            success: true,
            backup_id: record.id,
            pre_restore_backup_id: snapshot.id,
            restored_counts: counts,
        })
    }

    /// Drive every due schedule. One tenant's failure never blocks the
    /// others.
    pub async fn run_scheduled_backups(&self) -> BackupResult<()> {
        let now = Utc::now();
        let schedules = self.store.schedules().await?;

        for mut schedule in schedules {
            if !schedule.is_due(now) {
                continue;
            }
            let tenant_id = schedule.tenant_id;
            match self
                .generate_backup(tenant_id, BackupKind::Full, BackupOrigin::Scheduled, None)
                .await
            {
                Ok(receipt) => {
                    info!(tenant_id, backup_id = %receipt.id, "Scheduled backup completed");
                }
                Err(e) => {
                    warn!(tenant_id, error = %e, "Scheduled backup failed");
                    self.audit(
                        AuditEvent::new("schedule.failed", "backup_schedule")
                            .tenant(tenant_id)
                            .note(e.to_string()),
                    )
                    .await;
                }
            }

            schedule.last_run = Some(now);
            schedule.next_run = Some(next_run_after(&schedule, Utc::now()));
            if let Err(e) = self.store.upsert_schedule(schedule).await {
                warn!(tenant_id, error = %e, "Failed to persist schedule advance");
            }
        }
        Ok(())
    }

    /// Reclaim artifact bytes of expired backups. Metadata rows are kept
    /// forever. Returns the number of records expired by this sweep.
    pub async fn sweep_expired_backups(&self) -> BackupResult<usize> {
        let now = Utc::now();
        let mut reclaimed = 0;

        for mut record in self.store.active_completed_records().await? {
            let days = self
                .settings
                .retention_days(record.tenant_id)
                .await
                .unwrap_or(self.config.default_retention_days);
            if expiry_for(&record, days) > now {
                continue;
            }

            if let Some(path) = record.storage_path.clone() {
                match self.artifacts.remove(Path::new(&path)).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(backup_id = %record.id, "Expired artifact already absent");
                    }
                    Err(e) => {
                        warn!(backup_id = %record.id, error = %e, "Failed to remove expired artifact");
                        continue; // retried by the next sweep
                    }
                }
            }

            record.mark_expired(now);
            if let Err(e) = self.store.update_record(record.clone()).await {
                warn!(backup_id = %record.id, error = %e, "Failed to persist retention expiry");
                continue;
            }
            self.audit(
                AuditEvent::new("retention.expired", "backup_record")
                    .tenant(record.tenant_id)
                    .entity_id(record.id)
                    .after(json!({ "expired_at": now })),
            )
            .await;
            reclaimed += 1;
        }

        if reclaimed > 0 {
            info!(reclaimed, "Retention sweep reclaimed expired artifacts");
        }
        Ok(reclaimed)
    }

    /// A tenant's backup records, newest first.
    pub async fn list_backups(&self, tenant_id: TenantId) -> BackupResult<Vec<BackupRecord>> {
        self.store.records_for_tenant(tenant_id).await
    }
}

/// Drive the schedule sweep on a fixed interval until the handle is
/// aborted.
pub fn spawn_scheduler(
    service: Arc<BackupService>,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = service.run_scheduled_backups().await {
                warn!(error = %e, "Schedule sweep failed");
            }
        }
    })
}

/// Drive the retention sweep on a fixed interval until the handle is
/// aborted.
pub fn spawn_retention_sweeper(
    service: Arc<BackupService>,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = service.sweep_expired_backups().await {
                warn!(error = %e, "Retention sweep failed");
            }
        }
    })
}
