//! Backup records, schedules and restore requests.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BackupError, BackupResult};

/// Institution primary key. Every tenant-scoped row carries it as the
/// discriminator column.
pub type TenantId = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Full,
    DataOnly,
}

impl BackupKind {
    /// Token used in artifact filenames.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::DataOnly => "data",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupOrigin {
    Manual,
    Scheduled,
    /// Snapshot forced by the pre-restore guard
    PreRestore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionStatus {
    Active,
    Expired,
}

/// Lifecycle row of one backup artifact. Created at export start, sealed at
/// export completion, flipped to expired by the retention sweep. The row
/// itself is never deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub kind: BackupKind,
    pub origin: BackupOrigin,
    pub status: BackupStatus,
    /// Failure message when `status == Error`
    pub error: Option<String>,
    pub size_bytes: u64,
    /// Artifact location, namespaced by tenant (legacy rows may be flat)
    pub storage_path: Option<String>,
    pub encrypted: bool,
    pub cipher_algorithm: Option<String>,
    /// Hex-encoded GCM nonce
    pub iv: Option<String>,
    /// Hex-encoded GCM authentication tag
    pub auth_tag: Option<String>,
    /// Hex-encoded SHA-256 of the persisted artifact bytes
    pub sha256: Option<String>,
    pub hash_verified: bool,
    /// Base64(DER) ECDSA signature over the digest
    pub signature: Option<String>,
    pub signature_algorithm: Option<String>,
    pub signature_verified: bool,
    pub retention_status: RetentionStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackupRecord {
    pub fn new(tenant_id: TenantId, kind: BackupKind, origin: BackupOrigin) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            kind,
            origin,
            status: BackupStatus::Pending,
            error: None,
            size_bytes: 0,
            storage_path: None,
            encrypted: false,
            cipher_algorithm: None,
            iv: None,
            auth_tag: None,
            sha256: None,
            hash_verified: false,
            signature: None,
            signature_algorithm: None,
            signature_verified: false,
            retention_status: RetentionStatus::Active,
            expires_at: None,
            expired_at: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// `pending → in_progress`
    pub fn mark_in_progress(&mut self) -> BackupResult<()> {
        if self.status != BackupStatus::Pending {
            return Err(BackupError::Validation(format!(
                "cannot start backup {} from status {:?}",
                self.id, self.status
            )));
        }
        self.status = BackupStatus::InProgress;
        Ok(())
    }

    /// `in_progress → completed`
    pub fn mark_completed(&mut self) -> BackupResult<()> {
        if self.status != BackupStatus::InProgress {
            return Err(BackupError::Validation(format!(
                "cannot complete backup {} from status {:?}",
                self.id, self.status
            )));
        }
        self.status = BackupStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Any non-terminal status → `error`
    pub fn mark_error(&mut self, message: impl ToString) {
        self.status = BackupStatus::Error;
        self.error = Some(message.to_string());
    }

    /// `completed/active → expired`; only the retention sweep calls this.
    pub fn mark_expired(&mut self, at: DateTime<Utc>) {
        self.retention_status = RetentionStatus::Expired;
        self.expired_at = Some(at);
    }

    /// A record may only be loaded or restored once completed and anchored
    /// by a content digest.
    pub fn is_restorable(&self) -> bool {
        self.status == BackupStatus::Completed && self.sha256.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFrequency {
    Daily,
    Weekly,
    Monthly,
}

/// Per-tenant export schedule, owned by the institution's administrators and
/// mutated only by the scheduler after each run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub tenant_id: TenantId,
    pub frequency: ScheduleFrequency,
    pub time_of_day: NaiveTime,
    /// Weekly schedules only
    pub day_of_week: Option<Weekday>,
    /// Monthly schedules only; clamped to the month's length
    pub day_of_month: Option<u32>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub active: bool,
}

impl BackupSchedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_run.map_or(true, |next| next <= now)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    Normal,
    /// Explicitly authorized out-of-band restore (e.g. support intervention)
    Exceptional,
}

/// Ephemeral restore request; never persisted. Produces exactly one
/// pre-restore snapshot record as a side effect.
#[derive(Clone, Debug)]
pub struct RestoreRequest {
    pub tenant_id: TenantId,
    /// Defaults to the tenant's most recent completed backup when absent
    pub backup_id: Option<Uuid>,
    pub confirm: bool,
    pub mode: RestoreMode,
    pub actor: Option<String>,
}

/// Result of a completed restore. Row counts are approximate, derived from
/// the script's insert statements for reporting only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestoreReport {
    pub success: bool,
    pub backup_id: Uuid,
    /// Snapshot taken by the pre-restore guard
    pub pre_restore_backup_id: Uuid,
    pub restored_counts: std::collections::BTreeMap<String, u64>,
}

/// Return of a successful export.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupReceipt {
    pub id: Uuid,
    pub path: String,
    pub size_bytes: u64,
}
