//! Record store port and the in-memory implementation backing tests and
//! embedded deployments. The platform's SQL-backed implementation lives
//! with its ORM layer and plugs in through the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BackupError, BackupResult};
use crate::model::{BackupRecord, BackupSchedule, BackupStatus, RetentionStatus, TenantId};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_record(&self, record: BackupRecord) -> BackupResult<()>;
    /// Replace an existing record; `NotFound` if it was never inserted.
    async fn update_record(&self, record: BackupRecord) -> BackupResult<()>;
    async fn record(&self, id: Uuid) -> BackupResult<Option<BackupRecord>>;
    async fn record_by_path(&self, storage_path: &str) -> BackupResult<Option<BackupRecord>>;
    /// All records of one tenant, newest first.
    async fn records_for_tenant(&self, tenant_id: TenantId) -> BackupResult<Vec<BackupRecord>>;
    /// Snapshot of completed records still holding artifact bytes.
    async fn active_completed_records(&self) -> BackupResult<Vec<BackupRecord>>;
    async fn schedules(&self) -> BackupResult<Vec<BackupSchedule>>;
    /// Upsert keyed by tenant: one schedule per institution.
    async fn upsert_schedule(&self, schedule: BackupSchedule) -> BackupResult<()>;
}

/// RwLock/HashMap-backed store.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<Uuid, BackupRecord>>,
    schedules: RwLock<HashMap<TenantId, BackupSchedule>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_record(&self, record: BackupRecord) -> BackupResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(BackupError::Database(format!(
                "backup record {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn update_record(&self, record: BackupRecord) -> BackupResult<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.id) {
            return Err(BackupError::NotFound(format!(
                "backup record {} does not exist",
                record.id
            )));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn record(&self, id: Uuid) -> BackupResult<Option<BackupRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn record_by_path(&self, storage_path: &str) -> BackupResult<Option<BackupRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.storage_path.as_deref() == Some(storage_path))
            .cloned())
    }

    async fn records_for_tenant(&self, tenant_id: TenantId) -> BackupResult<Vec<BackupRecord>> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn active_completed_records(&self) -> BackupResult<Vec<BackupRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| {
                r.status == BackupStatus::Completed && r.retention_status == RetentionStatus::Active
            })
            .cloned()
            .collect())
    }

    async fn schedules(&self) -> BackupResult<Vec<BackupSchedule>> {
        Ok(self.schedules.read().await.values().cloned().collect())
    }

    async fn upsert_schedule(&self, schedule: BackupSchedule) -> BackupResult<()> {
        self.schedules
            .write()
            .await
            .insert(schedule.tenant_id, schedule);
        Ok(())
    }
}
