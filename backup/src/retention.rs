//! Retention policy: when a backup's artifact bytes become reclaimable.
//!
//! The sweep itself lives on the service, because it touches the record
//! store, the artifact store and the audit sink. This module holds the
//! policy pieces: the per-tenant override port and the expiry computation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::model::{BackupRecord, TenantId};

/// Tenant configuration source. Supplies the retention-days override an
/// institution may have negotiated; `None` falls back to the engine
/// default.
#[async_trait]
pub trait TenantSettings: Send + Sync {
    async fn retention_days(&self, tenant_id: TenantId) -> Option<i64>;
}

/// Fixed override table; also the "no overrides anywhere" default.
#[derive(Debug, Default)]
pub struct StaticTenantSettings {
    overrides: HashMap<TenantId, i64>,
}

impl StaticTenantSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, tenant_id: TenantId, days: i64) -> Self {
        self.overrides.insert(tenant_id, days);
        self
    }
}

#[async_trait]
impl TenantSettings for StaticTenantSettings {
    async fn retention_days(&self, tenant_id: TenantId) -> Option<i64> {
        self.overrides.get(&tenant_id).copied()
    }
}

/// Expiry instant of a record: the stored `expires_at` when present,
/// otherwise `created_at` plus the resolved retention window.
pub fn expiry_for(record: &BackupRecord, retention_days: i64) -> DateTime<Utc> {
    record
        .expires_at
        .unwrap_or(record.created_at + Duration::days(retention_days))
}
