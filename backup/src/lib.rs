//! Tenant-isolated encrypted backup & restore engine for the campus
//! platform.
//!
//! An export run scopes the shared relations to one institution through
//! filtered views ([`scoping`]), drives the external dump utility against
//! exactly those views ([`export`]), seals the artifact
//! (encrypt → persist → hash → sign, via `campus_sealing`), and records the
//! lifecycle in the backup record store ([`store`]). Restores pass a strict
//! ordered validation gate ([`validate`]) and are preceded by a mandatory
//! pre-restore snapshot; the retention sweep reclaims expired artifact
//! bytes while keeping every metadata row ([`retention`]). All
//! collaborators — record store, SQL executor, dump/restore tools, audit
//! sink, tenant settings — are injected through the ports consumed by
//! [`service::BackupService`].

pub mod audit;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod restore;
pub mod retention;
pub mod schedule;
pub mod scoping;
pub mod service;
pub mod storage;
pub mod store;
pub mod validate;

pub use audit::{AuditEvent, AuditSink, TracingAuditSink};
pub use config::{BackupConfig, Environment};
pub use error::{BackupError, BackupResult};
pub use export::{DumpTool, PgDumpTool, ToolOutput};
pub use model::{
    BackupKind, BackupOrigin, BackupReceipt, BackupRecord, BackupSchedule, BackupStatus,
    RestoreMode, RestoreReport, RestoreRequest, RetentionStatus, ScheduleFrequency, TenantId,
};
pub use restore::{PsqlRestoreTool, RestoreTool};
pub use retention::{StaticTenantSettings, TenantSettings};
pub use scoping::{SqlExecutor, SqlParam};
pub use service::{BackupService, Collaborators, spawn_retention_sweeper, spawn_scheduler};
pub use storage::ArtifactStore;
pub use store::{MemoryRecordStore, RecordStore};
