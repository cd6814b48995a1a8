//! Tenant scoping: per-tenant filtered views over the shared relations.
//!
//! An export never dumps base tables. For each relation carrying the tenant
//! discriminator column a read-only view filtered to the acting tenant is
//! created under a collision-resistant prefix, and the dump utility is
//! restricted to exactly those views. Teardown is idempotent best-effort:
//! a failed export must not leave views behind in the shared schema.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use campus_sealing::sha256_hex;

use crate::error::BackupResult;
use crate::model::TenantId;

/// Discriminator column present on every tenant-scoped relation.
pub const TENANT_DISCRIMINATOR: &str = "institution_id";

/// Known tenant-scoped relations, used when catalog introspection fails.
/// Versioned: extend by adding a new constant, never by editing this one.
pub const FALLBACK_RELATIONS_V1: &[&str] = &[
    "students",
    "guardians",
    "teachers",
    "staff_members",
    "courses",
    "course_sections",
    "enrollments",
    "grades",
    "attendance_records",
    "report_cards",
    "invoices",
    "payments",
    "payroll_entries",
    "school_terms",
    "announcements",
];

/// Catalog query listing base tables that carry the discriminator column.
const INTROSPECT_RELATIONS_SQL: &str = "SELECT c.table_name \
     FROM information_schema.columns c \
     JOIN information_schema.tables t \
       ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
     WHERE c.table_schema = 'public' \
       AND t.table_type = 'BASE TABLE' \
       AND c.column_name = $1 \
     ORDER BY c.table_name";

/// Parameter value bound into a raw statement.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlParam {
    Text(String),
    BigInt(i64),
}

/// Raw relational execution port: metadata introspection and view DDL go
/// through here. Identifier quoting stays on this side; values are always
/// bound as parameters.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a statement, returning the affected-row count.
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> BackupResult<u64>;
    /// Run a single-column text query.
    async fn query_strings(&self, sql: &str, params: &[SqlParam]) -> BackupResult<Vec<String>>;
}

/// Discover the tenant-scoped relations, falling back to the versioned
/// constant list when introspection fails. Callers cannot tell which path
/// served the answer.
pub async fn tenant_relations(sql: &dyn SqlExecutor) -> Vec<String> {
    match sql
        .query_strings(
            INTROSPECT_RELATIONS_SQL,
            &[SqlParam::Text(TENANT_DISCRIMINATOR.to_string())],
        )
        .await
    {
        Ok(relations) => relations,
        Err(e) => {
            warn!(error = %e, "Catalog introspection failed, using fallback relation list");
            FALLBACK_RELATIONS_V1
                .iter()
                .map(|r| r.to_string())
                .collect()
        }
    }
}

/// Quote an SQL identifier, escaping embedded double quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Collision-resistant view prefix: short hash of the correlation id and
/// the export timestamp.
pub fn view_prefix(correlation_id: &str, at: DateTime<Utc>) -> String {
    let hash = sha256_hex(format!("{correlation_id}:{}", at.timestamp_nanos_opt().unwrap_or(0)).as_bytes());
    format!("bk_{}", &hash[..8])
}

/// View name for one relation, bounded to the engine's identifier limit.
/// The prefix always survives truncation; only the relation part is cut.
pub fn view_name(prefix: &str, relation: &str, max_len: usize) -> String {
    let name = format!("{prefix}_{relation}");
    if name.len() <= max_len {
        name
    } else {
        name[..max_len].to_string()
    }
}

/// The set of views created for one export run. Must be torn down on every
/// exit path.
pub struct ScopedViews {
    sql: Arc<dyn SqlExecutor>,
    names: Vec<String>,
}

impl std::fmt::Debug for ScopedViews {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedViews")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl ScopedViews {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Best-effort teardown: drop-if-exists each view, continue on error.
    /// Safe to call more than once.
    pub async fn teardown(&mut self) {
        for name in self.names.drain(..) {
            let stmt = format!("DROP VIEW IF EXISTS {}", quote_ident(&name));
            if let Err(e) = self.sql.execute(&stmt, &[]).await {
                warn!(view = %name, error = %e, "Failed to drop scoped view");
            }
        }
    }
}

/// Create one filtered view per tenant-scoped relation. On a mid-way
/// failure the views created so far are torn down before returning.
pub async fn create_tenant_views(
    sql: Arc<dyn SqlExecutor>,
    tenant_id: TenantId,
    correlation_id: &str,
    max_ident_len: usize,
) -> BackupResult<ScopedViews> {
    let relations = tenant_relations(sql.as_ref()).await;
    let prefix = view_prefix(correlation_id, Utc::now());

    let mut views = ScopedViews {
        sql: sql.clone(),
        names: Vec::with_capacity(relations.len()),
    };

    for relation in &relations {
        let name = view_name(&prefix, relation, max_ident_len);
        let stmt = format!(
            "CREATE VIEW {} AS SELECT * FROM {} WHERE {} = $1",
            quote_ident(&name),
            quote_ident(relation),
            quote_ident(TENANT_DISCRIMINATOR),
        );
        match sql.execute(&stmt, &[SqlParam::BigInt(tenant_id)]).await {
            Ok(_) => views.names.push(name),
            Err(e) => {
                warn!(relation = %relation, error = %e, "View creation failed, rolling back scoped views");
                views.teardown().await;
                return Err(e);
            }
        }
    }

    debug!(
        tenant_id,
        views = views.names.len(),
        "Created tenant-scoped views"
    );
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::BackupError;

    /// Executor that records statements and fails on request.
    #[derive(Default)]
    struct ScriptedExecutor {
        statements: Mutex<Vec<String>>,
        fail_on: Option<String>,
        introspection: Option<Vec<String>>,
    }

    #[async_trait]
    impl SqlExecutor for ScriptedExecutor {
        async fn execute(&self, sql: &str, _params: &[SqlParam]) -> BackupResult<u64> {
            self.statements.lock().unwrap().push(sql.to_string());
            if let Some(marker) = &self.fail_on {
                if sql.contains(marker.as_str()) {
                    return Err(BackupError::Database("simulated failure".to_string()));
                }
            }
            Ok(0)
        }

        async fn query_strings(
            &self,
            _sql: &str,
            _params: &[SqlParam],
        ) -> BackupResult<Vec<String>> {
            match &self.introspection {
                Some(relations) => Ok(relations.clone()),
                None => Err(BackupError::Database("introspection down".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn introspection_failure_uses_fallback_list() {
        let executor = ScriptedExecutor::default();
        let relations = tenant_relations(&executor).await;
        assert_eq!(relations.len(), FALLBACK_RELATIONS_V1.len());
        assert!(relations.contains(&"students".to_string()));
    }

    #[tokio::test]
    async fn creates_one_view_per_relation_with_bound_tenant() {
        let executor = Arc::new(ScriptedExecutor {
            introspection: Some(vec!["students".into(), "grades".into()]),
            ..Default::default()
        });
        let views = create_tenant_views(executor.clone(), 42, "corr-1", 63)
            .await
            .unwrap();

        assert_eq!(views.names().len(), 2);
        let statements = executor.statements.lock().unwrap();
        assert!(statements[0].starts_with("CREATE VIEW \"bk_"));
        assert!(statements[0].contains("FROM \"students\" WHERE \"institution_id\" = $1"));
    }

    #[tokio::test]
    async fn midway_failure_tears_down_created_views() {
        let executor = Arc::new(ScriptedExecutor {
            introspection: Some(vec!["students".into(), "grades".into()]),
            fail_on: Some("\"grades\"".to_string()),
            ..Default::default()
        });
        let err = create_tenant_views(executor.clone(), 42, "corr-2", 63)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Database(_)));

        let statements = executor.statements.lock().unwrap();
        // create students, create grades (fails), drop students
        assert_eq!(statements.len(), 3);
        assert!(statements[2].starts_with("DROP VIEW IF EXISTS"));
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_continues_on_error() {
        let executor = Arc::new(ScriptedExecutor {
            introspection: Some(vec!["students".into(), "grades".into()]),
            ..Default::default()
        });
        let mut views = create_tenant_views(executor.clone(), 7, "corr-3", 63)
            .await
            .unwrap();

        views.teardown().await;
        views.teardown().await; // second call is a no-op

        let drops = executor
            .statements
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.starts_with("DROP VIEW IF EXISTS"))
            .count();
        assert_eq!(drops, 2);
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("students"), "\"students\"");
        assert_eq!(quote_ident("bad\"name"), "\"bad\"\"name\"");
    }

    #[test]
    fn view_names_respect_identifier_limit() {
        let prefix = view_prefix("corr", Utc::now());
        assert_eq!(prefix.len(), 11); // bk_ + 8 hex chars

        let long_relation = "a".repeat(80);
        let name = view_name(&prefix, &long_relation, 63);
        assert_eq!(name.len(), 63);
        assert!(name.starts_with(&prefix));
    }

    #[test]
    fn view_prefixes_differ_per_correlation() {
        let now = Utc::now();
        assert_ne!(view_prefix("a", now), view_prefix("b", now));
    }
}
