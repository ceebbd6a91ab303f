use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tableside_common::Result;
use tableside_config::{DatabaseTarget, model::validate_identifier};

use crate::migrations::Dialect;
use crate::remote::RemoteDatabase;
use crate::sqlite::SqliteDatabase;

/// One row of the migration ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub name: String,
    pub executed_at: DateTime<Utc>,
}

/// The capabilities the migration runner needs from a database.
///
/// Implementations report transport or driver failures as
/// `Error::Database`; the runner attaches migration context.
#[async_trait]
pub trait MigrationDatabase: Send + Sync {
    /// Human-readable target, used in logs.
    fn describe(&self) -> String;

    fn dialect(&self) -> Dialect;

    /// Execute a SQL blob with elevated privilege. The blob is executed whole.
    async fn execute_sql(&self, sql: &str) -> Result<()>;

    /// Create the ledger table if it does not exist.
    async fn ensure_ledger(&self) -> Result<()>;

    /// All ledger rows in insertion order.
    async fn applied_migrations(&self) -> Result<Vec<MigrationRecord>>;

    /// Append a ledger row for `name`, stamped with the insertion time.
    async fn record_migration(&self, name: &str) -> Result<()>;
}

/// Open the backend for `target`, keeping the ledger in `ledger_table`.
pub fn connect(target: &DatabaseTarget, ledger_table: &str) -> Result<Arc<dyn MigrationDatabase>> {
    validate_identifier(ledger_table)?;
    let db: Arc<dyn MigrationDatabase> = match target {
        DatabaseTarget::Remote {
            url,
            service_key,
            timeout,
        } => Arc::new(RemoteDatabase::new(url, service_key, *timeout, ledger_table)?),
        DatabaseTarget::Sqlite { path: Some(path) } => {
            Arc::new(SqliteDatabase::open(path, ledger_table)?)
        }
        DatabaseTarget::Sqlite { path: None } => Arc::new(SqliteDatabase::in_memory(ledger_table)?),
    };
    Ok(db)
}
