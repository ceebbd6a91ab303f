use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tableside_common::{Error, Result};
use tracing::{debug, info};

use crate::database::{MigrationDatabase, MigrationRecord};
use crate::migrations::Dialect;

/// SQLite-backed migration target for local development and tests.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    ledger_table: String,
    label: String,
}

impl SqliteDatabase {
    pub fn open(db_path: &Path, ledger_table: &str) -> Result<Self> {
        info!("opening sqlite database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
        Self::from_connection(conn, ledger_table, format!("sqlite:{}", db_path.display()))
    }

    pub fn in_memory(ledger_table: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::from_connection(conn, ledger_table, "sqlite::memory:".to_string())
    }

    fn from_connection(conn: Connection, ledger_table: &str, label: String) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            ledger_table: ledger_table.to_string(),
            label,
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("sqlite connection lock poisoned".into()))
    }

    /// Whether a table with this name exists.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to inspect schema: {e}")))?;
        Ok(count > 0)
    }

    fn execute_sql_blocking(&self, sql: &str) -> Result<()> {
        let mut conn = self.connection()?;
        // One transaction per blob so a failing migration leaves no partial
        // schema behind.
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
        tx.execute_batch(sql)
            .map_err(|e| Error::Database(without_statement_text(&e.to_string(), sql)))?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit: {e}")))?;
        Ok(())
    }

    fn ensure_ledger_blocking(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                executed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );",
            table = self.ledger_table
        ))
        .map_err(|e| Error::Database(format!("failed to create ledger table: {e}")))?;
        Ok(())
    }

    fn applied_migrations_blocking(&self) -> Result<Vec<MigrationRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT name, executed_at FROM {} ORDER BY id ASC",
                self.ledger_table
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(MigrationRecord {
                    name: row.get(0)?,
                    executed_at: parse_datetime(row.get::<_, String>(1)?),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(
                row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?,
            );
        }
        Ok(records)
    }

    fn record_migration_blocking(&self, name: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!("INSERT INTO {} (name) VALUES (?1)", self.ledger_table),
            params![name],
        )
        .map_err(|e| Error::Database(format!("failed to insert ledger row: {e}")))?;
        debug!(migration = name, "ledger row written");
        Ok(())
    }
}

#[async_trait]
impl MigrationDatabase for SqliteDatabase {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute_sql(&self, sql: &str) -> Result<()> {
        self.execute_sql_blocking(sql)
    }

    async fn ensure_ledger(&self) -> Result<()> {
        self.ensure_ledger_blocking()
    }

    async fn applied_migrations(&self) -> Result<Vec<MigrationRecord>> {
        self.applied_migrations_blocking()
    }

    async fn record_migration(&self, name: &str) -> Result<()> {
        self.record_migration_blocking(name)
    }
}

/// Syntax errors render as "{msg} in {sql} at offset {n}", where `sql` is the
/// unexecuted tail of the blob. Drop that tail so a failing migration does not
/// dump its whole body into the log.
fn without_statement_text(message: &str, sql: &str) -> String {
    let Some(offset_at) = message.rfind(" at offset ") else {
        return message.to_string();
    };
    let head = &message[..offset_at];
    for (idx, _) in head.match_indices(" in ") {
        let tail = &head[idx + " in ".len()..];
        if !tail.is_empty() && sql.ends_with(tail) {
            return format!("{}{}", &head[..idx], &message[offset_at..]);
        }
    }
    message.to_string()
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // Rows written by hand with datetime('now') use "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or_else(|_| Utc::now())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ledger_round_trip_keeps_insertion_order() {
        let db = SqliteDatabase::in_memory("migrations").unwrap();
        db.ensure_ledger().await.unwrap();
        db.record_migration("002_b").await.unwrap();
        db.record_migration("001_a").await.unwrap();

        let names: Vec<_> = db
            .applied_migrations()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["002_b", "001_a"]);
    }

    #[tokio::test]
    async fn ensure_ledger_is_idempotent() {
        let db = SqliteDatabase::in_memory("schema_ledger").unwrap();
        db.ensure_ledger().await.unwrap();
        db.record_migration("001_a").await.unwrap();
        db.ensure_ledger().await.unwrap();

        assert!(db.table_exists("schema_ledger").unwrap());
        assert_eq!(db.applied_migrations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_ledger_name_is_rejected() {
        let db = SqliteDatabase::in_memory("migrations").unwrap();
        db.ensure_ledger().await.unwrap();
        db.record_migration("001_a").await.unwrap();
        let err = db.record_migration("001_a").await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[tokio::test]
    async fn failed_blob_rolls_back_whole_statement_list() {
        let db = SqliteDatabase::in_memory("migrations").unwrap();
        let err = db
            .execute_sql("CREATE TABLE menus (id INTEGER); NOT VALID SQL;")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(!db.table_exists("menus").unwrap());
    }

    #[tokio::test]
    async fn semicolons_inside_literals_are_not_split() {
        let db = SqliteDatabase::in_memory("migrations").unwrap();
        db.execute_sql(
            "CREATE TABLE notes (body TEXT);
             INSERT INTO notes (body) VALUES ('soup; then salad');",
        )
        .await
        .unwrap();

        let conn = db.connection().unwrap();
        let body: String = conn
            .query_row("SELECT body FROM notes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(body, "soup; then salad");
    }

    #[tokio::test]
    async fn syntax_error_message_omits_migration_body() {
        let db = SqliteDatabase::in_memory("migrations").unwrap();
        let err = db
            .execute_sql("CREATE TABLE broken (; CREATE TABLE after_it (id INTEGER);")
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(!msg.contains("after_it"), "sql leaked into error: {msg}");
    }

    #[test]
    fn statement_text_is_stripped_from_input_errors() {
        let sql = "CREATE TABLE a (id INTEGER);\nCREATE TABLE b (";
        assert_eq!(
            without_statement_text(
                "near \"(\": syntax error in \nCREATE TABLE b ( at offset 15",
                sql
            ),
            "near \"(\": syntax error at offset 15"
        );
        assert_eq!(
            without_statement_text("no such table: missing", sql),
            "no such table: missing"
        );
    }

    #[test]
    fn parse_datetime_accepts_both_formats() {
        let rfc = parse_datetime("2026-10-15T12:30:00.250Z".to_string());
        assert_eq!(rfc.to_rfc3339(), "2026-10-15T12:30:00.250+00:00");

        let plain = parse_datetime("2026-10-15 12:30:00".to_string());
        assert_eq!(plain.to_rfc3339(), "2026-10-15T12:30:00+00:00");
    }
}
