//! Hosted Postgres behind a PostgREST-style API.
//!
//! Schema changes go through the `exec_sql` remote procedure, which runs the
//! posted SQL with elevated privilege. Ledger reads and writes use the plain
//! table endpoints so they need no custom procedure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::json;
use tableside_common::{Error, Result};
use tracing::{debug, info};
use url::Url;

use crate::database::{MigrationDatabase, MigrationRecord};
use crate::migrations::Dialect;

const EXEC_SQL_RPC: &str = "rest/v1/rpc/exec_sql";

pub struct RemoteDatabase {
    client: reqwest::Client,
    base_url: String,
    ledger_table: String,
}

impl RemoteDatabase {
    pub fn new(
        url: &Url,
        service_key: &str,
        timeout: Duration,
        ledger_table: &str,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", sensitive_header(service_key)?);
        headers.insert(AUTHORIZATION, sensitive_header(&format!("Bearer {service_key}"))?);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Database(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: url.as_str().trim_end_matches('/').to_string(),
            ledger_table: ledger_table.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn ledger_endpoint(&self) -> String {
        self.endpoint(&format!("rest/v1/{}", self.ledger_table))
    }

    async fn exec_sql(&self, sql: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.endpoint(EXEC_SQL_RPC))
            .json(&json!({ "sql": sql }))
            .send()
            .await
            .map_err(|e| Error::Database(format!("exec_sql request failed: {e}")))?;
        check_status(resp, "exec_sql").await?;
        Ok(())
    }

    /// Read-only check; the REST layer answers 404 for unknown tables.
    async fn ledger_exists(&self) -> Result<bool> {
        let resp = self
            .client
            .get(self.ledger_endpoint())
            .query(&[("select", "name"), ("limit", "0")])
            .send()
            .await
            .map_err(|e| Error::Database(format!("ledger lookup failed: {e}")))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(resp, "ledger lookup").await?;
        Ok(true)
    }
}

#[async_trait]
impl MigrationDatabase for RemoteDatabase {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute_sql(&self, sql: &str) -> Result<()> {
        debug!(bytes = sql.len(), "executing sql via rpc");
        self.exec_sql(sql).await
    }

    async fn ensure_ledger(&self) -> Result<()> {
        if self.ledger_exists().await? {
            debug!(table = %self.ledger_table, "ledger table present");
            return Ok(());
        }

        info!(table = %self.ledger_table, "creating ledger table");
        // The REST layer caches the schema and must reload to see the new table.
        self.exec_sql(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id SERIAL PRIMARY KEY,
                name VARCHAR(255) UNIQUE NOT NULL,
                executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            NOTIFY pgrst, 'reload schema';",
            table = self.ledger_table
        ))
        .await
    }

    async fn applied_migrations(&self) -> Result<Vec<MigrationRecord>> {
        let resp = self
            .client
            .get(self.ledger_endpoint())
            .query(&[("select", "name,executed_at"), ("order", "id.asc")])
            .send()
            .await
            .map_err(|e| Error::Database(format!("ledger query failed: {e}")))?;
        let resp = check_status(resp, "ledger query").await?;

        resp.json::<Vec<MigrationRecord>>()
            .await
            .map_err(|e| Error::Database(format!("invalid ledger response: {e}")))
    }

    async fn record_migration(&self, name: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.ledger_endpoint())
            .header("Prefer", "return=minimal")
            .json(&json!({ "name": name }))
            .send()
            .await
            .map_err(|e| Error::Database(format!("ledger insert failed: {e}")))?;
        check_status(resp, "ledger insert").await?;
        Ok(())
    }
}

fn sensitive_header(value: &str) -> Result<HeaderValue> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| Error::Config("service key contains invalid header characters".into()))?;
    header.set_sensitive(true);
    Ok(header)
}

async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Database(format!("{what} returned {status}: {body}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn remote(server: &MockServer) -> RemoteDatabase {
        let url = Url::parse(&server.uri()).unwrap();
        RemoteDatabase::new(&url, "svc-key", Duration::from_secs(5), "migrations").unwrap()
    }

    #[tokio::test]
    async fn execute_sql_posts_to_rpc_with_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/exec_sql"))
            .and(header("apikey", "svc-key"))
            .and(header("authorization", "Bearer svc-key"))
            .and(body_json(json!({ "sql": "CREATE TABLE menus (id INT);" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        remote(&server)
            .execute_sql("CREATE TABLE menus (id INT);")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rpc_error_includes_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/exec_sql"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"message":"syntax error"}"#),
            )
            .mount(&server)
            .await;

        let err = remote(&server).execute_sql("NOPE").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("400"), "unexpected error: {msg}");
        assert!(msg.contains("syntax error"), "unexpected error: {msg}");
    }

    #[tokio::test]
    async fn applied_migrations_reads_ledger_in_id_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/migrations"))
            .and(query_param("select", "name,executed_at"))
            .and(query_param("order", "id.asc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "001_initial_schema", "executed_at": "2026-10-01T09:00:00.123456+00:00" },
                { "name": "002_optimize_indexes", "executed_at": "2026-10-02T09:00:00+00:00" }
            ])))
            .mount(&server)
            .await;

        let records = remote(&server).applied_migrations().await.unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["001_initial_schema", "002_optimize_indexes"]);
    }

    #[tokio::test]
    async fn record_migration_inserts_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/migrations"))
            .and(header("prefer", "return=minimal"))
            .and(body_json(json!({ "name": "002_optimize_indexes" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        remote(&server)
            .record_migration("002_optimize_indexes")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ensure_ledger_creates_table_through_rpc() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/migrations"))
            .and(query_param("limit", "0"))
            .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"code":"PGRST205"}"#))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/exec_sql"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        remote(&server).ensure_ledger().await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let rpc = requests
            .iter()
            .find(|r| r.url.path() == "/rest/v1/rpc/exec_sql")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&rpc.body).unwrap();
        let sql = body["sql"].as_str().unwrap();
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS migrations"));
        assert!(sql.contains("name VARCHAR(255) UNIQUE NOT NULL"));
        assert!(sql.contains("NOTIFY pgrst"));
    }

    #[tokio::test]
    async fn existing_ledger_sends_no_writes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/migrations"))
            .and(query_param("limit", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        remote(&server).ensure_ledger().await.unwrap();
    }

    #[tokio::test]
    async fn ledger_lookup_failure_is_not_treated_as_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/migrations"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = remote(&server).ensure_ledger().await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let url = Url::parse("https://db.example.com/").unwrap();
        let db = RemoteDatabase::new(&url, "k", Duration::from_secs(1), "migrations").unwrap();
        assert_eq!(
            db.endpoint(EXEC_SQL_RPC),
            "https://db.example.com/rest/v1/rpc/exec_sql"
        );
    }
}
