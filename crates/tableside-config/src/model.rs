use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tableside_common::{Error, Result};
use url::Url;

pub const DEFAULT_LEDGER_TABLE: &str = "migrations";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Longest identifier Postgres accepts without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub service_key: Option<String>,
    pub http_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            service_key: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

// Keep the credential out of logs.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url)
            .field("service_key", &self.service_key.as_ref().map(|_| "<redacted>"))
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub ledger_table: String,
    pub dir: Option<PathBuf>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            dir: None,
        }
    }
}

/// Where migrations are applied, resolved from `DatabaseConfig`.
#[derive(Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// Hosted Postgres behind a REST layer with an `exec_sql` procedure.
    Remote {
        url: Url,
        service_key: String,
        timeout: Duration,
    },
    /// Local SQLite file, or an in-memory database when `path` is `None`.
    Sqlite { path: Option<PathBuf> },
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseTarget::Remote { url, timeout, .. } => f
                .debug_struct("Remote")
                .field("url", &url.as_str())
                .field("timeout", timeout)
                .finish_non_exhaustive(),
            DatabaseTarget::Sqlite { path } => {
                f.debug_struct("Sqlite").field("path", path).finish()
            }
        }
    }
}

impl AppConfig {
    /// Resolve the configured URL into a concrete target.
    ///
    /// Remote targets need both a URL and a service key; SQLite targets only
    /// need the URL.
    pub fn target(&self) -> Result<DatabaseTarget> {
        let raw = self
            .database
            .url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Config("DATABASE_URL is not set".into()))?;

        if let Some(rest) = raw.strip_prefix("sqlite:") {
            let rest = rest.strip_prefix("//").unwrap_or(rest);
            let path = match rest {
                "" | ":memory:" => None,
                p => Some(PathBuf::from(p)),
            };
            return Ok(DatabaseTarget::Sqlite { path });
        }

        let url = Url::parse(raw)
            .map_err(|e| Error::Config(format!("invalid DATABASE_URL '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "unsupported DATABASE_URL scheme: {}",
                url.scheme()
            )));
        }

        let service_key = self
            .database
            .service_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Config("DATABASE_SERVICE_KEY is not set".into()))?
            .to_string();

        if self.database.http_timeout_secs == 0 {
            return Err(Error::Config("http_timeout_secs must be positive".into()));
        }

        Ok(DatabaseTarget::Remote {
            url,
            service_key,
            timeout: Duration::from_secs(self.database.http_timeout_secs),
        })
    }

    /// Check the parts of the config that do not depend on the target.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.migrations.ledger_table)
    }
}

/// The ledger table name is interpolated into SQL, so only plain identifiers
/// are accepted.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("ledger table name cannot be empty".into()));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::Config(format!(
            "ledger table name too long: {} chars",
            name.len()
        )));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Config(format!(
            "ledger table name '{name}' is not a plain identifier"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(url: &str, key: Option<&str>) -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = Some(url.to_string());
        config.database.service_key = key.map(str::to_string);
        config
    }

    #[test]
    fn remote_target_requires_service_key() {
        let err = with_url("https://db.example.com", None).target().unwrap_err();
        assert!(err.to_string().contains("DATABASE_SERVICE_KEY"));

        let target = with_url("https://db.example.com", Some("svc-key"))
            .target()
            .unwrap();
        match target {
            DatabaseTarget::Remote {
                url,
                service_key,
                timeout,
            } => {
                assert_eq!(url.host_str(), Some("db.example.com"));
                assert_eq!(service_key, "svc-key");
                assert_eq!(timeout, Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));
            }
            other => panic!("expected remote target, got {other:?}"),
        }
    }

    #[test]
    fn missing_url_is_config_error() {
        let err = AppConfig::default().target().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = with_url("   ", Some("k")).target().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn sqlite_urls_need_no_credential() {
        assert_eq!(
            with_url("sqlite::memory:", None).target().unwrap(),
            DatabaseTarget::Sqlite { path: None }
        );
        assert_eq!(
            with_url("sqlite://data/tableside.db", None).target().unwrap(),
            DatabaseTarget::Sqlite {
                path: Some(PathBuf::from("data/tableside.db"))
            }
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = with_url("postgres://localhost/db", Some("k"))
            .target()
            .unwrap_err();
        assert!(err.to_string().contains("unsupported DATABASE_URL scheme"));
    }

    #[test]
    fn debug_output_redacts_service_key() {
        let config = with_url("https://db.example.com", Some("super-secret"));
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        let rendered = format!("{:?}", config.target().unwrap());
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("migrations").is_ok());
        assert!(validate_identifier("_schema_ledger2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2fast").is_err());
        assert!(validate_identifier("migrations; DROP TABLE orders").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }
}
