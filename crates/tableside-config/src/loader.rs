use std::path::{Path, PathBuf};

use tableside_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_SERVICE_KEY: &str = "DATABASE_SERVICE_KEY";
pub const ENV_LEDGER_TABLE: &str = "TABLESIDE_LEDGER_TABLE";
pub const ENV_HTTP_TIMEOUT: &str = "TABLESIDE_HTTP_TIMEOUT_SECS";
pub const ENV_MIGRATIONS_DIR: &str = "TABLESIDE_MIGRATIONS_DIR";

/// Builds an `AppConfig` from an optional TOML file, a `.env` file and the
/// process environment. Later sources win.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_file: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<AppConfig> {
        self.load_dotenv()?;

        let mut config = match &self.config_file {
            Some(path) => read_config_file(path)?,
            None => AppConfig::default(),
        };

        apply_env(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn load_dotenv(&self) -> Result<()> {
        match &self.env_file {
            Some(path) => match dotenvy::from_path(path) {
                Ok(()) => info!("loaded environment from {}", path.display()),
                Err(e) => {
                    return Err(Error::Config(format!(
                        "failed to load env file {}: {e}",
                        path.display()
                    )));
                }
            },
            // A missing default `.env` is normal in deployed environments.
            None => match dotenvy::dotenv() {
                Ok(path) => info!("loaded environment from {}", path.display()),
                Err(e) if e.not_found() => debug!("no .env file found"),
                Err(e) => return Err(Error::Config(format!("failed to load .env: {e}"))),
            },
        }
        Ok(())
    }
}

pub fn read_config_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read config {}: {e}", path.display()))
    })?;
    let config = toml::from_str(&contents).map_err(|e| {
        Error::Config(format!("failed to parse config {}: {e}", path.display()))
    })?;
    debug!("config file loaded from {}", path.display());
    Ok(config)
}

/// Overlay environment values on top of `config`. Empty values are ignored.
pub fn apply_env<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = get(ENV_DATABASE_URL) {
        config.database.url = Some(url);
    }
    if let Some(key) = get(ENV_SERVICE_KEY) {
        config.database.service_key = Some(key);
    }
    if let Some(table) = get(ENV_LEDGER_TABLE) {
        config.migrations.ledger_table = table.trim().to_string();
    }
    if let Some(dir) = get(ENV_MIGRATIONS_DIR) {
        config.migrations.dir = Some(PathBuf::from(dir));
    }
    if let Some(raw) = get(ENV_HTTP_TIMEOUT) {
        config.database.http_timeout_secs = raw.trim().parse().map_err(|e| {
            Error::Config(format!("invalid {ENV_HTTP_TIMEOUT} value '{raw}': {e}"))
        })?;
    }
    Ok(())
}
