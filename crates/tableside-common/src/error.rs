use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("migration {name} failed: {reason}")]
    Migration { name: String, reason: String },

    /// The migration itself succeeded but its ledger row was not written, so
    /// the next run will execute it again.
    #[error("migration {name} applied but not recorded: {reason}")]
    Recording { name: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Name of the migration this error belongs to, if any.
    pub fn migration_name(&self) -> Option<&str> {
        match self {
            Error::Migration { name, .. } | Error::Recording { name, .. } => Some(name),
            _ => None,
        }
    }
}
