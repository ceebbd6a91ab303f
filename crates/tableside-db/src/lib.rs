pub mod database;
pub mod migrations;
pub mod remote;
pub mod runner;
pub mod sqlite;

pub use database::{MigrationDatabase, MigrationRecord, connect};
pub use migrations::{Dialect, Migration, MigrationRegistry};
pub use remote::RemoteDatabase;
pub use runner::{MigrationRunner, MigrationState, MigrationStatus, RunPhase, RunReport};
pub use sqlite::SqliteDatabase;
