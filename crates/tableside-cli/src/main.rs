mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tableside_common::Error;
use tableside_config::ConfigLoader;
use tableside_db::{MigrationRegistry, MigrationRunner, connect};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tableside-migrate",
    version,
    about = "Apply Tableside schema migrations in order, exactly once each"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Directory of `*.sql` migrations, applied in file-name order.
    /// Defaults to the built-in restaurant schema.
    #[arg(long, global = true, env = "TABLESIDE_MIGRATIONS_DIR")]
    migrations_dir: Option<PathBuf>,

    /// Optional TOML config file; environment variables take precedence.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Env file to load instead of `.env`.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Apply all pending migrations (the default).
    Migrate,
    /// Show which migrations are applied and which are pending.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    ExitCode::from(exit_status(run(cli).await))
}

/// Report a fatal error once and map the outcome to a process status.
fn exit_status(result: Result<()>) -> u8 {
    let Err(e) = result else {
        return 0;
    };
    match e.downcast_ref::<Error>().and_then(Error::migration_name) {
        Some(name) => error!(migration = %name, "tableside-migrate failed: {e:#}"),
        None => error!("tableside-migrate failed: {e:#}"),
    }
    1
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_file(path);
    }
    if let Some(path) = &cli.env_file {
        loader = loader.with_env_file(path);
    }
    let config = loader.load().context("failed to load configuration")?;
    let target = config
        .target()
        .context("invalid database configuration")?;

    let from_dir = match cli.migrations_dir.or(config.migrations.dir.clone()) {
        Some(dir) => {
            info!("loading migrations from {}", dir.display());
            let registry = MigrationRegistry::from_dir(&dir)
                .with_context(|| format!("failed to load migrations from {}", dir.display()))?;
            Some(registry)
        }
        None => None,
    };

    let db = connect(&target, &config.migrations.ledger_table)
        .context("failed to connect to database")?;
    let registry = from_dir.unwrap_or_else(|| MigrationRegistry::builtin(db.dialect()));
    let described = db.describe();
    let mut runner = MigrationRunner::new(db);

    match cli.command.unwrap_or(Command::Migrate) {
        Command::Migrate => {
            let report = runner.run(&registry).await?;
            println!("{}", output::render_run_summary(&report));
        }
        Command::Status { json } => {
            let statuses = runner.status(&registry).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                println!("{}", output::render_status_table(&described, &statuses));
            }
        }
    }

    Ok(())
}
