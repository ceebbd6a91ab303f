use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tableside_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::database::MigrationDatabase;
use crate::migrations::MigrationRegistry;

/// Where a run currently is. Any error moves the run to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    EnsuringLedger,
    LoadingApplied,
    Skipping,
    Executing,
    Recording,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::NotStarted => "not_started",
            RunPhase::EnsuringLedger => "ensuring_ledger",
            RunPhase::LoadingApplied => "loading_applied",
            RunPhase::Skipping => "skipping",
            RunPhase::Executing => "executing",
            RunPhase::Recording => "recording",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a successful run did, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Applied { executed_at: DateTime<Utc> },
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

/// Applies registry migrations exactly once each, in order, recording every
/// success in the ledger before the next migration starts.
///
/// There is no lock against two runners working on the same ledger at once.
pub struct MigrationRunner {
    db: Arc<dyn MigrationDatabase>,
    phase: RunPhase,
}

impl MigrationRunner {
    pub fn new(db: Arc<dyn MigrationDatabase>) -> Self {
        Self {
            db,
            phase: RunPhase::NotStarted,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, next: RunPhase) {
        debug!(from = %self.phase, to = %next, "migration run phase");
        self.phase = next;
    }

    pub async fn ensure_ledger(&self) -> Result<()> {
        self.db
            .ensure_ledger()
            .await
            .map_err(|e| Error::Ledger(format!("failed to ensure ledger table: {e}")))
    }

    /// Names already recorded in the ledger, in insertion order.
    pub async fn load_applied_names(&self) -> Result<Vec<String>> {
        let records = self
            .db
            .applied_migrations()
            .await
            .map_err(|e| Error::Ledger(format!("failed to load applied migrations: {e}")))?;
        Ok(records.into_iter().map(|r| r.name).collect())
    }

    /// Apply every pending migration in `registry`. Stops at the first
    /// failure; migrations recorded before it stay recorded.
    pub async fn run(&mut self, registry: &MigrationRegistry) -> Result<RunReport> {
        info!(
            target_db = %self.db.describe(),
            migrations = registry.len(),
            "starting migration run"
        );

        match self.run_steps(registry).await {
            Ok(report) => {
                self.transition(RunPhase::Done);
                info!(
                    applied = report.applied.len(),
                    skipped = report.skipped.len(),
                    "migration run complete"
                );
                Ok(report)
            }
            Err(e) => {
                // The caller reports the error.
                self.transition(RunPhase::Failed);
                Err(e)
            }
        }
    }

    async fn run_steps(&mut self, registry: &MigrationRegistry) -> Result<RunReport> {
        self.transition(RunPhase::EnsuringLedger);
        self.ensure_ledger().await?;

        self.transition(RunPhase::LoadingApplied);
        let applied: HashSet<String> = self.load_applied_names().await?.into_iter().collect();

        let mut report = RunReport::default();
        for migration in registry.iter() {
            let name = migration.name();

            if applied.contains(name) {
                self.transition(RunPhase::Skipping);
                debug!(migration = %name, "already applied, skipping");
                report.skipped.push(name.to_string());
                continue;
            }

            self.transition(RunPhase::Executing);
            info!(migration = %name, "applying migration");
            self.db
                .execute_sql(&migration.sql)
                .await
                .map_err(|e| Error::Migration {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;

            self.transition(RunPhase::Recording);
            self.db
                .record_migration(name)
                .await
                .map_err(|e| Error::Recording {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;

            info!(migration = %name, "migration applied");
            report.applied.push(name.to_string());
        }

        Ok(report)
    }

    /// Applied/pending view of `registry` against the ledger. Executes no
    /// migrations and writes no ledger rows.
    pub async fn status(&self, registry: &MigrationRegistry) -> Result<Vec<MigrationStatus>> {
        self.ensure_ledger().await?;
        let records = self
            .db
            .applied_migrations()
            .await
            .map_err(|e| Error::Ledger(format!("failed to load applied migrations: {e}")))?;

        let mut applied: HashMap<String, DateTime<Utc>> = records
            .into_iter()
            .map(|r| (r.name, r.executed_at))
            .collect();

        let statuses = registry
            .iter()
            .map(|m| MigrationStatus {
                name: m.name().to_string(),
                state: match applied.remove(m.name()) {
                    Some(executed_at) => MigrationState::Applied { executed_at },
                    None => MigrationState::Pending,
                },
            })
            .collect();

        for name in applied.keys() {
            warn!(migration = %name, "ledger entry has no matching migration");
        }

        Ok(statuses)
    }
}
