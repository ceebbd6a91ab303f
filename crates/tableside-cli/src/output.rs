use tableside_db::{MigrationState, MigrationStatus, RunReport};

const NAME_WIDTH: usize = 40;
const STATE_WIDTH: usize = 34;

/// Render the status table printed by `tableside-migrate status`.
pub fn render_status_table(target: &str, statuses: &[MigrationStatus]) -> String {
    let width = NAME_WIDTH + STATE_WIDTH + 5;
    let title = format!("Migrations · {target}");
    let title_dashes = width.saturating_sub(title.chars().count() + 7);

    let row = |l: &str, r: &str| format!("│ {:<NAME_WIDTH$}│ {:<STATE_WIDTH$} │", l, r);

    let mut lines = vec![
        format!("╭─── {title} {}╮", "─".repeat(title_dashes)),
        row("Name", "State"),
        format!("├{}┼{}┤", "─".repeat(NAME_WIDTH + 1), "─".repeat(STATE_WIDTH + 2)),
    ];

    if statuses.is_empty() {
        lines.push(row("(no migrations registered)", ""));
    }
    for status in statuses {
        let state = match &status.state {
            MigrationState::Applied { executed_at } => {
                format!("applied {}", executed_at.format("%Y-%m-%d %H:%M:%S UTC"))
            }
            MigrationState::Pending => "pending".to_string(),
        };
        lines.push(row(&status.name, &state));
    }

    let pending = statuses
        .iter()
        .filter(|s| s.state == MigrationState::Pending)
        .count();
    lines.push(format!("╰{}╯", "─".repeat(width - 2)));
    lines.push(format!(
        "{} applied, {pending} pending",
        statuses.len() - pending
    ));
    lines.join("\n")
}

pub fn render_run_summary(report: &RunReport) -> String {
    if report.applied.is_empty() {
        return format!(
            "Database is up to date ({} migrations already applied).",
            report.skipped.len()
        );
    }
    let mut out = format!(
        "Applied {} migration{}:",
        report.applied.len(),
        if report.applied.len() == 1 { "" } else { "s" }
    );
    for name in &report.applied {
        out.push_str(&format!("\n  + {name}"));
    }
    out
}
