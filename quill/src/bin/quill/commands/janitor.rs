use anyhow::Result;
use chrono::Utc;
use clap::{Subcommand, ValueEnum};
use comfy_table::{Cell, Table};
use serde::Serialize;

use quill::PurgeReport;

use super::{build_janitor, connect_store};
use crate::context::ConfigContext;
use crate::examples::ExampleGroup;
use crate::output::{GlobalOptions, OutputManager, TableDisplay};

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "One-off Purges",
        commands: &[
            "quill janitor run                          # Run every purge once",
            "quill janitor run notifications            # Only read notifications",
            "quill janitor run accounts --output json   # Unverified accounts, JSON report",
        ],
    },
    ExampleGroup {
        title: "Inspect",
        commands: &["quill janitor policy                       # Show the retention windows in effect"],
    },
];

#[derive(Subcommand)]
pub enum JanitorCommands {
    /// Run purges once and report what was removed
    #[command(name = "run")]
    Run {
        /// Purge to run (all when omitted)
        #[arg(value_enum)]
        target: Option<PurgeTarget>,
    },

    /// Show the retention policy resolved from config
    #[command(name = "policy")]
    Policy,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum PurgeTarget {
    Notifications,
    Accounts,
    Receipts,
}

impl PurgeTarget {
    const ALL: [PurgeTarget; 3] = [PurgeTarget::Notifications, PurgeTarget::Accounts, PurgeTarget::Receipts];

    fn label(self) -> &'static str {
        match self {
            PurgeTarget::Notifications => "read notifications",
            PurgeTarget::Accounts => "unverified accounts",
            PurgeTarget::Receipts => "trigger receipts",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PurgeRow {
    pub target: &'static str,
    #[serde(flatten)]
    pub report: PurgeReport,
}

impl TableDisplay for Vec<PurgeRow> {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = Table::new();
        if !options.no_color {
            table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
        }
        table.set_header(vec!["Target", "Matched", "Purged", "Failed"]);
        for row in self {
            table.add_row(vec![
                Cell::new(row.target),
                Cell::new(row.report.matched),
                Cell::new(row.report.purged),
                Cell::new(row.report.failed),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        self.iter()
            .map(|row| format!("{}={}/{}", row.target, row.report.purged, row.report.matched))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub async fn handle_janitor_commands(
    command: JanitorCommands,
    ctx: &ConfigContext,
    output: &OutputManager,
) -> Result<()> {
    match command {
        JanitorCommands::Run { target } => run_purges(target, ctx, output).await,
        JanitorCommands::Policy => show_policy(ctx, output),
    }
}

async fn run_purges(target: Option<PurgeTarget>, ctx: &ConfigContext, output: &OutputManager) -> Result<()> {
    let store = connect_store(ctx).await?;
    let janitor = build_janitor(ctx, store)?;
    let targets = target.map(|target| vec![target]).unwrap_or_else(|| PurgeTarget::ALL.to_vec());

    let now = Utc::now();
    let mut rows = Vec::with_capacity(targets.len());
    for target in targets {
        output.progress(&format!("Purging {}", target.label()));
        let report = match target {
            PurgeTarget::Notifications => janitor.purge_read_notifications(now).await?,
            PurgeTarget::Accounts => janitor.purge_unverified_accounts(now).await?,
            PurgeTarget::Receipts => janitor.purge_trigger_receipts(now).await?,
        };
        output.clear_line();
        rows.push(PurgeRow {
            target: target.label(),
            report,
        });
    }

    output.display(&rows)?;
    let failed: usize = rows.iter().map(|row| row.report.failed).sum();
    if failed > 0 {
        output.warning(&format!("{failed} candidate(s) were not fully cleaned; see logs"));
    }
    Ok(())
}

fn show_policy(ctx: &ConfigContext, output: &OutputManager) -> Result<()> {
    let retention = &ctx.config.retention;
    let policy = retention.policy()?;
    output.heading("Retention policy");
    output.key_value(
        "Read notifications",
        &format!("{} day(s)", policy.read_notification_ttl.num_days()),
    );
    output.key_value(
        "Unverified accounts",
        &format!("{} minute(s)", policy.unverified_grace.num_minutes()),
    );
    output.key_value("Trigger receipts", &format!("{} day(s)", policy.receipt_ttl.num_days()));
    output.key_value("Daily purge", &format!("{} UTC", retention.daily_purge_at));
    output.key_value(
        "Unverified sweep",
        &format!("every {} minute(s)", retention.unverified_sweep_minutes),
    );
    Ok(())
}
