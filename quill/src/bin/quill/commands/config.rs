use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Table};

use crate::context::{ConfigContext, QuillConfig};
use crate::examples::ExampleGroup;
use crate::output::{GlobalOptions, OutputManager, TableDisplay};

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Create",
        commands: &[
            "quill config init                 # Write .quill/config.toml with defaults",
            "quill config init --force         # Overwrite an existing file",
        ],
    },
    ExampleGroup {
        title: "Inspect",
        commands: &[
            "quill config show                 # Resolved settings",
            "quill config show --output json   # Same, as JSON",
        ],
    },
];

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a config file populated with defaults
    #[command(name = "init")]
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the resolved configuration
    #[command(name = "show")]
    Show,
}

impl TableDisplay for QuillConfig {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = Table::new();
        if !options.no_color {
            table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
        }
        table.set_header(vec!["Setting", "Value"]);
        let rows = [
            ("store.url", self.store.url.clone()),
            ("store.prefix", self.store.prefix.clone()),
            ("store.counter_mode", self.store.counter_mode.clone()),
            ("push.endpoint", self.push.endpoint.clone()),
            ("push.timeout_secs", self.push.timeout_secs.to_string()),
            (
                "retention.read_notification_days",
                self.retention.read_notification_days.to_string(),
            ),
            (
                "retention.unverified_grace_minutes",
                self.retention.unverified_grace_minutes.to_string(),
            ),
            ("retention.receipt_days", self.retention.receipt_days.to_string()),
            (
                "retention.unverified_sweep_minutes",
                self.retention.unverified_sweep_minutes.to_string(),
            ),
            ("retention.daily_purge_at", self.retention.daily_purge_at.clone()),
            ("storage.root", self.storage.root.clone()),
        ];
        for (key, value) in rows {
            table.add_row(vec![Cell::new(key), Cell::new(value)]);
        }
        table
    }

    fn to_compact(&self) -> String {
        format!(
            "prefix={} counters={} purge_at={}",
            self.store.prefix, self.store.counter_mode, self.retention.daily_purge_at
        )
    }
}

pub async fn handle_config_commands(
    command: ConfigCommands,
    ctx: &ConfigContext,
    output: &OutputManager,
) -> Result<()> {
    match command {
        ConfigCommands::Init { force } => init_config(ctx, force, output).await,
        ConfigCommands::Show => {
            if !ctx.loaded {
                output.warning(&format!("{} not found; showing defaults", ctx.config_path.display()));
            }
            output.display(&ctx.config)
        }
    }
}

async fn init_config(ctx: &ConfigContext, force: bool, output: &OutputManager) -> Result<()> {
    let path = &ctx.config_path;
    if path.exists() && !force {
        output.error(&format!("{} already exists.", path.display()));
        output.info("Use --force to overwrite it.");
        anyhow::bail!("Config file already exists");
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(&QuillConfig::default()).context("Failed to serialize config")?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    output.success(&format!("Wrote {}", path.display()));
    output.bullet("Set REDIS_URL or edit store.url before running `quill serve`");
    Ok(())
}
