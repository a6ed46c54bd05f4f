mod commands;
mod context;
mod examples;
mod output;
mod theme;

use anyhow::Result;
use clap::{
    ColorChoice, Command, CommandFactory, FromArgMatches, Parser, Subcommand,
    builder::{Styles, styling::AnsiColor},
};
use colored::control::ShouldColorize;
use std::path::PathBuf;

use commands::{
    config::{ConfigCommands, handle_config_commands},
    janitor::{JanitorCommands, handle_janitor_commands},
    serve::{ServeArgs, handle_serve},
};
use context::ConfigContext;
use examples::{ExampleGroup, command_examples};
use output::{GlobalOptions, OutputFormat, OutputManager};
use theme::{Tone, paint, palette};

const ENVIRONMENT_VARIABLES: &[(&str, &str)] = &[
    ("REDIS_URL", "Redis connection URL (default for store.url)"),
    ("QUILL_CONFIG", "Config file path (default .quill/config.toml)"),
    ("RUST_LOG", "Log filter, e.g. quill=debug"),
];

#[derive(Parser)]
#[command(name = "quill")]
#[command(author = "Quill Team")]
#[command(version = "0.1.0")]
#[command(
    about = "Engagement and notification backend for Quill",
    long_about = r#"Server-side runner for Quill's engagement pipeline that provides:

• Read-count aggregation from chapter progress changes
• Push relay for new notifications, gated by recipient preferences
• Scheduled retention purges for notifications, receipts and stale accounts

Commands:
  serve     Run triggers and scheduled jobs until interrupted
  janitor   Run retention purges once
  config    Create or inspect the config file
"#
)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Enable verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Config file path
    #[arg(long, global = true, env = "QUILL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// The clap command with per-command examples and the environment appendix attached.
fn build_cli_command() -> Command {
    let use_color = ShouldColorize::from_env().should_colorize();
    let mut command = Cli::command()
        .styles(help_styles())
        .color(if use_color { ColorChoice::Auto } else { ColorChoice::Never })
        .after_long_help(render_appendix(use_color));
    for example in command_examples() {
        if let Some(subcommand) = command.find_subcommand_mut(example.name) {
            *subcommand = subcommand.clone().after_long_help(render_examples(example.groups, use_color));
        }
    }
    command
}

fn help_styles() -> Styles {
    Styles::styled()
        .usage(AnsiColor::BrightMagenta.on_default().bold())
        .header(AnsiColor::Cyan.on_default().bold())
        .literal(AnsiColor::Magenta.on_default())
        .placeholder(AnsiColor::BrightBlack.on_default())
        .error(AnsiColor::Red.on_default().bold())
}

fn render_examples(groups: &[ExampleGroup], use_color: bool) -> String {
    let arrow = paint(Tone::Detail.icon(), palette::COMMAND, false, use_color);
    let sections: Vec<String> = groups
        .iter()
        .map(|group| {
            let mut lines = vec![format!("  {}", paint(group.title, palette::HEADING, true, use_color))];
            lines.extend(
                group
                    .commands
                    .iter()
                    .map(|command| format!("    {arrow} {}", paint(command, palette::COMMAND, false, use_color))),
            );
            lines.join("\n")
        })
        .collect();
    format!(
        "{}\n{}\n",
        paint("Examples:", palette::SECTION, true, use_color),
        sections.join("\n\n")
    )
}

fn render_appendix(use_color: bool) -> String {
    let variables: Vec<String> = ENVIRONMENT_VARIABLES
        .iter()
        .map(|(key, description)| {
            format!(
                "  {}  {}",
                paint(key, palette::KEY, true, use_color),
                paint(description, palette::VALUE, false, use_color)
            )
        })
        .collect();
    format!(
        "{}\n{}\n\n{} {}\n",
        paint("Environment Variables:", palette::SECTION, true, use_color),
        variables.join("\n"),
        paint("Tip:", palette::SECTION, true, use_color),
        paint(
            "Use 'quill <command> --help' to view examples for each command.",
            palette::COMMAND,
            false,
            use_color
        )
    )
}

#[derive(Subcommand)]
enum Commands {
    /// Run triggers, push relay and retention jobs
    Serve(ServeArgs),

    /// Run retention purges on demand
    #[command(subcommand)]
    Janitor(JanitorCommands),

    /// Create or inspect the config file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let matches = build_cli_command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());

    if let Err(err) = execute(cli).await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let global_options = GlobalOptions {
        output_format: cli.output,
        quiet: cli.quiet,
        verbose: cli.verbose,
        no_color: cli.no_color,
    };

    let output = OutputManager::new(global_options);
    let ctx = ConfigContext::load(cli.config.as_deref())?;
    output.verbose(&format!(
        "config {} ({})",
        ctx.config_path.display(),
        if ctx.loaded { "loaded" } else { "defaults" }
    ));

    match cli.command {
        Commands::Serve(args) => {
            handle_serve(args, &ctx, &output).await?;
        }
        Commands::Janitor(janitor_cmd) => {
            handle_janitor_commands(janitor_cmd, &ctx, &output).await?;
        }
        Commands::Config(config_cmd) => {
            handle_config_commands(config_cmd, &ctx, &output).await?;
        }
    }

    Ok(())
}
