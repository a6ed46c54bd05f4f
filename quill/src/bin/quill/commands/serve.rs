use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use log::info;

use quill::triggers::{Schedule, Scheduler};
use quill::{HttpPushGateway, JanitorJob, JanitorTask, Services};

use super::{build_janitor, connect_store};
use crate::context::ConfigContext;
use crate::examples::ExampleGroup;
use crate::output::OutputManager;

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Run Server Side",
        commands: &[
            "quill serve                       # Triggers, push relay and scheduled purges",
            "quill serve --no-scheduler        # Triggers only, purges run elsewhere",
        ],
    },
    ExampleGroup {
        title: "Custom Config",
        commands: &["quill --config deploy/quill.toml serve"],
    },
];

#[derive(Args)]
pub struct ServeArgs {
    /// Do not run the retention jobs in this process
    #[arg(long)]
    pub no_scheduler: bool,
}

pub async fn handle_serve(args: ServeArgs, ctx: &ConfigContext, output: &OutputManager) -> Result<()> {
    output.progress("Connecting to store");
    let store = connect_store(ctx).await?;
    output.clear_line();
    output.success(&format!("Connected (prefix `{}`)", store.prefix()));

    let services = Services::with_counter_mode(store.clone(), ctx.counter_mode()?);
    let gateway = HttpPushGateway::new(
        ctx.push_endpoint()?,
        Duration::from_secs(ctx.config.push.timeout_secs),
    )
    .context("Invalid push gateway configuration")?;
    let runtime = services.triggers(Arc::new(gateway));
    for name in runtime.handler_names() {
        output.bullet(&format!("trigger {name}"));
    }
    let triggers = runtime.start();

    let scheduler = if args.no_scheduler {
        output.info("Scheduler disabled");
        None
    } else {
        let retention = &ctx.config.retention;
        let daily = Schedule::daily_at(&retention.daily_purge_at)?;
        let janitor = Arc::new(build_janitor(ctx, store.clone())?);
        let scheduler = Scheduler::new()
            .add(
                Schedule::Every(retention.unverified_sweep()?),
                JanitorJob::new(janitor.clone(), JanitorTask::UnverifiedAccounts),
            )
            .add(daily, JanitorJob::new(janitor.clone(), JanitorTask::ReadNotifications))
            .add(daily, JanitorJob::new(janitor, JanitorTask::TriggerReceipts));
        output.bullet(&format!(
            "{} scheduled job(s), daily purges at {} UTC",
            scheduler.len(),
            retention.daily_purge_at
        ));
        Some(scheduler.start())
    };

    output.info("Running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("shutdown requested");
    triggers.stop();
    if let Some(scheduler) = scheduler {
        scheduler.stop();
    }
    output.success("Stopped");
    Ok(())
}
