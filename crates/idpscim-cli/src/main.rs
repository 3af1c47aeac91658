use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use idpscim_sync::SyncConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "idpscim")]
#[command(about = "Keep a SCIM target's groups and users in step with the identity provider")]
struct Cli {
    /// YAML configuration file; `IDPSCIM_*` environment variables override it.
    #[arg(long, global = true, env = "IDPSCIM_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one reconciliation and print its summary.
    Sync,
    /// Run reconciliations on the configured cron schedule until interrupted.
    Schedule,
    /// Print a summary of the persisted snapshot.
    State,
    /// Validate the configuration and exit.
    CheckConfig,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Cancel `token` on Ctrl-C so an interrupted run never persists a partial snapshot.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = SyncConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let report = idpscim_sync::run_sync_once(&config, cancel).await?;
            println!(
                "sync complete: run_id={} changed={} persisted={} groups(+{} ~{} -{} adopted {}) users(+{} ~{} -{} adopted {}) members(+{} -{}) patches={}",
                report.run_id,
                report.changed,
                report.persisted,
                report.groups.created,
                report.groups.updated,
                report.groups.deleted,
                report.groups.adopted,
                report.users.created,
                report.users.updated,
                report.users.deleted,
                report.users.adopted,
                report.members_added,
                report.members_removed,
                report.patches_sent,
            );
        }
        Commands::Schedule => {
            config.validate().context("validating configuration")?;
            let cancel = CancellationToken::new();
            let mut sched = idpscim_sync::maybe_build_scheduler(config.clone(), cancel.clone())
                .await?
                .context("scheduler is disabled; set IDPSCIM_SCHEDULER_ENABLED=true")?;
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.sync_cron, "scheduler running");

            tokio::signal::ctrl_c()
                .await
                .context("waiting for interrupt")?;
            warn!("interrupt received; stopping scheduler");
            cancel.cancel();
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::State => match idpscim_sync::load_state(&config).await? {
            Some(state) => println!(
                "state: schema={} code={} last_sync={} fingerprint={} groups={} users={} memberships={}",
                state.schema_version,
                state.code_version,
                state.last_sync.to_rfc3339(),
                state.fingerprint,
                state.groups.items,
                state.users.items,
                state.group_members.items,
            ),
            None => println!("state: none persisted yet"),
        },
        Commands::CheckConfig => {
            config.validate()?;
            println!(
                "configuration ok: state={:?} bucket={} key={} filters={} order={}",
                config.state_backend,
                config.state_bucket,
                config.state_key,
                config.group_filters.len(),
                config.apply_order,
            );
        }
    }

    Ok(())
}
