//! Reconciliation orchestration: configuration, secret resolution, the engine,
//! and the run-once and scheduled entry points.

pub mod batcher;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod secrets;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use idpscim_adapters::{GoogleDirectoryClient, GoogleDirectoryConfig, ScimClient};
use idpscim_core::State;
use idpscim_storage::{
    BackoffPolicy, FileStateRepository, HttpClientConfig, HttpFetcher, HttpObjectStateRepository,
    StateRepository,
};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use batcher::{batch_member_patches, MAX_MEMBERS_PER_PATCH};
pub use config::{ApplyOrder, ConfigError, SecretSource, StateBackend, SyncConfig};
pub use diff::{diff_memberships, diff_resources, Delta, MembershipChange, Plan};
pub use engine::{EntityCounts, ReconcileOptions, ReconcileReport, Reconciler, RunContext};
pub use error::{Phase, ReconcileError, ReconcileSource};
pub use secrets::{resolve_secrets, ResolvedSecrets};

pub const CRATE_NAME: &str = "idpscim-sync";

pub fn http_fetcher(config: &SyncConfig) -> Result<Arc<HttpFetcher>> {
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        backoff: BackoffPolicy {
            max_retries: config.http_max_retries,
            ..BackoffPolicy::default()
        },
        ..Default::default()
    })?;
    Ok(Arc::new(http))
}

pub fn state_repository(
    config: &SyncConfig,
    http: Arc<HttpFetcher>,
    token: Option<String>,
) -> Result<Arc<dyn StateRepository>> {
    let repository: Arc<dyn StateRepository> = match config.state_backend {
        StateBackend::File => Arc::new(FileStateRepository::new(
            config.state_bucket.clone(),
            config.state_key.clone(),
        )),
        StateBackend::Http => {
            let endpoint = config
                .state_endpoint
                .clone()
                .context("http state backend needs state_endpoint")?;
            Arc::new(HttpObjectStateRepository::new(
                http,
                endpoint,
                config.state_bucket.clone(),
                config.state_key.clone(),
                token,
            ))
        }
    };
    Ok(repository)
}

/// Validate configuration, resolve secrets and wire the adapters into an engine.
pub async fn build_reconciler(config: &SyncConfig) -> Result<Reconciler> {
    config.validate().context("validating configuration")?;
    let secrets = resolve_secrets(config)
        .await
        .context("resolving secrets")?;
    let http = http_fetcher(config)?;

    let directory = GoogleDirectoryClient::new(
        Arc::clone(&http),
        GoogleDirectoryConfig {
            base_url: config.directory_base_url.clone(),
            customer: config.directory_customer.clone(),
            access_token: secrets.directory_token,
        },
    );
    let provisioning = ScimClient::new(Arc::clone(&http), config.scim_endpoint.clone(), secrets.scim_token);
    let state = state_repository(config, http, secrets.state_token)?;

    Ok(Reconciler::new(
        Arc::new(directory),
        Arc::new(provisioning),
        state,
        ReconcileOptions {
            apply_order: config.apply_order,
            fetch_concurrency: config.fetch_concurrency,
            max_members_per_patch: MAX_MEMBERS_PER_PATCH,
        },
    ))
}

/// One reconciliation, cancelled by `cancel` or by the configured run deadline.
pub async fn run_sync_once(config: &SyncConfig, cancel: CancellationToken) -> Result<ReconcileReport> {
    let reconciler = build_reconciler(config).await?;
    let ctx = RunContext::new(cancel);

    let deadline = (config.run_timeout_secs > 0).then(|| {
        let token = ctx.cancel.clone();
        let limit = Duration::from_secs(config.run_timeout_secs);
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!(timeout_secs = limit.as_secs(), "run deadline reached; cancelling");
            token.cancel();
        })
    });

    let result = reconciler.reconcile(&ctx, &config.group_filters).await;
    if let Some(timer) = deadline {
        timer.abort();
    }
    result.with_context(|| format!("reconciliation run {}", ctx.run_id))
}

pub async fn run_sync_once_from_env() -> Result<ReconcileReport> {
    let config = SyncConfig::from_env().context("loading configuration")?;
    run_sync_once(&config, CancellationToken::new()).await
}

/// Read the persisted snapshot without touching the directory or the target.
pub async fn load_state(config: &SyncConfig) -> Result<Option<State>> {
    let token = secrets::resolve_secret("state_token", &config.state_token)
        .await
        .context("resolving state token")?;
    let repository = state_repository(config, http_fetcher(config)?, token)?;
    repository
        .get()
        .await
        .with_context(|| format!("reading state from {}", repository.location()))
}

/// Build the cron scheduler when enabled. Overlapping ticks are skipped so at
/// most one reconciliation runs at a time.
pub async fn maybe_build_scheduler(
    config: SyncConfig,
    cancel: CancellationToken,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.sync_cron.clone();
    let config = Arc::new(config);
    let running = Arc::new(Mutex::new(()));

    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let config = Arc::clone(&config);
        let running = Arc::clone(&running);
        let cancel = cancel.clone();
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                warn!("previous sync still running; skipping this tick");
                return;
            };
            match run_sync_once(&config, cancel.child_token()).await {
                Ok(report) => info!(
                    run_id = %report.run_id,
                    operations = report.operations(),
                    persisted = report.persisted,
                    "scheduled sync finished"
                ),
                Err(err) => error!(error = ?err, "scheduled sync failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
