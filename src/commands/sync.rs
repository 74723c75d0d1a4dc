//! `voxmail backfill` / `voxmail delta` - one-shot foreground ingestion.

use anyhow::{bail, Context};
use std::time::Duration;
use voxmail_runtime::{AssistantRuntime, GrantId, JobId, RuntimeSettings};

/// How long a foreground job may run before we stop waiting.
const WAIT_CAP: Duration = Duration::from_secs(30 * 60);

fn resolve_grant(
    explicit: Option<String>,
    settings: &RuntimeSettings,
) -> anyhow::Result<GrantId> {
    let grant = explicit.or_else(|| {
        settings
            .mail
            .as_ref()
            .and_then(|m| m.default_grant.clone())
    });
    match grant {
        Some(g) if !g.trim().is_empty() => Ok(GrantId::new(g)),
        _ => bail!("no grant id: pass --grant-id or set MAIL_GRANT_ID"),
    }
}

async fn wait_and_print(runtime: &AssistantRuntime, job_id: JobId) -> anyhow::Result<()> {
    let started = std::time::Instant::now();
    loop {
        let record = runtime.store.jobs.get(job_id).context("job disappeared")?;
        if record.status.is_terminal() {
            println!("{}", serde_json::to_string_pretty(&record)?);
            if record.status != voxmail_runtime::JobStatus::Succeeded {
                bail!("job finished with status {}", record.status);
            }
            return Ok(());
        }
        if started.elapsed() > WAIT_CAP {
            println!("{}", serde_json::to_string_pretty(&record)?);
            bail!("gave up waiting after {WAIT_CAP:?}; job is still running");
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

pub async fn run_backfill(
    grant: Option<String>,
    months: Option<String>,
    max: Option<String>,
) -> anyhow::Result<()> {
    let settings = RuntimeSettings::from_env();
    settings
        .require_providers()
        .context("backfill needs live providers")?;
    let months = months.map(|m| m.parse::<u32>()).transpose().context("invalid --months")?;
    let max = max.map(|m| m.parse::<u64>()).transpose().context("invalid --max")?;

    let grant = resolve_grant(grant, &settings)?;
    let runtime = AssistantRuntime::from_settings(settings).context("failed to wire runtime")?;

    let record = runtime
        .dispatcher
        .start_backfill(grant, months, max)
        .await
        .context("failed to enqueue backfill")?;
    tracing::info!(job_id = %record.job_id, since = record.since_epoch, "backfill enqueued");

    let outcome = wait_and_print(&runtime, record.job_id).await;
    runtime.shutdown().await;
    outcome
}

pub async fn run_delta(grant: Option<String>, max: Option<String>) -> anyhow::Result<()> {
    let settings = RuntimeSettings::from_env();
    settings
        .require_providers()
        .context("delta sync needs live providers")?;
    let max = max.map(|m| m.parse::<u64>()).transpose().context("invalid --max")?;

    let grant = resolve_grant(grant, &settings)?;
    let runtime = AssistantRuntime::from_settings(settings).context("failed to wire runtime")?;

    let record = runtime
        .dispatcher
        .start_delta(grant, max)
        .await
        .context("failed to enqueue delta")?;
    tracing::info!(job_id = %record.job_id, since = record.since_epoch, "delta enqueued");

    let outcome = wait_and_print(&runtime, record.job_id).await;
    runtime.shutdown().await;
    outcome
}
