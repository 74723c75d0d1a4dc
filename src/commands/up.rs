//! `voxmail up` - serve the API with the timer and workers running.

use anyhow::Context;
use voxmail_runtime::{api, AssistantRuntime, RuntimeSettings};

pub async fn run(port: Option<String>, bind: Option<String>) -> anyhow::Result<()> {
    let mut settings = RuntimeSettings::from_env();
    if let Some(port) = port {
        settings.http.port = port.parse().context("invalid --port")?;
    }
    if let Some(bind) = bind {
        settings.http.bind_address = bind;
    }

    let runtime = AssistantRuntime::from_settings(settings).context("failed to wire runtime")?;
    let timer = runtime
        .spawn_delta_timer()
        .context("failed to start delta timer")?;

    let state = runtime.app_state();
    let http = runtime.settings.http.clone();

    tokio::select! {
        served = api::serve(state, &http) => {
            served.context("HTTP server exited")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    timer.abort();
    runtime.shutdown().await;
    Ok(())
}
