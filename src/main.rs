use anyhow::Context;
use lrc_client::{LrcClient, LrcUpdate};
use lrc_device::device::{DeviceConfig, Subarray};
use lrc_shared::{DeviceProxy, TaskStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = DeviceConfig::default();
    info!("Subarray device starting: {}", config.name);
    info!("  Workers: {}", config.max_workers);

    let subarray = Subarray::new(config).context("failed to create subarray")?;
    let proxy: Arc<dyn DeviceProxy> = subarray.device();
    let client = LrcClient::new(proxy);

    // Regular observation: configure, scan, end
    run_to_completion(&client, "Configure", Some(r#"{"config_id": "sbi-demo-001", "receptors": ["SKA001", "SKA036"]}"#)).await?;
    run_to_completion(&client, "Scan", Some(r#"{"scan_id": 1}"#)).await?;
    run_to_completion(&client, "End", None).await?;
    info!("Observation finished, obsState {}", subarray.obs_state());

    // Aborted observation followed by a reset
    let (tx, rx) = mpsc::unbounded_channel();
    let configure = client
        .invoke("Configure", Some(r#"{"config_id": "sbi-demo-002"}"#.into()), log_updates("Configure", tx))
        .await?;
    sleep(Duration::from_millis(150)).await;

    run_to_completion(&client, "Abort", None).await?;
    let status = wait_terminal(rx).await;
    info!("Configure {} ended {:?}", configure.command_id(), status);
    info!("After abort, obsState {}", subarray.obs_state());

    run_to_completion(&client, "ObsReset", None).await?;
    info!("After reset, obsState {}", subarray.obs_state());

    Ok(())
}

/// Callback that logs every update and forwards statuses to `tx`
fn log_updates(command: &'static str, tx: mpsc::UnboundedSender<TaskStatus>) -> lrc_client::LrcCallback {
    Arc::new(move |update| match update {
        LrcUpdate::Status(status) => {
            info!("[{}] status {}", command, status);
            let _ = tx.send(status);
        }
        LrcUpdate::Progress(progress) => info!("[{}] progress {}%", command, progress),
        LrcUpdate::Result(result) => info!("[{}] result {}", command, result),
        LrcUpdate::Error(error) => warn!("[{}] error {}", command, error),
    })
}

async fn wait_terminal(mut rx: mpsc::UnboundedReceiver<TaskStatus>) -> Option<TaskStatus> {
    while let Some(status) = rx.recv().await {
        if status.is_terminal() {
            return Some(status);
        }
    }
    None
}

async fn run_to_completion(
    client: &LrcClient,
    command: &'static str,
    argin: Option<&str>,
) -> anyhow::Result<TaskStatus> {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = client
        .invoke(command, argin.map(str::to_string), log_updates(command, tx))
        .await
        .with_context(|| format!("{command} failed"))?;

    let status = wait_terminal(rx)
        .await
        .with_context(|| format!("{command} ({}) ended without a status", handle.command_id()))?;
    Ok(status)
}
