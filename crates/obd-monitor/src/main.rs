//! OBD-II Engine RPM Monitor - Main Entry Point

use obd_monitor::{init_logging, run_monitor, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let settings = Settings::load(config_path.as_deref())?;
    init_logging(&settings)?;

    info!("=== OBD Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Polling PID {:#04X} at {} bit/s",
        settings.poller.pid,
        settings.protocol.bit_rate()
    );

    run_monitor(settings, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    Ok(())
}
