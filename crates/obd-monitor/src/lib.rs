//! OBD-II Engine RPM Monitor
//!
//! Wires the CAN controller, the interrupt path and the request/response
//! poller together and runs the permanent polling loop.

use anyhow::Context;
use can_driver::{BusConfig, Reporter, SimulatedController};
use obd_protocol::{ObdPoller, PollOutcome, PollerStats};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod ecu;
mod settings;

pub use ecu::{SimulatedEcu, MAX_IDLE_RPM};
pub use settings::{EcuSettings, Settings, DEFAULT_CONFIG_FILE, ENV_PREFIX};

/// Initialize logging; an unrecognised `log_level` fails startup
pub fn init_logging(settings: &Settings) -> anyhow::Result<()> {
    let level = log_level(settings)?;
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if settings.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn log_level(settings: &Settings) -> anyhow::Result<Level> {
    settings
        .log_level
        .parse::<Level>()
        .with_context(|| format!("invalid log_level {:?}", settings.log_level))
}

fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Run the polling loop until `shutdown` resolves
pub async fn run_monitor(
    settings: Settings,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<PollerStats> {
    let controller = Arc::new(SimulatedController::new());
    if settings.ecu.enabled {
        let ecu = SimulatedEcu::new(settings.ecu.response_id, settings.ecu.idle_rpm);
        controller.set_responder(ecu.into_responder());
    } else {
        warn!("Simulated ECU disabled, requests will go unanswered");
    }

    let bus = BusConfig {
        ready_attempts: settings.ready_attempts,
        ..settings.protocol.bus_config(settings.clock_hz)
    };
    let mut poller = ObdPoller::attach(
        controller,
        &bus,
        settings.poller.clone(),
        Reporter::default(),
    )?;
    poller.start()?;

    let mut ticker = tokio::time::interval(Duration::from_millis(settings.loop_period_ms.max(1)));
    let mut bus_error = false;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if let PollOutcome::Received(reading) = poller.poll_and_handle_response() {
                    let response = reading.decode(timestamp_ms());
                    info!(
                        pid = response.pid,
                        value = response.value,
                        data_lost = reading.data_lost,
                        "Decoded reading"
                    );
                }

                let error = poller.bus_error();
                if error && !bus_error {
                    warn!("CAN controller reported a status/error event");
                } else if !error && bus_error {
                    info!("CAN bus recovered");
                }
                bus_error = error;
            }
        }
    }

    let stats = poller.stats();
    info!(
        "Monitor stopped: {} requests, {} responses, {} timeouts",
        stats.requests, stats.responses, stats.timeouts
    );
    Ok(stats)
}
