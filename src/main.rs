//! Appliance daemon entry point.
//!
//! Boot order mirrors the hardware it runs on: configuration and telemetry
//! first, then the datalog (storage must be consistent before anything
//! produces records), then the device bank, then the two cores — the
//! data-plane task queue hosting the sampler and the writer, and the
//! control-plane tokio runtime serving the HTTP API.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use metermon::api::{self, ApiState};
use metermon::bus::SimBus;
use metermon::config::Settings;
use metermon::datalog::DataLog;
use metermon::device::DeviceBank;
use metermon::integrator::Integrator;
use metermon::sampler::Sampler;
use metermon::scheduler::TaskQueue;
use metermon::{metrics, telemetry};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "metermon", about = "Energy-metering appliance daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config/metermon.toml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config).context("loading configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {e}"))?;

    telemetry::init(&settings.application.log_level, telemetry::LogFormat::Compact)?;
    let metrics_handle =
        metrics::install().map_err(|e| anyhow!("installing metrics recorder: {e}"))?;

    info!(name = %settings.application.name, "booting");

    // The storage device is shared with other subsystems; one mutex guards it.
    let disk = Arc::new(Mutex::new(()));
    let datalog = Arc::new(DataLog::new(
        &settings.datalog.path,
        settings.datalog.interval_secs,
        settings.datalog.retention_days,
        Arc::clone(&disk),
    ));
    if let Err(err) = datalog.begin() {
        // Corruption has already removed the file; exit non-zero so the
        // supervisor restarts us against a clean log.
        error!(%err, "datalog failed to open");
        std::process::exit(1);
    }
    info!(
        entries = datalog.entries(),
        path = %settings.datalog.path.display(),
        "datalog open"
    );

    let devices = Arc::new(DeviceBank::from_config(&settings.devices));

    // Data-plane core: collection and the log writer. The collector carries
    // the higher priority so it samples first when both land on one tick.
    let mut data_plane = TaskQueue::new("data-plane");
    let mut sampler = Sampler::new(Box::new(SimBus::new()), Arc::clone(&devices));
    data_plane.spawn("collect", 1, 0, move || sampler.run());
    let mut integrator = Integrator::new(Arc::clone(&datalog), Arc::clone(&devices));
    data_plane.spawn("datalog-writer", 0, 0, move || integrator.run());
    let data_plane = data_plane.start().context("starting data-plane queue")?;

    // Control-plane core: the HTTP API.
    let state = Arc::new(ApiState {
        datalog,
        devices,
        metrics: Some(metrics_handle),
        read_timeout: Duration::from_millis(settings.server.read_timeout_ms),
    });
    let app = api::router(state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("control-plane")
        .enable_all()
        .build()
        .context("building control-plane runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&settings.server.listen)
            .await
            .with_context(|| format!("binding {}", settings.server.listen))?;
        info!(listen = %settings.server.listen, "serving API");
        axum::serve(listener, app).await.context("serving API")?;
        Ok::<(), anyhow::Error>(())
    })?;

    data_plane
        .join()
        .map_err(|_| anyhow!("data-plane thread panicked"))?;
    Ok(())
}
